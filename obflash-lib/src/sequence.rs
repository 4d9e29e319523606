//! ObFlash sequence file
//!
//! Flashing is a fixed sequence of stages; a failed stage rewinds the sequence
//! to the recovery stage instead of aborting

use super::definitions::*;
use std::collections::HashMap;
use std::fmt;

/// Flashing stage, in sequence order
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    SelectPort,
    OpenChannel,
    SelectImage,
    AwaitQuiet,
    Handshake,
    ChipConnect,
    Erase,
    SetFuse,
    TransferImage,
    Reset,
}

impl Stage {
    /// Stage name as printed in logs
    pub fn name(self) -> &'static str {
        match self {
            Stage::SelectPort => "select-port",
            Stage::OpenChannel => "open-channel",
            Stage::SelectImage => "select-image",
            Stage::AwaitQuiet => "await-quiet",
            Stage::Handshake => "handshake",
            Stage::ChipConnect => "chip-connect",
            Stage::Erase => "erase",
            Stage::SetFuse => "set-fuse",
            Stage::TransferImage => "transfer-image",
            Stage::Reset => "reset",
        }
    }

    /// Stages completed by the caller before a session starts
    pub fn is_setup(self) -> bool {
        matches!(
            self,
            Stage::SelectPort | Stage::OpenChannel | Stage::SelectImage
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Command sent by a stage and its expected acknowledgement
#[derive(Clone, Copy, Debug)]
pub struct Command {
    pub request: &'static str,
    pub ack: &'static str,
}

lazy_static! {
    pub static ref COMMANDS: HashMap<Stage, Command> = [
        (
            Stage::Handshake,
            Command {
                request: CMD_HANDSHAKE,
                ack: ACK_HANDSHAKE,
            }
        ),
        (
            Stage::Erase,
            Command {
                request: CMD_ERASE,
                ack: ACK_ERASE,
            }
        ),
        (
            Stage::SetFuse,
            Command {
                request: CMD_SET_FUSE,
                ack: ACK_SET_FUSE,
            }
        ),
        (
            Stage::Reset,
            Command {
                request: CMD_RESET,
                ack: ACK_RESET,
            }
        ),
    ]
    .iter()
    .copied()
    .collect();
}

/// Ordered stages with a distinguished recovery stage
#[derive(Clone, Copy, Debug)]
pub struct StageSequence {
    stages: &'static [Stage],
    recovery: usize,
}

impl StageSequence {
    /// Reference ordering, recovering at [Stage::AwaitQuiet]
    pub const FLASH: StageSequence = StageSequence {
        stages: &[
            Stage::SelectPort,
            Stage::OpenChannel,
            Stage::SelectImage,
            Stage::AwaitQuiet,
            Stage::Handshake,
            Stage::ChipConnect,
            Stage::Erase,
            Stage::SetFuse,
            Stage::TransferImage,
            Stage::Reset,
        ],
        recovery: 3,
    };

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, index: usize) -> Option<Stage> {
        self.stages.get(index).copied()
    }

    pub fn index_of(&self, stage: Stage) -> Option<usize> {
        self.stages.iter().position(|&candidate| candidate == stage)
    }

    pub fn recovery_index(&self) -> usize {
        self.recovery
    }

    pub fn recovery(&self) -> Stage {
        self.stages[self.recovery]
    }

    /// Index to run after *index* succeeded, `None` once the sequence is done
    pub fn next_on_success(&self, index: usize) -> Option<usize> {
        let next = index + 1;
        (next < self.stages.len()).then_some(next)
    }

    /// Index to run after *index* failed
    ///
    /// Failures past the recovery stage rewind to it, earlier ones repeat the stage.
    pub fn next_on_failure(&self, index: usize) -> usize {
        if index >= self.recovery {
            self.recovery
        } else {
            index
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_ordering() {
        let sequence = StageSequence::FLASH;
        assert!(!sequence.is_empty());
        assert_eq!(sequence.len(), 10);
        assert_eq!(sequence.recovery_index(), 3);
        assert_eq!(sequence.recovery(), Stage::AwaitQuiet);
        assert_eq!(sequence.index_of(Stage::TransferImage), Some(8));
        assert_eq!(sequence.stage(9), Some(Stage::Reset));
        assert_eq!(sequence.stage(10), None);

        // Order of the enum follows the sequence
        for index in 1..sequence.len() {
            assert!(sequence.stage(index - 1) < sequence.stage(index));
        }
    }

    #[test]
    fn test_success_never_skips() {
        let sequence = StageSequence::FLASH;
        for index in 0..sequence.len() - 1 {
            assert_eq!(sequence.next_on_success(index), Some(index + 1));
        }
        assert_eq!(sequence.next_on_success(sequence.len() - 1), None);
    }

    #[test]
    fn test_failure_rewinds_to_recovery() {
        let sequence = StageSequence::FLASH;
        for index in sequence.recovery_index()..sequence.len() {
            assert_eq!(sequence.next_on_failure(index), 3);
        }
        for index in 0..sequence.recovery_index() {
            assert_eq!(sequence.next_on_failure(index), index);
        }
    }

    #[test]
    fn test_transitions_stay_in_sequence() {
        let sequence = StageSequence::FLASH;
        for index in 0..sequence.len() {
            assert!(sequence.stage(sequence.next_on_failure(index)).is_some());
            if let Some(next) = sequence.next_on_success(index) {
                assert!(sequence.stage(next).is_some());
            }
        }
    }

    #[test]
    fn test_setup_stages() {
        let setup: Vec<Stage> = (0..10)
            .filter_map(|index| StageSequence::FLASH.stage(index))
            .filter(|stage| stage.is_setup())
            .collect();
        assert_eq!(
            setup,
            [Stage::SelectPort, Stage::OpenChannel, Stage::SelectImage]
        );
    }

    #[test]
    fn test_command_table() {
        assert_eq!(COMMANDS.len(), 4);
        assert_eq!(COMMANDS[&Stage::SetFuse].request, "setfuse 18 249");
        assert_eq!(COMMANDS[&Stage::SetFuse].ack, "Set configuration byte...");
        assert_eq!(COMMANDS[&Stage::Reset].ack, "MCU reset...");
        assert!(!COMMANDS.contains_key(&Stage::ChipConnect));
    }
}
