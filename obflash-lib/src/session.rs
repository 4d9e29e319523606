//! ObFlash session file
//!
//! Runs the flashing stages in order. A failed stage rewinds to the recovery
//! stage; only channel failures end the session early.

use super::channel::LineChannel;
use super::definitions::SessionConfig;
use super::image::Image;
use super::protocol::{Protocol, ProtocolError};
use super::sequence::{Stage, StageSequence};

/// Something worth reporting while a session runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    StageStarted {
        stage: Stage,
        attempt: u32,
    },
    StageSucceeded {
        stage: Stage,
    },
    StageFailed {
        stage: Stage,
        message: String,
    },
    LineMismatch {
        stage: Stage,
        line: usize,
        expected: String,
        actual: String,
    },
    Rewind {
        from: Stage,
        to: Stage,
        rewinds: u32,
    },
    Finished {
        success: bool,
        final_stage: Stage,
    },
}

/// Receiver of session events
pub trait EventSink {
    fn record(&mut self, event: &SessionEvent);
}

/// Collects events, handy for embedding and tests
impl EventSink for Vec<SessionEvent> {
    fn record(&mut self, event: &SessionEvent) {
        self.push(event.clone());
    }
}

/// Renders events through the `log` facade
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::StageStarted { stage, attempt } => {
                if *attempt > 1 {
                    log::info!("Stage {} (attempt {})", stage, attempt);
                } else {
                    log::info!("Stage {}", stage);
                }
            }
            SessionEvent::StageSucceeded { stage } => log::debug!("Stage {} done", stage),
            SessionEvent::StageFailed { stage, message } => {
                log::warn!("Stage {} failed: {}", stage, message)
            }
            SessionEvent::LineMismatch {
                stage,
                line,
                expected,
                actual,
            } => log::warn!(
                "{}: line {} mismatch, sent {:?}, got {:?}",
                stage,
                line,
                expected,
                actual
            ),
            SessionEvent::Rewind { from, to, rewinds } => {
                log::warn!("Rewinding from {} to {} (rewind {})", from, to, rewinds)
            }
            SessionEvent::Finished {
                success: true,
                final_stage,
            } => log::info!("Flashing complete after {}", final_stage),
            SessionEvent::Finished {
                success: false,
                final_stage,
            } => log::error!("Flashing gave up at {}", final_stage),
        }
    }
}

/// Mutable progress of one session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionState {
    /// Index into the stage sequence
    pub index: usize,
    /// Invocations of the current stage since it was last entered from its predecessor
    pub attempt: u32,
    pub rewinds: u32,
}

/// Outcome of a session that was not cut short by a channel failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionResult {
    pub success: bool,
    pub final_stage: Stage,
    pub rewinds: u32,
}

impl SessionResult {
    /// Position of [SessionResult::final_stage] in the reference sequence
    pub fn final_index(&self) -> usize {
        StageSequence::FLASH
            .index_of(self.final_stage)
            .unwrap_or_default()
    }
}

/// Flash *image* over *channel*
///
/// The channel is owned by the session and closed when it returns, whatever
/// the outcome. Setup stages are expected to be done, so the session starts
/// at the recovery stage.
pub fn run_session<C: LineChannel>(
    channel: C,
    image: &Image,
    config: &SessionConfig,
    sink: &mut dyn EventSink,
) -> Result<SessionResult, ProtocolError> {
    let sequence = StageSequence::FLASH;
    let mut protocol = Protocol::new(channel, config.timings);
    let mut state = SessionState {
        index: sequence.recovery_index(),
        attempt: 0,
        rewinds: 0,
    };

    loop {
        let stage = sequence
            .stage(state.index)
            .unwrap_or_else(|| sequence.recovery());
        state.attempt += 1;
        sink.record(&SessionEvent::StageStarted {
            stage,
            attempt: state.attempt,
        });

        match protocol.run_stage(stage, image) {
            Ok(()) => {
                sink.record(&SessionEvent::StageSucceeded { stage });
                match sequence.next_on_success(state.index) {
                    Some(next) => {
                        state.index = next;
                        state.attempt = 0;
                    }
                    None => return Ok(finish(sink, true, stage, state.rewinds)),
                }
            }
            Err(err) if err.is_fatal() => {
                sink.record(&SessionEvent::StageFailed {
                    stage,
                    message: err.to_string(),
                });
                return Err(err);
            }
            Err(err) => {
                if let ProtocolError::LineMismatch {
                    line,
                    expected,
                    actual,
                } = &err
                {
                    sink.record(&SessionEvent::LineMismatch {
                        stage,
                        line: *line,
                        expected: expected.clone(),
                        actual: actual.clone(),
                    });
                }
                sink.record(&SessionEvent::StageFailed {
                    stage,
                    message: err.to_string(),
                });

                if config
                    .max_rewinds
                    .map_or(false, |limit| state.rewinds >= limit)
                {
                    return Ok(finish(sink, false, stage, state.rewinds));
                }

                let next = sequence.next_on_failure(state.index);
                state.rewinds += 1;
                if next != state.index {
                    state.attempt = 0;
                }
                state.index = next;
                sink.record(&SessionEvent::Rewind {
                    from: stage,
                    to: sequence.stage(next).unwrap_or(stage),
                    rewinds: state.rewinds,
                });
            }
        }
    }
}

fn finish(
    sink: &mut dyn EventSink,
    success: bool,
    final_stage: Stage,
    rewinds: u32,
) -> SessionResult {
    sink.record(&SessionEvent::Finished {
        success,
        final_stage,
    });
    SessionResult {
        success,
        final_stage,
        rewinds,
    }
}
