//! ObFlash definitions file
//!
//! Wire commands, response markers and timing parameters of the bridge bootloader

use std::time::Duration;

/// Line terminator appended to every command
pub const LINE_TERMINATOR: &str = "\r\n";

// Commands
pub const CMD_HANDSHAKE: &str = "handshake";
pub const CMD_ERASE: &str = "erase";
pub const CMD_SET_FUSE: &str = "setfuse 18 249";
pub const CMD_RESET: &str = "mcureset";

// Command acknowledgements
pub const ACK_HANDSHAKE: &str = "handshake";
pub const ACK_ERASE: &str = "Erasing chip...";
pub const ACK_SET_FUSE: &str = "Set configuration byte...";
pub const ACK_RESET: &str = "MCU reset...";

// Asynchronous status markers
pub const MARKER_STATUS_OK: &str = "Status: 0";
pub const MARKER_CHIP_READ: &str = "Chip read: 0xA";
pub const MARKER_IDLE: &str = "Returning to idle state...";
pub const MARKER_ERASED: &str = "Chip erase successful";
pub const MARKER_FUSE_WRITTEN: &str = "Wrote configuration byte";

// Image transfer replies
pub const REPLY_WRITE_OK: &str = "Write successful";
pub const REPLY_WROTE_PREFIX: &str = "Wrote ";
pub const REPLY_WROTE_SUFFIX: &str = " bytes";

/// Lines that abort any pending wait immediately
pub const FATAL_MARKERS: [&str; 2] = [
    "Status: 2",
    "Can try command [signature] or [idle] then [handshake] to retry",
];

/// Serial defaults of the bridge
pub const DEFAULT_BAUD: usize = 115200;

/// Timing and retry parameters for one session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timings {
    /// Upper bound of a single line read
    pub read_timeout: Duration,
    /// Dispatcher read budget
    pub max_retries: u32,
    /// Pause after an unmatched dispatcher read
    pub retry_interval: Duration,
    /// Pause after transmitting a command
    pub write_delay: Duration,
    /// Command is re-sent every this many attempts
    pub resend_interval: u32,

    pub quiet: Duration,
    pub handshake: Duration,
    pub chip_read: Duration,
    pub idle: Duration,
    pub erase: Duration,
    pub fuse_status: Duration,
    pub fuse_write: Duration,
    pub transfer_settle: Duration,
    pub reset_settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            read_timeout: Duration::from_secs(1),
            max_retries: 20,
            retry_interval: Duration::from_millis(500),
            write_delay: Duration::from_millis(100),
            resend_interval: 5,

            quiet: Duration::from_secs(10),
            handshake: Duration::from_secs(30),
            chip_read: Duration::from_secs(5),
            idle: Duration::from_secs(5),
            erase: Duration::from_secs(10),
            fuse_status: Duration::from_secs(5),
            fuse_write: Duration::from_secs(5),
            transfer_settle: Duration::from_secs(1),
            reset_settle: Duration::from_secs(1),
        }
    }
}

/// Per-session configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub timings: Timings,
    /// Rewinds to the recovery stage allowed before giving up, `None` for no limit
    pub max_rewinds: Option<u32>,
}

impl SessionConfig {
    pub const DEFAULT_MAX_REWINDS: u32 = 5;
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            timings: Timings::default(),
            max_rewinds: Some(Self::DEFAULT_MAX_REWINDS),
        }
    }
}
