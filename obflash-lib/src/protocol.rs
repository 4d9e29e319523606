//! ObFlash protocol file
//!
//! Basic logic of talking to the bridge bootloader: waiting for markers,
//! dispatching commands and running the individual flashing stages

use super::channel::{Line, LineChannel};
use super::definitions::*;
use super::image::Image;
use super::response::Response;
use super::sequence::{Stage, COMMANDS};
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Possible errors while using library
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial error: {0}")]
    Serial(#[from] serial::Error),
    #[error("Channel error: {0}")]
    Channel(#[from] io::Error),
    #[error("Expected {expected:?}, got {actual:?}")]
    Mismatch { expected: String, actual: String },
    #[error("Image line {line}: expected {expected:?}, got {actual:?}")]
    LineMismatch {
        line: usize,
        expected: String,
        actual: String,
    },
    #[error("Bootloader reported {0:?}")]
    Fault(String),
    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: String,
        timeout: Duration,
    },
    #[error("File access error: {path}: {source}")]
    FileAccessError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ProtocolError {
    /// Transport failures end the session, everything else is retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Serial(_)
                | ProtocolError::Channel(_)
                | ProtocolError::FileAccessError { .. }
        )
    }
}

// Current state
pub struct Protocol<C: LineChannel> {
    channel: C,
    timings: Timings,
}

impl<C: LineChannel> Protocol<C> {
    /// Create new protocol instance over an open channel
    pub fn new(channel: C, timings: Timings) -> Self {
        Protocol { channel, timings }
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Run one *stage* against the target
    pub fn run_stage(&mut self, stage: Stage, image: &Image) -> Result<(), ProtocolError> {
        match stage {
            Stage::SelectPort | Stage::OpenChannel | Stage::SelectImage => {
                log::debug!("Stage {} is completed by the caller", stage);
                Ok(())
            }
            Stage::AwaitQuiet => self.await_quiet(),
            Stage::Handshake => self.handshake(),
            Stage::ChipConnect => self.chip_connect(),
            Stage::Erase => self.erase(),
            Stage::SetFuse => self.set_fuse(),
            Stage::TransferImage => self.transfer_image(image).map(|_| ()),
            Stage::Reset => self.reset(),
        }
    }

    /// Wait until the target stops talking
    pub fn await_quiet(&mut self) -> Result<(), ProtocolError> {
        self.await_marker(None, self.timings.quiet)
    }

    /// Negotiate with the bridge
    pub fn handshake(&mut self) -> Result<(), ProtocolError> {
        self.send_stage_command(Stage::Handshake)?;
        self.await_marker(Some(MARKER_STATUS_OK), self.timings.handshake)
    }

    /// Wait for the bridge to read the chip type and go idle
    pub fn chip_connect(&mut self) -> Result<(), ProtocolError> {
        self.await_marker(Some(MARKER_CHIP_READ), self.timings.chip_read)?;
        self.await_marker(Some(MARKER_IDLE), self.timings.idle)
    }

    /// Erase MCU flash
    pub fn erase(&mut self) -> Result<(), ProtocolError> {
        self.send_stage_command(Stage::Erase)?;
        self.await_marker(Some(MARKER_ERASED), self.timings.erase)?;

        log::info!("Flash erased");
        Ok(())
    }

    /// Write the configuration fuse
    pub fn set_fuse(&mut self) -> Result<(), ProtocolError> {
        self.send_stage_command(Stage::SetFuse)?;
        self.await_marker(Some(MARKER_STATUS_OK), self.timings.fuse_status)?;
        self.await_marker(Some(MARKER_FUSE_WRITTEN), self.timings.fuse_write)
    }

    /// Reset MCU into the flashed firmware
    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        self.send_stage_command(Stage::Reset)?;
        self.await_marker(None, self.timings.reset_settle)
    }

    /// Stream *image* line by line, checking every echo
    ///
    /// Returns the byte count the target confirmed writing.
    pub fn transfer_image(&mut self, image: &Image) -> Result<u64, ProtocolError> {
        self.await_marker(None, self.timings.transfer_settle)?;

        let total_lines = image.len();
        let mut total_bytes: u64 = 0;

        for (index, line) in image.lines().enumerate() {
            let line_no = index + 1;
            let sent = line.trim();

            self.channel.write_raw(line)?;

            // Echo comparison ignores surrounding whitespace on both sides
            let echo = self.read_reply()?;
            if echo.text() != sent {
                return Err(ProtocolError::LineMismatch {
                    line: line_no,
                    expected: sent.to_string(),
                    actual: echo.text().to_string(),
                });
            }

            // Target stays silent after the final line
            if line_no == total_lines {
                break;
            }

            let status = self.read_reply()?;
            if Response::parse(&status) != Response::WriteAck {
                return Err(ProtocolError::LineMismatch {
                    line: line_no,
                    expected: REPLY_WRITE_OK.to_string(),
                    actual: status.text().to_string(),
                });
            }

            let progress = self.read_reply()?;
            match Response::parse(&progress) {
                Response::Progress { bytes } => {
                    total_bytes += bytes;
                    log::debug!("Line {}/{}: wrote {} bytes", line_no, total_lines, bytes);
                }
                _ => {
                    return Err(ProtocolError::LineMismatch {
                        line: line_no,
                        expected: format!("{}<N>{}", REPLY_WROTE_PREFIX, REPLY_WROTE_SUFFIX),
                        actual: progress.text().to_string(),
                    });
                }
            }
        }

        log::info!(
            "Transferred {} lines, {} bytes confirmed",
            total_lines,
            total_bytes
        );
        Ok(total_bytes)
    }

    /// Poll lines until one contains *marker*
    ///
    /// Without a marker, succeeds on the first quiet read instead. Fatal
    /// markers end a marker wait immediately; chatter is skipped.
    pub fn await_marker(
        &mut self,
        marker: Option<&str>,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        let started = Instant::now();

        loop {
            let elapsed = started.elapsed();
            if elapsed > timeout {
                return Err(ProtocolError::Timeout {
                    waiting_for: match marker {
                        Some(marker) => format!("{:?}", marker),
                        None => "quiet channel".to_string(),
                    },
                    timeout,
                });
            }

            let wait = self.timings.read_timeout.min(timeout - elapsed);
            let line = self.channel.read_line(wait)?;

            match (marker, Response::parse(&line)) {
                (None, Response::Quiet) => return Ok(()),
                (Some(_), Response::Fault(fault)) => {
                    return Err(ProtocolError::Fault(fault.to_string()));
                }
                (Some(marker), _) if line.text().contains(marker) => {
                    log::debug!("{}", line.text());
                    return Ok(());
                }
                (_, Response::Quiet) => {}
                (_, _) => log::trace!("Skipping {:?}", line.text()),
            }
        }
    }

    /// Send *command* until the target answers exactly *expected*
    ///
    /// Every attempt consumes one line; the command itself is only re-sent
    /// every `resend_interval` attempts.
    pub fn send_until_ack(&mut self, command: &str, expected: &str) -> Result<(), ProtocolError> {
        let resend_interval = self.timings.resend_interval.max(1);
        let mut last = Line::Empty;

        for attempt in 0..self.timings.max_retries {
            if attempt % resend_interval == 0 {
                self.channel.write_line(command)?;
                thread::sleep(self.timings.write_delay);
            }

            let reply = self.read_reply()?;
            if reply.text() == expected {
                return Ok(());
            }

            log::debug!(
                "{}: attempt {}/{} got {:?}",
                command,
                attempt + 1,
                self.timings.max_retries,
                reply.text()
            );
            last = reply;
            thread::sleep(self.timings.retry_interval);
        }

        Err(ProtocolError::Mismatch {
            expected: expected.to_string(),
            actual: last.text().to_string(),
        })
    }

    fn send_stage_command(&mut self, stage: Stage) -> Result<(), ProtocolError> {
        let command = COMMANDS[&stage];
        self.send_until_ack(command.request, command.ack)
    }

    fn read_reply(&mut self) -> Result<Line, ProtocolError> {
        self.channel.read_line(self.timings.read_timeout)
    }
}
