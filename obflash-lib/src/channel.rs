//! ObFlash channel file
//!
//! Line framing on top of the serial byte stream

use super::definitions::LINE_TERMINATOR;
use super::protocol::ProtocolError;
use serial::prelude::*;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// One received line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Line {
    /// Nothing arrived before the timeout, or the line was blank
    Empty,
    /// Line text without terminator and surrounding whitespace
    Text(String),
}

impl Line {
    /// Build a line from raw received bytes
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self::from_text(&String::from_utf8_lossy(raw))
    }

    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            Line::Empty
        } else {
            Line::Text(text.to_string())
        }
    }

    /// Line text, empty string for [Line::Empty]
    pub fn text(&self) -> &str {
        match self {
            Line::Empty => "",
            Line::Text(text) => text,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Line::Empty)
    }
}

/// Line oriented duplex channel to the bootloader
pub trait LineChannel {
    /// Send *text* followed by the protocol line terminator
    fn write_line(&mut self, text: &str) -> Result<(), ProtocolError>;

    /// Send *text* exactly as given
    fn write_raw(&mut self, text: &str) -> Result<(), ProtocolError>;

    /// Wait up to *timeout* for the next line
    fn read_line(&mut self, timeout: Duration) -> Result<Line, ProtocolError>;
}

/// Byte port with an adjustable read timeout
pub trait TimedPort: Read + Write {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl TimedPort for serial::SystemPort {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout).map_err(io::Error::from)
    }
}

/// Read chunk size
const CHUNK_LEN: usize = 64;

/// [LineChannel] over a serial port
pub struct SerialChannel<P: TimedPort> {
    port: P,
    pending: Vec<u8>,
}

impl<P: TimedPort> SerialChannel<P> {
    pub fn new(port: P) -> Self {
        SerialChannel {
            port,
            pending: Vec::new(),
        }
    }

    /// Give back the underlying port
    pub fn into_inner(self) -> P {
        self.port
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }
}

impl<P: TimedPort> LineChannel for SerialChannel<P> {
    fn write_line(&mut self, text: &str) -> Result<(), ProtocolError> {
        log::trace!(">> {}", text);
        let mut request = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        request.push_str(text);
        request.push_str(LINE_TERMINATOR);
        self.send(request.as_bytes())
    }

    fn write_raw(&mut self, text: &str) -> Result<(), ProtocolError> {
        log::trace!(">> {:?}", text);
        self.send(text.as_bytes())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Line, ProtocolError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; CHUNK_LEN];

        loop {
            // Deliver a buffered line first
            if let Some(end) = self.pending.iter().position(|&byte| byte == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=end).collect();
                let line = Line::from_bytes(&raw);
                log::trace!("<< {:?}", line.text());
                return Ok(line);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            self.port.set_read_timeout(deadline - now)?;
            match self.port.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => self.pending.extend_from_slice(&chunk[..count]),
                Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        // Timeout: hand out whatever partial line arrived
        let line = Line::from_bytes(&self.pending);
        self.pending.clear();
        Ok(line)
    }
}
