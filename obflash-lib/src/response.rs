//! ObFlash response file
//!
//! Classification of bootloader output lines

use super::channel::Line;
use super::definitions::{FATAL_MARKERS, REPLY_WRITE_OK, REPLY_WROTE_PREFIX, REPLY_WROTE_SUFFIX};

/// Recognized class of a received line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Response<'a> {
    /// No line within the read timeout
    Quiet,
    /// Bootloader gave up on the current operation
    Fault(&'a str),
    /// Image line stored
    WriteAck,
    /// Image line written to flash
    Progress { bytes: u64 },
    /// Anything else: echoes, diagnostics, status lines
    Chatter(&'a str),
}

impl<'a> Response<'a> {
    pub fn parse(line: &'a Line) -> Self {
        let text = match line {
            Line::Empty => return Response::Quiet,
            Line::Text(text) => text.as_str(),
        };

        if FATAL_MARKERS.contains(&text) {
            return Response::Fault(text);
        }

        if text == REPLY_WRITE_OK {
            return Response::WriteAck;
        }

        if let Some(bytes) = parse_progress(text) {
            return Response::Progress { bytes };
        }

        Response::Chatter(text)
    }
}

/// Match `Wrote <N> bytes` at the start of *text*
fn parse_progress(text: &str) -> Option<u64> {
    let rest = text.strip_prefix(REPLY_WROTE_PREFIX)?;
    let digits_len = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_len == 0 {
        return None;
    }

    let (digits, tail) = rest.split_at(digits_len);
    if !tail.starts_with(REPLY_WROTE_SUFFIX) {
        return None;
    }

    digits.parse().ok()
}
