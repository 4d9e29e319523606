//! ObFlash image file
//!
//! Firmware image as an ordered list of opaque text lines

use super::protocol::ProtocolError;
use std::fs;
use std::path::Path;

/// Firmware image, sent to the target one line at a time
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Image {
    lines: Vec<String>,
}

impl Image {
    /// Build an image from already split lines, kept verbatim
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Image {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Split *text* into lines, each keeping its own terminator
    pub fn parse(text: &str) -> Self {
        Self::from_lines(text.split_inclusive('\n'))
    }

    /// Load the image stored at *path*
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).map_err(|source| ProtocolError::FileAccessError {
                path: path.to_path_buf(),
                source,
            })?;

        let image = Self::parse(&text);
        log::info!(
            "Firmware image: {} lines, {} bytes",
            image.len(),
            text.len()
        );
        Ok(image)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}
