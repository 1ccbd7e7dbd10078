//! Program image format for the Morava-32.
//!
//! The assembler/linker pipeline hands the emulator an image: one or more
//! `(base address, bytes)` segments plus an entry address. The on-disk form
//! is a simple text format:
//!
//! - `entry <hex address>` designates the entry point (at most once)
//! - `segment <hex address>` starts a segment at that base
//! - other lines are whitespace-separated hex bytes appended to the
//!   current segment
//! - lines starting with `;` are comments; blank lines are ignored

use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// One loadable segment of a program image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSegment {
    /// Base address the bytes are mapped at.
    pub base: u32,
    /// Raw segment content.
    pub bytes: Vec<u8>,
}

/// A loaded program image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Initial program counter.
    pub entry: u32,
    /// Segments in file order; the memory loader resolves overlaps.
    pub segments: Vec<ImageSegment>,
}

impl Image {
    /// Create an empty image with entry 0.
    pub fn new() -> Self {
        Self { entry: 0, segments: Vec::new() }
    }

    /// Total number of content bytes across all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.bytes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.bytes.is_empty())
    }

    /// Parse the text format.
    pub fn parse(text: &str) -> Result<Self, ImageError> {
        let mut image = Image::new();
        let mut saw_entry = false;

        for (line_num, line) in text.lines().enumerate() {
            let line_num = line_num + 1;
            let trimmed = match line.split_once(';') {
                Some((before, _)) => before.trim(),
                None => line.trim(),
            };
            if trimmed.is_empty() {
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix("entry") {
                if saw_entry {
                    return Err(ImageError::Parse {
                        line: line_num,
                        message: "duplicate entry directive".into(),
                    });
                }
                image.entry = parse_addr(rest.trim(), line_num)?;
                saw_entry = true;
            } else if let Some(rest) = trimmed.strip_prefix("segment") {
                image.segments.push(ImageSegment {
                    base: parse_addr(rest.trim(), line_num)?,
                    bytes: Vec::new(),
                });
            } else {
                let segment = image.segments.last_mut().ok_or_else(|| ImageError::Parse {
                    line: line_num,
                    message: "byte data before any segment directive".into(),
                })?;
                for token in trimmed.split_whitespace() {
                    let byte = u8::from_str_radix(token, 16).map_err(|_| ImageError::Parse {
                        line: line_num,
                        message: format!("invalid hex byte `{token}`"),
                    })?;
                    segment.bytes.push(byte);
                }
            }
        }

        Ok(image)
    }

    /// Render back into the text format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("; morava program image\n");
        out.push_str(&format!("entry {:08x}\n", self.entry));
        for segment in &self.segments {
            out.push_str(&format!("segment {:08x}\n", segment.base));
            for chunk in segment.bytes.chunks(16) {
                let line: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
                out.push_str(&line.join(" "));
                out.push('\n');
            }
        }
        out
    }
}

impl Default for Image {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_addr(token: &str, line: usize) -> Result<u32, ImageError> {
    let token = token.strip_prefix("0x").unwrap_or(token);
    u32::from_str_radix(token, 16).map_err(|_| ImageError::Parse {
        line,
        message: format!("invalid address `{token}`"),
    })
}

/// Load an image file from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Image, ImageError> {
    let text = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ImageError::Io(e.to_string()))?;
    Image::parse(&text)
}

/// Save an image file to disk.
pub fn save_image<P: AsRef<Path>>(path: P, image: &Image) -> Result<(), ImageError> {
    let mut file = std::fs::File::create(path.as_ref())
        .map_err(|e| ImageError::Io(e.to_string()))?;
    file.write_all(image.render().as_bytes())
        .map_err(|e| ImageError::Io(e.to_string()))
}

/// Errors that can occur while loading or saving an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let image = Image::parse(
            "; comment\n\
             entry 40000000\n\
             segment 40000000\n\
             00 01 02 03\n\
             ff fe\n\
             segment 0000a000 ; data\n\
             aa bb\n",
        )
        .unwrap();

        assert_eq!(image.entry, 0x4000_0000);
        assert_eq!(image.segments.len(), 2);
        assert_eq!(image.segments[0].bytes, vec![0, 1, 2, 3, 0xff, 0xfe]);
        assert_eq!(image.segments[1].base, 0xa000);
        assert_eq!(image.segments[1].bytes, vec![0xaa, 0xbb]);
        assert_eq!(image.len(), 8);
    }

    #[test]
    fn test_render_parse_roundtrip() {
        let image = Image {
            entry: 0x1000,
            segments: vec![
                ImageSegment { base: 0x1000, bytes: (0..40).collect() },
                ImageSegment { base: 0xFFFF_0000, bytes: vec![1, 2, 3] },
            ],
        };
        assert_eq!(Image::parse(&image.render()).unwrap(), image);
    }

    #[test]
    fn test_bytes_before_segment_rejected() {
        let err = Image::parse("entry 0\nde ad\n").unwrap_err();
        assert!(matches!(err, ImageError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_bad_hex_rejected() {
        let err = Image::parse("segment 0\nzz\n").unwrap_err();
        assert!(matches!(err, ImageError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let err = Image::parse("entry 0\nentry 4\n").unwrap_err();
        assert!(matches!(err, ImageError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_0x_prefix_accepted() {
        let image = Image::parse("entry 0x2000\nsegment 0x2000\n00\n").unwrap();
        assert_eq!(image.entry, 0x2000);
        assert_eq!(image.segments[0].base, 0x2000);
    }
}
