//! Line-oriented manifest of objects to delete.

use std::io;

use tokio::io::{AsyncBufReadExt, Lines};

use common::{ObjectRef, ObjectRefError};

use crate::backend::ObjectReader;

/// Classification of one manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLine {
    /// One of the leading rows skipped as header.
    Header,
    /// Empty or whitespace-only.
    Blank,
    Entry(Result<ObjectRef, ObjectRefError>),
}

/// Streams a manifest one line at a time, never holding it whole.
pub struct ManifestReader {
    lines: Lines<ObjectReader>,
    skip_header_rows: usize,
    line_number: usize,
}

impl ManifestReader {
    pub fn new(reader: ObjectReader, skip_header_rows: usize) -> Self {
        Self {
            lines: reader.lines(),
            skip_header_rows,
            line_number: 0,
        }
    }

    /// Next line with its 1-based line number, or `None` at end of input.
    pub async fn next_line(&mut self) -> io::Result<Option<(usize, ManifestLine)>> {
        let Some(line) = self.lines.next_line().await? else {
            return Ok(None);
        };
        self.line_number += 1;

        let parsed = if self.line_number <= self.skip_header_rows {
            ManifestLine::Header
        } else {
            parse_line(&line)
        };
        Ok(Some((self.line_number, parsed)))
    }
}

pub fn parse_line(line: &str) -> ManifestLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        ManifestLine::Blank
    } else {
        ManifestLine::Entry(ObjectRef::parse(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::object_ref::ObjectScheme;

    fn reader(contents: &'static str) -> ObjectReader {
        Box::pin(contents.as_bytes())
    }

    #[tokio::test]
    async fn test_classifies_lines() {
        let mut manifest = ManifestReader::new(
            reader("object\ngs://b/one\n\n  \r\ngs://b/two\r\nnot-a-ref\n"),
            1,
        );

        let mut lines = Vec::new();
        while let Some(line) = manifest.next_line().await.unwrap() {
            lines.push(line);
        }

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], (1, ManifestLine::Header));
        assert_eq!(
            lines[1],
            (
                2,
                ManifestLine::Entry(Ok(ObjectRef::new(ObjectScheme::Gcs, "b", "one")))
            )
        );
        assert_eq!(lines[2], (3, ManifestLine::Blank));
        assert_eq!(lines[3], (4, ManifestLine::Blank));
        assert_eq!(
            lines[4],
            (
                5,
                ManifestLine::Entry(Ok(ObjectRef::new(ObjectScheme::Gcs, "b", "two")))
            )
        );
        assert!(matches!(lines[5], (6, ManifestLine::Entry(Err(_)))));
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let mut manifest = ManifestReader::new(reader("gs://b/one"), 0);
        assert!(matches!(
            manifest.next_line().await.unwrap(),
            Some((1, ManifestLine::Entry(Ok(_))))
        ));
        assert!(manifest.next_line().await.unwrap().is_none());
    }
}
