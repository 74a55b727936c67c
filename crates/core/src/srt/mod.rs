//! This module is responsible for SRT parsing and serialization.
//! It exposes the subtitle document model used by the rest of the engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Reasons a subtitle document cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("block {block}: expected a numeric index, found {line:?}")]
    InvalidIndex { block: usize, line: String },

    #[error("block {block}: missing timing line")]
    MissingTiming { block: usize },

    #[error("block {block}: malformed timing line {line:?}")]
    InvalidTiming { block: usize, line: String },

    #[error("block {block}: entry ends before it starts")]
    InvertedTiming { block: usize },
}

/// A single subtitle entry (index, time range, text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleEntry {
    /// Index as read from the source; [`format`] renumbers from 1.
    pub sequence: u32,
    pub start: Duration,
    pub end: Duration,
    /// Text lines joined with `\n`. May be empty.
    pub text: String,
}

impl SubtitleEntry {
    /// Whether this entry carries text worth sending to a translator.
    pub fn is_translatable(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// An ordered subtitle file. Entry order is display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtitleDocument {
    pub entries: Vec<SubtitleEntry>,
}

/// Summary numbers shown when previewing a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DocumentStats {
    pub entries: usize,
    pub duration: Duration,
    pub characters: usize,
}

impl SubtitleDocument {
    pub fn new(entries: Vec<SubtitleEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time between the start of the first entry and the end of the last one.
    pub fn total_duration(&self) -> Duration {
        match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) => last.end.saturating_sub(first.start),
            _ => Duration::ZERO,
        }
    }

    pub fn stats(&self) -> DocumentStats {
        DocumentStats {
            entries: self.entries.len(),
            duration: self.total_duration(),
            characters: self.entries.iter().map(|e| e.text.chars().count()).sum(),
        }
    }
}

/// Parse SRT text into a document.
/// Blocks are separated by blank lines and must hold an index line, a timing
/// line and zero or more text lines. CRLF endings and a leading BOM are accepted.
pub fn parse(input: &str) -> Result<SubtitleDocument, FormatError> {
    trace!("parse len={}", input.len());
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut entries = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    for line in input.lines() {
        if line.trim().is_empty() {
            if !block.is_empty() {
                entries.push(parse_block(entries.len() + 1, &block)?);
                block.clear();
            }
            continue;
        }
        block.push(line);
    }
    if !block.is_empty() {
        entries.push(parse_block(entries.len() + 1, &block)?);
    }
    Ok(SubtitleDocument { entries })
}

/// Turn the lines of one block into an entry. `number` is the 1-based block position.
fn parse_block(number: usize, lines: &[&str]) -> Result<SubtitleEntry, FormatError> {
    let index_line = lines[0].trim();
    let sequence: u32 = index_line.parse().map_err(|_| FormatError::InvalidIndex {
        block: number,
        line: index_line.to_string(),
    })?;
    let time_line = lines
        .get(1)
        .ok_or(FormatError::MissingTiming { block: number })?;
    let (start, end) = parse_times(time_line).ok_or_else(|| FormatError::InvalidTiming {
        block: number,
        line: time_line.to_string(),
    })?;
    if start > end {
        return Err(FormatError::InvertedTiming { block: number });
    }
    Ok(SubtitleEntry {
        sequence,
        start,
        end,
        text: lines[2..].join("\n"),
    })
}

/// Format a document back to SRT text.
/// Entries are renumbered `1..N` and every block, the last included, is
/// followed by a blank line.
pub fn format(doc: &SubtitleDocument) -> String {
    let mut out = String::new();
    for (i, entry) in doc.entries.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_time(entry.start),
            format_time(entry.end),
            entry.text
        ));
    }
    out
}

/// Parse a time range like `00:00:01,000 --> 00:00:02,000`.
fn parse_times(line: &str) -> Option<(Duration, Duration)> {
    let (start, end) = line.trim().split_once(" --> ")?;
    Some((parse_time(start.trim())?, parse_time(end.trim())?))
}

/// Parse `HH:MM:SS,mmm`. Each field must have exactly its padded width.
fn parse_time(t: &str) -> Option<Duration> {
    let (clock, millis) = t.split_once(',')?;
    let mut parts = clock.split(':');
    let h = field(parts.next()?, 2)?;
    let m = field(parts.next()?, 2)?;
    let s = field(parts.next()?, 2)?;
    if parts.next().is_some() || m >= 60 || s >= 60 {
        return None;
    }
    let ms = field(millis, 3)?;
    Some(Duration::from_millis(((h * 60 + m) * 60 + s) * 1000 + ms))
}

fn field(s: &str, width: usize) -> Option<u64> {
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Format a duration as `HH:MM:SS,mmm`, truncating below the millisecond.
fn format_time(d: Duration) -> String {
    let ms = d.as_millis();
    let h = ms / 3_600_000;
    let m = (ms % 3_600_000) / 60_000;
    let s = (ms % 60_000) / 1000;
    let ms = ms % 1000;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}
