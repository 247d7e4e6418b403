use futures::Stream;

use super::ByteLineReader;
use crate::error::Result;

/// Reads a newline-delimited-JSON body: one complete JSON value per
/// non-blank line. Tolerates the bracketed-array framing some providers wrap
/// NDJSON in (`[`, `,`-prefixed continuation lines, trailing `]`) by
/// stripping the array punctuation before parsing each line.
pub struct NdjsonReader<S> {
    lines: ByteLineReader<S>,
}

impl<S> NdjsonReader<S>
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self { lines: ByteLineReader::new(inner) }
    }

    pub async fn next_value(&mut self) -> Result<Option<serde_json::Value>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let trimmed = line.trim();
            let trimmed = trimmed.trim_start_matches(',').trim();
            let trimmed = trimmed.strip_prefix('[').unwrap_or(trimmed);
            let trimmed = trimmed.strip_suffix(']').unwrap_or(trimmed);
            let trimmed = trimmed.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value = serde_json::from_str(trimmed)?;
            return Ok(Some(value));
        }
    }
}
