use futures::Stream;

use super::ByteLineReader;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Reads a server-sent-events body, joining consecutive `data:` lines with a
/// newline and emitting one event per blank-line-terminated block. A data
/// payload of exactly `[DONE]` is reported as `SseEvent::Done` rather than as
/// data, matching the sentinel several providers use to end the stream.
pub struct SseReader<S> {
    lines: ByteLineReader<S>,
    data: Vec<String>,
}

impl<S> SseReader<S>
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self { lines: ByteLineReader::new(inner), data: Vec::new() }
    }

    pub async fn next_event(&mut self) -> Result<Option<SseEvent>> {
        loop {
            match self.lines.next_line().await? {
                None => {
                    return Ok(self.flush());
                }
                Some(line) if line.is_empty() => {
                    if let Some(event) = self.flush() {
                        return Ok(Some(event));
                    }
                }
                Some(line) => {
                    if let Some(rest) = line.strip_prefix("data:") {
                        let rest = rest.strip_prefix(' ').unwrap_or(rest);
                        self.data.push(rest.to_string());
                    }
                    // `event:`/`id:`/`retry:` lines are not used by any
                    // provider this crate speaks to and are ignored.
                }
            }
        }
    }

    fn flush(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            return None;
        }
        let joined = self.data.join("\n");
        self.data.clear();
        if joined == "[DONE]" {
            Some(SseEvent::Done)
        } else {
            Some(SseEvent::Data(joined))
        }
    }
}
