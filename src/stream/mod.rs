pub mod ndjson;
pub mod sse;

use futures::{Stream, StreamExt};

use crate::error::{AnalysisError, Result};

/// Buffers a byte stream and hands back one logical line at a time. Used
/// beneath both the SSE and NDJSON framings so each only has to worry about
/// its own event boundaries.
pub struct ByteLineReader<S> {
    inner: S,
    buffer: Vec<u8>,
    max_buffer: usize,
    exhausted: bool,
}

const DEFAULT_MAX_BUFFER: usize = 1024 * 1024;

impl<S> ByteLineReader<S>
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self::with_max_buffer(inner, DEFAULT_MAX_BUFFER)
    }

    pub fn with_max_buffer(inner: S, max_buffer: usize) -> Self {
        Self { inner, buffer: Vec::new(), max_buffer, exhausted: false }
    }

    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.exhausted {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buffer);
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => {
                    if self.buffer.len() + chunk.len() > self.max_buffer {
                        return Err(AnalysisError::Stream("line exceeded maximum buffer size".to_string()));
                    }
                    self.buffer.extend_from_slice(&chunk);
                }
                Some(Err(source)) => return Err(AnalysisError::Transport { attempts: 1, source }),
                None => self.exhausted = true,
            }
        }
    }
}
