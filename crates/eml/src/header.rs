//! Incremental header reader
//!
//! Yields unfolded header lines one at a time and stops at the blank line
//! that separates headers from the body. `\n` and `\r\n` terminators are
//! treated the same.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Reads the header section of a message without touching the body
pub struct HeaderReader<R> {
    reader: R,
    buf: Vec<u8>,
    /// Physical line read ahead while looking for continuations
    pending: Option<String>,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> HeaderReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            pending: None,
            done: false,
        }
    }

    /// Next logical header line with continuation lines folded in
    ///
    /// Returns `None` at the end of the header section (first blank line) or
    /// at end of input, and keeps returning `None` afterwards.
    pub async fn next_header(&mut self) -> io::Result<Option<String>> {
        if self.done {
            return Ok(None);
        }

        let mut current = match self.pending.take() {
            Some(line) => line,
            None => match self.read_line().await? {
                Some(line) => line,
                None => return self.finish(),
            },
        };

        if current.is_empty() {
            return self.finish();
        }

        loop {
            match self.read_line().await? {
                Some(next) if next.starts_with([' ', '\t']) => {
                    current.push(' ');
                    current.push_str(next.trim_start());
                }
                Some(next) => {
                    self.pending = Some(next);
                    return Ok(Some(current));
                }
                None => {
                    self.done = true;
                    return Ok(Some(current));
                }
            }
        }
    }

    /// Give back the underlying reader, positioned after the last line read
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn finish(&mut self) -> io::Result<Option<String>> {
        self.done = true;
        self.pending = None;
        Ok(None)
    }

    async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.buf);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}
