use std::time::Duration;

use courier_common::{error::SessionError, outgoing};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::reply::Reply;

const READ_CHUNK: usize = 4096;

/// Result of reading one line from the client
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Line {
    /// A line including its terminator. The final unterminated fragment
    /// before end of stream is also returned this way.
    Complete(Vec<u8>),
    TooLong,
    Eof,
}

/// Buffered line IO with per-operation timeouts
pub(crate) struct Connection<Stream> {
    stream: Stream,
    buffer: Vec<u8>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    pub(crate) const fn new(stream: Stream, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            read_timeout,
            write_timeout,
        }
    }

    async fn fill(&mut self) -> Result<usize, SessionError> {
        let mut chunk = [0; READ_CHUNK];
        let read = tokio::time::timeout(self.read_timeout, self.stream.read(&mut chunk))
            .await
            .map_err(|_| SessionError::Timeout(self.read_timeout.as_secs()))??;

        self.buffer.extend_from_slice(&chunk[..read]);
        Ok(read)
    }

    /// Reads up to and including the next `\n`, buffering at most `limit` bytes
    pub(crate) async fn read_line(&mut self, limit: usize) -> Result<Line, SessionError> {
        loop {
            if let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
                if end >= limit {
                    return Ok(Line::TooLong);
                }
                return Ok(Line::Complete(self.buffer.drain(..=end).collect()));
            }

            if self.buffer.len() >= limit {
                return Ok(Line::TooLong);
            }

            if self.fill().await? == 0 {
                return Ok(if self.buffer.is_empty() {
                    Line::Eof
                } else {
                    Line::Complete(std::mem::take(&mut self.buffer))
                });
            }
        }
    }

    /// Reads a message body up to the lone `.` line, removing dot-stuffing.
    ///
    /// Fails with [`SessionError::MessageTooLarge`] as soon as the body would
    /// exceed `max_size`, without buffering the rest.
    pub(crate) async fn read_body(&mut self, max_size: usize) -> Result<Vec<u8>, SessionError> {
        let mut body = Vec::new();

        loop {
            // The terminator and one stuffed dot may ride on top of the limit
            let line = match self.read_line(max_size.saturating_add(3)).await? {
                Line::Complete(line) => line,
                Line::TooLong => return Err(SessionError::MessageTooLarge(max_size)),
                Line::Eof => return Err(SessionError::Cancelled),
            };

            let content = line
                .strip_suffix(b"\n")
                .map_or(line.as_slice(), |content| {
                    content.strip_suffix(b"\r").unwrap_or(content)
                });
            if content == b"." {
                return Ok(body);
            }

            let unstuffed = line.strip_prefix(b".").unwrap_or(&line);
            if body.len().saturating_add(unstuffed.len()) > max_size {
                return Err(SessionError::MessageTooLarge(max_size));
            }
            body.extend_from_slice(unstuffed);
        }
    }

    pub(crate) async fn send(&mut self, reply: &Reply) -> Result<(), SessionError> {
        let mut wire = String::new();
        for line in reply.render() {
            outgoing!("{line}");
            wire.push_str(&line);
            wire.push_str("\r\n");
        }

        tokio::time::timeout(self.write_timeout, async {
            self.stream.write_all(wire.as_bytes()).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| SessionError::Timeout(self.write_timeout.as_secs()))??;

        Ok(())
    }
}
