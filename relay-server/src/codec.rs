//! Line framing for the relay's TCP byte stream.
//!
//! Each message is one line ending in `\n` (a preceding `\r` is dropped).
//! A line longer than the configured limit is discarded up to its
//! terminator instead of being buffered, so one client cannot grow the
//! receive buffer without bound.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// One decoded unit of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// A line over the limit was dropped; carries the number of bytes skipped.
    Oversized(usize),
}

/// Failure while reading from or writing to a client socket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer went away: reset, aborted, broken pipe or similar.
    #[error("connection lost: {0}")]
    Disconnected(#[source] io::Error),
    #[error("i/o error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => TransportError::Disconnected(e),
            _ => TransportError::Io(e),
        }
    }
}

pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_len: usize,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_len,
            buf: Vec::with_capacity(max_len.min(8192)),
        }
    }

    /// Read the next frame. `Ok(None)` means the peer closed the stream.
    /// A final line without a terminator is still returned as a line.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        self.buf.clear();
        // Room for the content plus "\r\n".
        let limit = (self.max_len as u64).saturating_add(2);
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }

        if self.buf.last() != Some(&b'\n') {
            if n as u64 >= limit {
                let skipped = n + self.skip_line().await?;
                return Ok(Some(Frame::Oversized(skipped)));
            }
            // EOF mid-line.
            if strip_terminator(&self.buf).len() > self.max_len {
                return Ok(Some(Frame::Oversized(n)));
            }
            return Ok(Some(self.decode()));
        }

        let content = strip_terminator(&self.buf);
        if content.len() > self.max_len {
            return Ok(Some(Frame::Oversized(n)));
        }
        Ok(Some(self.decode()))
    }

    fn decode(&self) -> Frame {
        let content = strip_terminator(&self.buf);
        Frame::Line(String::from_utf8_lossy(content).into_owned())
    }

    /// Discard input through the next `\n` (or EOF). Returns bytes skipped.
    async fn skip_line(&mut self) -> Result<usize, TransportError> {
        let mut skipped = 0;
        loop {
            let (consumed, done) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    return Ok(skipped);
                }
                match available.iter().position(|&b| b == b'\n') {
                    Some(pos) => (pos + 1, true),
                    None => (available.len(), false),
                }
            };
            self.reader.consume(consumed);
            skipped += consumed;
            if done {
                return Ok(skipped);
            }
        }
    }
}

fn strip_terminator(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

/// Write one outbound line followed by `\r\n`. Does not flush.
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), TransportError> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    Ok(())
}
