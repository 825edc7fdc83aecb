//! Line transport over a worker's standard streams

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::{InboundMessage, OutboundMessage};

/// Reads newline-terminated lines from a worker's stdout.
///
/// `next_line` may be used as a `tokio::select!` branch: bytes read before a
/// cancellation stay buffered and the next call resumes the same line.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, or `None` at end of stream.
    ///
    /// A final line that lacks a newline is still returned.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, IpcError> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;

        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    /// Next parsed message, or `None` at end of stream.
    ///
    /// A malformed line is consumed and reported as [`IpcError::Protocol`];
    /// the reader stays usable. Any other error means the stream is gone.
    /// Cancel-safe like [`next_line`](Self::next_line).
    pub async fn next_message(&mut self) -> Result<Option<InboundMessage>, IpcError> {
        match self.next_line().await? {
            Some(line) => Ok(Some(InboundMessage::parse_bytes(&line)?)),
            None => Ok(None),
        }
    }
}

/// Writes protocol lines to a worker's stdin, flushing after each one.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encode and send a single message
    pub async fn send(&mut self, message: &OutboundMessage) -> Result<(), IpcError> {
        let line = message.encode()?;
        self.write_line(&line).await
    }

    /// Write an already encoded line followed by `\n`, then flush.
    pub async fn write_line(&mut self, line: &str) -> Result<(), IpcError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Close the underlying stream so the worker observes end of input.
    pub async fn close(mut self) -> Result<(), IpcError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
