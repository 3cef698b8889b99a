//! Newline-delimited JSON framing over async byte streams

use crate::error::ProtocolError;
use crate::messages::{Request, WorkerMessage};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

/// Serialize one frame to its wire form, newline terminator included.
///
/// `serde_json` never emits raw newlines inside a document, so the result
/// is always exactly one line.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(frame).map_err(ProtocolError::Encode)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line from the worker's stdout
pub fn decode_worker_message(line: &str) -> Result<WorkerMessage, ProtocolError> {
    serde_json::from_str(line).map_err(|source| ProtocolError::malformed(line, source))
}

/// Parse one line from the supervisor's side of the pipe
pub fn decode_request(line: &str) -> Result<Request, ProtocolError> {
    serde_json::from_str(line).map_err(|source| ProtocolError::malformed(line, source))
}

/// Reads newline-delimited frames from an async stream.
///
/// Bytes are buffered until a full line is available, so frames split
/// across arbitrary read boundaries are reassembled before parsing.
pub struct FrameReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            lines: BufReader::new(stream).lines(),
        }
    }

    /// Next raw line, without interpreting it as a frame.
    ///
    /// Used for the readiness marker, which precedes the JSON stream.
    /// Returns `None` at end of stream.
    pub async fn next_line(&mut self) -> Result<Option<String>, ProtocolError> {
        Ok(self.lines.next_line().await?)
    }

    /// Next frame from a worker's stdout, or `None` at end of stream
    pub async fn next_message(&mut self) -> Result<Option<WorkerMessage>, ProtocolError> {
        match self.lines.next_line().await? {
            Some(line) => Ok(Some(decode_worker_message(&line)?)),
            None => Ok(None),
        }
    }

    /// Next frame from a supervisor's output, or `None` at end of stream
    pub async fn next_request(&mut self) -> Result<Option<Request>, ProtocolError> {
        match self.lines.next_line().await? {
            Some(line) => Ok(Some(decode_request(&line)?)),
            None => Ok(None),
        }
    }
}

/// Writes frames to an async stream, one complete line per frame.
///
/// Each frame goes out as a single `write_all` followed by a flush, so a
/// frame is never left partially written between calls. Callers that share
/// a writer across tasks must still serialize access to it.
pub struct FrameWriter<W> {
    stream: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    pub async fn send<T: Serialize>(&mut self, frame: &T) -> Result<(), ProtocolError> {
        let line = encode(frame)?;
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Consume the writer and return the underlying stream
    pub fn into_inner(self) -> W {
        self.stream
    }
}
