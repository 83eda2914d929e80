//! Read-ahead buffer with put-back over a byte stream.
//!
//! The frame scanners read a few bytes at a time and, when a candidate frame
//! turns out to be invalid, hand the unconsumed bytes back so the next scan
//! starts from them instead of from fresh transport data.

use std::io;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Size of a single refill from the underlying stream.
pub const READ_CHUNK: usize = 1024;

/// Default time a refill waits for the stream before giving up.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Buffered reader with put-back support.
#[derive(Debug)]
pub struct TransportBuffer<R> {
    inner: R,
    buffer: BytesMut,
    read_timeout: Duration,
}

impl<R: AsyncRead + Unpin> TransportBuffer<R> {
    /// Creates a buffer over `inner` with the default read timeout.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self::with_timeout(inner, DEFAULT_READ_TIMEOUT)
    }

    /// Creates a buffer over `inner` with the given read timeout.
    #[must_use]
    pub fn with_timeout(inner: R, read_timeout: Duration) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            read_timeout,
        }
    }

    /// Reads up to `max` bytes.
    ///
    /// Buffered bytes are served first. The stream is only touched when the
    /// buffer is empty, and then for at most one read timeout: an empty
    /// result means the stream had nothing to offer in time.
    pub async fn read(&mut self, max: usize) -> Result<Bytes> {
        if max == 0 {
            return Ok(Bytes::new());
        }
        if self.buffer.is_empty() && !self.refill().await? {
            return Ok(Bytes::new());
        }
        let n = max.min(self.buffer.len());
        Ok(self.buffer.split_to(n).freeze())
    }

    /// Reads until `n` bytes are collected or a read comes back empty.
    ///
    /// The result is shorter than `n` only when the stream timed out.
    pub async fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let chunk = self.read(n - out.len()).await?;
            if chunk.is_empty() {
                break;
            }
            out.put_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Reads a single byte, or `None` on timeout.
    pub async fn read_byte(&mut self) -> Result<Option<u8>> {
        let chunk = self.read(1).await?;
        Ok(chunk.first().copied())
    }

    /// Pushes bytes back in front of everything still buffered.
    ///
    /// The next [`read`](Self::read) returns them, in order, before any
    /// other data.
    pub fn put_back(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut merged = BytesMut::with_capacity(bytes.len() + self.buffer.len());
        merged.put_slice(bytes);
        merged.put_slice(&self.buffer);
        self.buffer = merged;
        tracing::trace!("put back {} bytes, {} buffered", bytes.len(), self.buffer.len());
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Returns the configured read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Refills the buffer from the stream. Returns false on timeout.
    async fn refill(&mut self) -> Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        let read = tokio::time::timeout(self.read_timeout, self.inner.read(&mut chunk)).await;
        match read {
            Err(_elapsed) => Ok(false),
            Ok(Ok(0)) => {
                tracing::debug!("transport closed");
                Err(Error::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "transport closed",
                )))
            }
            Ok(Ok(n)) => {
                tracing::trace!("received {} bytes", n);
                self.buffer.put_slice(&chunk[..n]);
                Ok(true)
            }
            Ok(Err(e))
                if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) =>
            {
                Ok(false)
            }
            Ok(Err(e)) => {
                tracing::error!("transport read error: {}", e);
                Err(Error::Transport(e))
            }
        }
    }
}
