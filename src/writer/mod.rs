//! Wrapped response writer
//!
//! [`ResponseWriter`] decorates a [`ResponseStream`] and defers the status
//! line and headers until the first body byte or an explicit flush. The
//! header transmission happens at most once per response.
//!
//! ## Streams
//!
//! - [`ChannelStream`] - production stream feeding an axum response body
//! - [`MemoryStream`] - in-memory recording, used by ad-hoc contexts and tests
//! - [`DetachedStream`] - sink for contexts copied out of a request

mod channel;
mod memory;

pub use channel::{ChannelReceiver, ChannelStream, ResponseHead, body_stream};
pub use memory::{MemoryStream, Recording};

use axum::http::{HeaderMap, StatusCode};
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("the response stream doesn't support {0}")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A raw, bidirectional connection taken over from the HTTP server.
pub trait RawConnection: io::Read + io::Write + Send {}

impl<T: io::Read + io::Write + Send> RawConnection for T {}

/// Reports whether the client went away.
#[derive(Clone)]
pub struct CloseSignal(Arc<dyn Fn() -> bool + Send + Sync>);

impl CloseSignal {
    pub fn new(is_closed: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(is_closed))
    }

    pub fn is_closed(&self) -> bool {
        (self.0)()
    }
}

impl fmt::Debug for CloseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseSignal")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Minimal writable response contract plus optional capabilities.
///
/// `flush`, `hijack` and `close_notify` have defaults for streams that do not
/// support them: flushing is a no-op, the other two report
/// [`WriterError::Unsupported`].
pub trait ResponseStream: Send {
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Transmit the status line and the current headers.
    fn send_head(&mut self, status: StatusCode) -> io::Result<()>;

    fn write_body(&mut self, data: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn hijack(&mut self) -> Result<Box<dyn RawConnection>, WriterError> {
        Err(WriterError::Unsupported("connection hijacking"))
    }

    fn close_notify(&self) -> Result<CloseSignal, WriterError> {
        Err(WriterError::Unsupported("close notification"))
    }
}

/// Sink used by detached contexts. Everything written is discarded.
#[derive(Debug, Default)]
pub struct DetachedStream {
    headers: HeaderMap,
}

impl ResponseStream for DetachedStream {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn send_head(&mut self, status: StatusCode) -> io::Result<()> {
        debug!(%status, "Detached response head discarded");
        Ok(())
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<usize> {
        Ok(data.len())
    }
}

/// Response writer with lazy, exactly-once header transmission.
pub struct ResponseWriter {
    stream: Box<dyn ResponseStream>,
    status: StatusCode,
    /// `None` until the head has been transmitted.
    size: Option<usize>,
}

impl ResponseWriter {
    pub fn new(stream: impl ResponseStream + 'static) -> Self {
        Self::from_boxed(Box::new(stream))
    }

    pub fn from_boxed(stream: Box<dyn ResponseStream>) -> Self {
        Self {
            stream,
            status: StatusCode::OK,
            size: None,
        }
    }

    pub fn detached() -> Self {
        Self::new(DetachedStream::default())
    }

    /// Writer for a copied context: keeps the recorded status and written
    /// state, drops the underlying stream.
    pub(crate) fn detached_from(other: &ResponseWriter) -> Self {
        Self {
            stream: Box::new(DetachedStream::default()),
            status: other.status,
            size: other.size,
        }
    }

    pub(crate) fn reset(&mut self, stream: Box<dyn ResponseStream>) {
        self.stream = stream;
        self.status = StatusCode::OK;
        self.size = None;
    }

    pub fn headers(&self) -> &HeaderMap {
        self.stream.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.stream.headers_mut()
    }

    /// Record the status to send. The last call before transmission wins.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.written() {
            warn!(
                %status,
                committed = %self.status,
                "Headers were already written"
            );
        }
        self.status = status;
    }

    /// Transmit the recorded status and headers unless already done.
    pub fn write_header_now(&mut self) -> io::Result<()> {
        if self.size.is_none() {
            self.size = Some(0);
            self.stream.send_head(self.status)?;
        }
        Ok(())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn written(&self) -> bool {
        self.size.is_some()
    }

    /// Body bytes written so far.
    pub fn size(&self) -> usize {
        self.size.unwrap_or(0)
    }

    pub fn hijack(&mut self) -> Result<Box<dyn RawConnection>, WriterError> {
        self.stream.hijack()
    }

    pub fn close_notify(&self) -> Result<CloseSignal, WriterError> {
        self.stream.close_notify()
    }
}

impl io::Write for ResponseWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write_header_now()?;
        let n = self.stream.write_body(data)?;
        self.size = Some(self.size() + n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.write_header_now()?;
        self.stream.flush()
    }
}

impl fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("status", &self.status)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_write_header_now_is_idempotent() {
        let stream = MemoryStream::new();
        let mut writer = ResponseWriter::new(stream.clone());

        assert!(!writer.written());
        for _ in 0..5 {
            writer.write_header_now().unwrap();
            assert!(writer.written());
        }

        let recording = stream.recording();
        assert_eq!(recording.head_count, 1);
        assert_eq!(recording.status, Some(StatusCode::OK));
        assert_eq!(writer.size(), 0);
    }

    #[test]
    fn test_last_status_before_transmission_wins() {
        let stream = MemoryStream::new();
        let mut writer = ResponseWriter::new(stream.clone());

        writer.write_header(StatusCode::CREATED);
        writer.write_header(StatusCode::ACCEPTED);
        writer.write_header_now().unwrap();

        // Rewriting after transmission only logs a warning
        writer.write_header(StatusCode::NOT_FOUND);
        writer.write_header_now().unwrap();

        let recording = stream.recording();
        assert_eq!(recording.status, Some(StatusCode::ACCEPTED));
        assert_eq!(recording.head_count, 1);
        assert_eq!(writer.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_write_forces_head_and_counts_bytes() {
        let stream = MemoryStream::new();
        let mut writer = ResponseWriter::new(stream.clone());

        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();

        let recording = stream.recording();
        assert_eq!(recording.head_count, 1);
        assert_eq!(recording.body, b"hello world");
        assert_eq!(writer.size(), 11);
    }

    #[test]
    fn test_flush_commits_headers() {
        let stream = MemoryStream::new();
        let mut writer = ResponseWriter::new(stream.clone());

        writer.write_header(StatusCode::NO_CONTENT);
        writer.flush().unwrap();

        let recording = stream.recording();
        assert_eq!(recording.status, Some(StatusCode::NO_CONTENT));
        assert_eq!(recording.flush_count, 1);
        assert!(writer.written());
    }

    #[test]
    fn test_unsupported_capabilities() {
        let mut writer = ResponseWriter::detached();
        assert!(matches!(
            writer.hijack(),
            Err(WriterError::Unsupported(_))
        ));
        assert!(matches!(
            writer.close_notify(),
            Err(WriterError::Unsupported(_))
        ));
    }
}
