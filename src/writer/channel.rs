use axum::http::{HeaderMap, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::convert::Infallible;
use std::io;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{CloseSignal, ResponseStream, WriterError};

/// Status and headers as committed by the writer.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Receiving half of a [`ChannelStream`], held by the async side.
#[derive(Debug)]
pub struct ChannelReceiver {
    pub head: oneshot::Receiver<ResponseHead>,
    pub body: mpsc::Receiver<Bytes>,
}

/// Response stream bridging a blocking handler chain to an async body.
///
/// The head travels over a oneshot channel on first transmission; body bytes
/// are buffered and sent as chunks over a bounded channel when the buffer
/// fills or on flush. Sends block, so this stream must only be driven from a
/// blocking thread (`tokio::task::spawn_blocking`).
#[derive(Debug)]
pub struct ChannelStream {
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: mpsc::Sender<Bytes>,
    buffer: BytesMut,
    buffer_limit: usize,
}

impl ChannelStream {
    pub fn new(capacity: usize, buffer_limit: usize) -> (Self, ChannelReceiver) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(capacity.max(1));

        let stream = Self {
            headers: HeaderMap::new(),
            head_tx: Some(head_tx),
            body_tx,
            buffer: BytesMut::with_capacity(buffer_limit),
            buffer_limit: buffer_limit.max(1),
        };
        let receiver = ChannelReceiver {
            head: head_rx,
            body: body_rx,
        };

        (stream, receiver)
    }

    fn push_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        self.body_tx
            .blocking_send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body receiver closed"))
    }
}

impl ResponseStream for ChannelStream {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn send_head(&mut self, status: StatusCode) -> io::Result<()> {
        let Some(head_tx) = self.head_tx.take() else {
            return Ok(());
        };
        let head = ResponseHead {
            status,
            headers: self.headers.clone(),
        };
        head_tx
            .send(head)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response head receiver closed"))
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= self.buffer_limit {
            self.push_buffer()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.push_buffer()
    }

    fn close_notify(&self) -> Result<CloseSignal, WriterError> {
        let weak = self.body_tx.downgrade();
        Ok(CloseSignal::new(move || {
            weak.upgrade().is_none_or(|tx| tx.is_closed())
        }))
    }
}

impl Drop for ChannelStream {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            debug!(pending = self.buffer.len(), "Dropping unflushed response bytes");
        }
    }
}

/// Adapts the body receiver into a stream accepted by `axum::body::Body`.
pub fn body_stream(
    body: mpsc::Receiver<Bytes>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures_util::stream::unfold(body, |mut body| async move {
        body.recv().await.map(|chunk| (Ok(chunk), body))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ResponseWriter;
    use std::io::Write;

    #[tokio::test]
    async fn test_head_sent_once_and_body_chunked() {
        let (stream, mut receiver) = ChannelStream::new(8, 4);

        let worker = tokio::task::spawn_blocking(move || {
            let mut writer = ResponseWriter::new(stream);
            writer.headers_mut().insert("x-test", "1".parse().unwrap());
            writer.write_header(StatusCode::CREATED);
            writer.write_all(b"abcdef").unwrap();
            writer.write_header_now().unwrap();
            writer.flush().unwrap();
        });

        let head = (&mut receiver.head).await.unwrap();
        assert_eq!(head.status, StatusCode::CREATED);
        assert_eq!(head.headers.get("x-test").unwrap(), "1");

        worker.await.unwrap();

        let mut body = Vec::new();
        while let Some(chunk) = receiver.body.recv().await {
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"abcdef");
    }

    #[tokio::test]
    async fn test_close_notify_reports_dropped_receiver() {
        let (stream, receiver) = ChannelStream::new(1, 16);
        let signal = stream.close_notify().unwrap();

        assert!(!signal.is_closed());
        drop(receiver);
        assert!(signal.is_closed());
    }
}
