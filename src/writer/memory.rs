use axum::http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

use super::ResponseStream;

/// What a [`MemoryStream`] has seen so far.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub status: Option<StatusCode>,
    /// Headers as of the (first) head transmission.
    pub headers: HeaderMap,
    pub head_count: usize,
    pub body: Vec<u8>,
    pub flush_count: usize,
}

impl Recording {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// In-memory response stream. Clones share one [`Recording`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    headers: HeaderMap,
    recording: Arc<Mutex<Recording>>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recording(&self) -> Recording {
        self.recording.lock().clone()
    }
}

impl ResponseStream for MemoryStream {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn send_head(&mut self, status: StatusCode) -> io::Result<()> {
        let mut recording = self.recording.lock();
        if recording.head_count == 0 {
            recording.status = Some(status);
            recording.headers = self.headers.clone();
        }
        recording.head_count += 1;
        Ok(())
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<usize> {
        self.recording.lock().body.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.recording.lock().flush_count += 1;
        Ok(())
    }
}
