//! File-like resources served through a context
//!
//! [`serve_content`] does the HTTP side: content type from the file name,
//! length and modification headers, conditional `304 Not Modified` and
//! bodiless `HEAD` responses.

use axum::http::{HeaderValue, Method, StatusCode, header};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::context::Request;
use crate::error::CtxError;
use crate::writer::ResponseWriter;

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub modified: Option<SystemTime>,
    pub len: u64,
}

pub trait ServedFile: Read + Seek + Send {
    fn stat(&self) -> io::Result<FileInfo>;
}

/// A file on disk.
#[derive(Debug)]
pub struct NamedFile {
    name: String,
    file: File,
}

impl NamedFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            file: File::open(path)?,
        })
    }
}

impl Read for NamedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for NamedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl ServedFile for NamedFile {
    fn stat(&self) -> io::Result<FileInfo> {
        let metadata = self.file.metadata()?;
        Ok(FileInfo {
            name: self.name.clone(),
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

/// Bytes served as if they were a file.
#[derive(Debug, Clone)]
pub struct InMemoryFile {
    name: String,
    modified: Option<SystemTime>,
    data: Cursor<Bytes>,
}

impl InMemoryFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            modified: None,
            data: Cursor::new(data.into()),
        }
    }

    pub fn modified_at(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }
}

impl Read for InMemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl Seek for InMemoryFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.data.seek(pos)
    }
}

impl ServedFile for InMemoryFile {
    fn stat(&self) -> io::Result<FileInfo> {
        Ok(FileInfo {
            name: self.name.clone(),
            modified: self.modified,
            len: self.data.get_ref().len() as u64,
        })
    }
}

fn content_type(name: &str) -> mime::Mime {
    mime_guess::from_path(name).first_or_octet_stream()
}

fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(HTTP_DATE).to_string()
}

/// Whether the client's copy, dated by `If-Modified-Since`, is current.
fn not_modified(request: &Request, modified: SystemTime) -> bool {
    if request.method != Method::GET && request.method != Method::HEAD {
        return false;
    }
    let Some(since) = request
        .header(header::IF_MODIFIED_SINCE)
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
    else {
        return false;
    };
    DateTime::<Utc>::from(modified).timestamp() <= since.timestamp()
}

/// The first file at `requested` below one of `dirs`, searched in order.
/// Paths that could leave a directory (`..`, roots, prefixes) never match.
pub fn find_static(dirs: &[PathBuf], requested: &str) -> Option<NamedFile> {
    let relative = Path::new(requested.trim_start_matches('/'));
    if relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
    {
        debug!(path = requested, "Static path rejected");
        return None;
    }

    dirs.iter()
        .map(|dir| dir.join(relative))
        .filter(|path| path.is_file())
        .find_map(|path| NamedFile::open(path).ok())
}

pub fn serve_content(
    writer: &mut ResponseWriter,
    request: &Request,
    info: &FileInfo,
    content: &mut dyn Read,
) -> Result<(), CtxError> {
    if let Some(modified) = info.modified {
        if not_modified(request, modified) {
            debug!(file = %info.name, "Not modified");
            writer.write_header(StatusCode::NOT_MODIFIED);
            writer.write_header_now()?;
            return Ok(());
        }
        if let Ok(value) = HeaderValue::from_str(&http_date(modified)) {
            writer.headers_mut().insert(header::LAST_MODIFIED, value);
        }
    }

    let headers = writer.headers_mut();
    if !headers.contains_key(header::CONTENT_TYPE) {
        if let Ok(value) = HeaderValue::from_str(content_type(&info.name).as_ref()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.len));

    if request.method == Method::HEAD {
        writer.write_header_now()?;
        return Ok(());
    }

    let copied = io::copy(content, writer)?;
    debug!(file = %info.name, bytes = copied, "File served");
    Ok(())
}
