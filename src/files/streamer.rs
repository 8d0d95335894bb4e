//! Bounded-memory file downloads
//!
//! A download owns its file handle from `open()` until the response body is
//! dropped. The body is polled by the connection task; whatever ends the
//! transfer (EOF, a client disconnect, shutdown cancellation) drops the body
//! and with it the handle, exactly once.

use axum::{
    body::{Body, Bytes},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use futures::Stream;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, Take};
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::content_type::content_type_for;
use super::path_guard::{PathGuard, PathRejection};
use crate::error::{AppError, AppResult};

/// Read size per body chunk
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Hint for nginx-style proxies not to buffer the whole download
pub const X_ACCEL_BUFFERING: &str = "x-accel-buffering";

/// Byte range selected by a `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive
    pub end: u64,
}

impl ByteRange {
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RangeError {
    /// Syntactically valid but outside the file; answered with 416
    Unsatisfiable,
    /// Malformed or multi-range; the header is ignored
    Invalid,
}

/// Parse a single `bytes=` range against a file of `size` bytes
///
/// Supports `a-b`, `a-` and the suffix form `-n`. Multiple ranges are not
/// supported and yield `Invalid`, so the full file is sent instead.
pub fn parse_range(value: &str, size: u64) -> Result<ByteRange, RangeError> {
    let spec = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Invalid)?;
    if spec.contains(',') {
        return Err(RangeError::Invalid);
    }
    let (start, end) = spec.split_once('-').ok_or(RangeError::Invalid)?;
    let (start, end) = (start.trim(), end.trim());

    let parse = |s: &str| s.parse::<u64>().map_err(|_| RangeError::Invalid);

    let range = match (start.is_empty(), end.is_empty()) {
        (true, true) => return Err(RangeError::Invalid),
        (true, false) => {
            let suffix = parse(end)?;
            if suffix == 0 || size == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            ByteRange {
                start: size.saturating_sub(suffix),
                end: size - 1,
            }
        }
        (false, _) => {
            let start = parse(start)?;
            let end = if end.is_empty() {
                size.saturating_sub(1)
            } else {
                parse(end)?.min(size.saturating_sub(1))
            };
            if start >= size {
                return Err(RangeError::Unsatisfiable);
            }
            if end < start {
                return Err(RangeError::Invalid);
            }
            ByteRange { start, end }
        }
    };
    Ok(range)
}

/// Streams files from the large-files directory
pub struct FileStreamer {
    guard: PathGuard,
    active: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl FileStreamer {
    /// Create a streamer rooted at `base`
    ///
    /// In-flight bodies stop with an error once `shutdown` is cancelled.
    pub fn new(base: impl AsRef<Path>, shutdown: CancellationToken) -> AppResult<Self> {
        let base = base.as_ref();
        let guard = PathGuard::new(base).map_err(|e| {
            AppError::io(format!("resolving large files directory {}", base.display()), e)
        })?;
        Ok(Self {
            guard,
            active: Arc::new(AtomicUsize::new(0)),
            shutdown,
        })
    }

    pub fn base(&self) -> &Path {
        self.guard.base()
    }

    /// Number of response bodies currently holding a file handle
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Build the download response for `requested`
    ///
    /// The body is not read here; it is pulled chunk by chunk as the client
    /// consumes it.
    pub async fn serve(&self, requested: &str, range: Option<&HeaderValue>) -> AppResult<Response> {
        let path = self
            .guard
            .resolve_async(requested)
            .await
            .map_err(|rejection| match rejection {
                PathRejection::Unresolvable(e) => AppError::io("resolving requested file", e),
                other => {
                    tracing::warn!(requested, reason = %other, "Rejected file path");
                    AppError::Forbidden("Invalid file path".to_string())
                }
            })?;

        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::NotFound("File not found".to_string()));
            }
            Err(e) => return Err(AppError::io("opening requested file", e)),
        };
        let metadata = file
            .metadata()
            .await
            .map_err(|e| AppError::io("reading file metadata", e))?;
        if metadata.is_dir() {
            return Err(AppError::Forbidden("Cannot download a directory".to_string()));
        }
        let size = metadata.len();

        let requested_range = range
            .and_then(|v| v.to_str().ok())
            .map(|v| parse_range(v, size));
        let (status, start, length) = match requested_range {
            Some(Ok(range)) => (StatusCode::PARTIAL_CONTENT, range.start, range.length()),
            Some(Err(RangeError::Unsatisfiable)) => {
                return Ok(unsatisfiable(size));
            }
            Some(Err(RangeError::Invalid)) | None => (StatusCode::OK, 0, size),
        };

        if start > 0 {
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| AppError::io("seeking requested file", e))?;
        }

        let name = download_name(&path);
        let body = FileBody::new(
            file.take(length),
            length,
            name.clone(),
            StreamLease::acquire(&self.active),
            self.shutdown.clone(),
        );

        let mut response = Response::new(Body::from_stream(body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type_for(&path)),
        );
        if let Ok(disposition) =
            HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name))
        {
            headers.insert(header::CONTENT_DISPOSITION, disposition);
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        if status == StatusCode::PARTIAL_CONTENT {
            let content_range = format!("bytes {}-{}/{}", start, start + length - 1, size);
            if let Ok(value) = HeaderValue::from_str(&content_range) {
                headers.insert(header::CONTENT_RANGE, value);
            }
        }

        tracing::debug!(
            file = %path.display(),
            size,
            start,
            length,
            "Streaming file"
        );
        Ok(response)
    }
}

fn unsatisfiable(size: u64) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
    if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response
}

/// File name safe to put inside a quoted `Content-Disposition` parameter
fn download_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if !c.is_ascii() || c.is_ascii_control() => '_',
            c => c,
        })
        .collect()
}

/// Counts one open download for as long as it lives
struct StreamLease {
    active: Arc<AtomicUsize>,
}

impl StreamLease {
    fn acquire(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Response body reading a file in fixed-size chunks
struct FileBody {
    inner: ReaderStream<Take<File>>,
    shutdown: Pin<Box<WaitForCancellationFutureOwned>>,
    expected: u64,
    sent: u64,
    name: String,
    finished: bool,
    aborted: bool,
    _lease: StreamLease,
}

impl FileBody {
    fn new(
        reader: Take<File>,
        expected: u64,
        name: String,
        lease: StreamLease,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: ReaderStream::with_capacity(reader, CHUNK_SIZE),
            shutdown: Box::pin(shutdown.cancelled_owned()),
            expected,
            sent: 0,
            name,
            finished: false,
            aborted: false,
            _lease: lease,
        }
    }
}

impl Stream for FileBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }

        if this.shutdown.as_mut().poll(cx).is_ready() {
            this.finished = true;
            this.aborted = true;
            tracing::warn!(
                file = %this.name,
                sent = this.sent,
                expected = this.expected,
                "Aborting download for shutdown"
            );
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "server shutting down",
            ))));
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                tracing::error!(file = %this.name, error = %e, "Read failed mid-stream");
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.expected - self.sent).ok();
        (0, remaining)
    }
}

impl Drop for FileBody {
    fn drop(&mut self) {
        if self.sent < self.expected && !self.aborted {
            tracing::warn!(
                file = %self.name,
                sent = self.sent,
                expected = self.expected,
                "Client disconnected before download completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(
            parse_range("bytes=0-9", 100),
            Ok(ByteRange { start: 0, end: 9 })
        );
        assert_eq!(
            parse_range("bytes=90-", 100),
            Ok(ByteRange { start: 90, end: 99 })
        );
        assert_eq!(
            parse_range("bytes=-10", 100),
            Ok(ByteRange { start: 90, end: 99 })
        );
        assert_eq!(
            parse_range("bytes=50-500", 100),
            Ok(ByteRange { start: 50, end: 99 })
        );
    }

    #[test]
    fn test_parse_range_rejections() {
        assert_eq!(parse_range("bytes=100-", 100), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=-0", 100), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=0-1,5-6", 100), Err(RangeError::Invalid));
        assert_eq!(parse_range("items=0-1", 100), Err(RangeError::Invalid));
        assert_eq!(parse_range("bytes=9-3", 100), Err(RangeError::Invalid));
        assert_eq!(parse_range("bytes=x-3", 100), Err(RangeError::Invalid));
    }

    #[test]
    fn test_download_name_strips_quotes() {
        assert_eq!(
            download_name(Path::new("/tmp/we\"ird\\name.bin")),
            "we_ird_name.bin"
        );
    }

    #[test]
    fn test_lease_counts_and_releases() {
        let active = Arc::new(AtomicUsize::new(0));
        let first = StreamLease::acquire(&active);
        let second = StreamLease::acquire(&active);
        assert_eq!(active.load(Ordering::SeqCst), 2);
        drop(first);
        drop(second);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
