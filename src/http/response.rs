use bytes::Bytes;

use crate::buffer::Buffer;
use crate::http::mime;
use crate::http::static_files::{Body, Resolved, StaticFiles};

/// HTTP status codes the server emits.
///
/// - `Ok` (200): Request successful
/// - `BadRequest` (400): Malformed request
/// - `Forbidden` (403): Resource not readable
/// - `NotFound` (404): Resource not found
/// - `InternalServerError` (500): Server error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 500 Internal Server Error
    InternalServerError,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use kiln::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalServerError => 500,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }

    /// Path of the page served for an error status, relative to the root.
    pub fn error_page(&self) -> Option<&'static str> {
        match self {
            StatusCode::BadRequest => Some("/400.html"),
            StatusCode::Forbidden => Some("/403.html"),
            StatusCode::NotFound => Some("/404.html"),
            _ => None,
        }
    }
}

/// Response descriptor for one request/response exchange.
///
/// The serialized status line and headers go into the connection's outbound
/// [`Buffer`]; the body stays where it is (a file mapping or a small inline
/// page) so the write path can hand both to a single vectored write.
#[derive(Debug, Default)]
pub struct Response {
    status: Option<StatusCode>,
    keep_alive: bool,
    path: String,
    body: Body,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares a new exchange. With `status == None` the status is decided
    /// by the file lookup in [`make_response`](Self::make_response).
    pub fn init(&mut self, path: &str, keep_alive: bool, status: Option<StatusCode>) {
        self.reset();
        self.path = path.to_string();
        self.keep_alive = keep_alive;
        self.status = status;
    }

    /// Drops the body, releasing any file mapping.
    pub fn reset(&mut self) {
        self.status = None;
        self.keep_alive = false;
        self.path.clear();
        self.body = Body::Empty;
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &[u8] {
        self.body.as_bytes()
    }

    /// Resolves the resource, writes status line and headers into `buf`, and
    /// attaches the body.
    pub fn make_response(&mut self, files: &StaticFiles, buf: &mut Buffer) {
        let mut target = None;
        if self.status.is_none() {
            match files.resolve(&self.path) {
                Resolved::Found { path, .. } => {
                    self.status = Some(StatusCode::Ok);
                    target = Some(path);
                }
                Resolved::NotFound => self.status = Some(StatusCode::NotFound),
                Resolved::Forbidden => self.status = Some(StatusCode::Forbidden),
            }
        }
        let status = self.status.unwrap_or(StatusCode::BadRequest);

        if let Some(page) = status.error_page() {
            self.path = page.to_string();
            if let Resolved::Found { path, .. } = files.resolve(page) {
                target = Some(path);
            }
        }

        self.body = match target.map(|path| files.map(&path)) {
            Some(Ok(body)) => body,
            Some(Err(e)) => {
                tracing::warn!(path = %self.path, error = %e, "Failed to map file");
                error_page(status, "File NotFound!")
            }
            None => error_page(status, status.reason_phrase()),
        };

        self.write_head(status, buf);
    }

    fn write_head(&self, status: StatusCode, buf: &mut Buffer) {
        buf.append_str(&format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.reason_phrase()
        ));

        if self.keep_alive {
            buf.append_str("Connection: keep-alive\r\n");
            buf.append_str("Keep-Alive: max=6, timeout=120\r\n");
        } else {
            buf.append_str("Connection: close\r\n");
        }

        let content_type = match self.body {
            Body::Inline(_) => "text/html",
            _ => mime::content_type(&self.path),
        };
        buf.append_str(&format!("Content-Type: {content_type}\r\n"));
        buf.append_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));
    }
}

/// Minimal HTML page used when no page file is available.
pub fn error_page(status: StatusCode, message: &str) -> Body {
    let html = format!(
        "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>Kiln</em></body></html>",
        status.as_u16(),
        status.reason_phrase(),
        message
    );
    Body::Inline(Bytes::from(html))
}
