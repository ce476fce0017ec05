//! Incremental request parser.
//!
//! The parser walks the inbound [`Buffer`] line by line and moves through
//! `RequestLine -> Headers -> Body -> Finished`, never backwards. It only
//! consumes complete CRLF-terminated lines for the request line and headers,
//! so a request split across several reads resumes where it stopped. No I/O
//! happens here.

use crate::buffer::Buffer;
use crate::http::request::{Method, Request};

const CRLF: &[u8] = b"\r\n";

/// Logical paths served by appending `.html`.
const DEFAULT_HTML: [&str; 6] = ["/index", "/register", "/login", "/welcome", "/video", "/picture"];

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request line: {0:?}")]
    InvalidRequest(String),
    #[error("unsupported method: {0:?}")]
    InvalidMethod(String),
}

#[derive(Debug)]
pub struct RequestParser {
    state: ParseState,
    request: Request,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::RequestLine,
            request: Request::default(),
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParseState::Finished
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Starts a new parse cycle.
    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.request = Request::default();
    }

    /// Consumes whatever complete input `buf` holds.
    ///
    /// Returns `Ok(true)` once the request is finished, `Ok(false)` when more
    /// bytes are needed.
    pub fn parse(&mut self, buf: &mut Buffer) -> Result<bool, ParseError> {
        while buf.readable_bytes() > 0 {
            let in_headers = match self.state {
                ParseState::Finished => break,
                ParseState::Body => {
                    if !self.take_body(buf) {
                        break;
                    }
                    continue;
                }
                ParseState::RequestLine => false,
                ParseState::Headers => true,
            };

            let data = buf.peek();
            let Some(end) = find_crlf(data) else {
                break;
            };
            let readable = data.len();
            let line = String::from_utf8_lossy(&data[..end]).into_owned();

            if in_headers {
                self.parse_header(&line);
                // Only the terminating CRLF left: nothing follows the headers.
                if readable <= 2 && self.request.content_length() == 0 {
                    self.state = ParseState::Finished;
                }
            } else {
                self.parse_request_line(&line)?;
                self.normalize_path();
            }
            buf.retrieve(end + CRLF.len());
        }

        if self.state == ParseState::Finished {
            tracing::debug!(
                method = self.request.method.as_str(),
                path = %self.request.path,
                version = %self.request.version,
                "Request parsed"
            );
        }
        Ok(self.state == ParseState::Finished)
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), ParseError> {
        let invalid = || ParseError::InvalidRequest(line.to_string());

        let mut parts = line.splitn(3, ' ');
        let method = parts.next().ok_or_else(invalid)?;
        let path = parts.next().ok_or_else(invalid)?;
        let version = parts
            .next()
            .and_then(|v| v.strip_prefix("HTTP/"))
            .ok_or_else(invalid)?;
        if version.contains(' ') {
            return Err(invalid());
        }

        self.request.method =
            Method::from_str(method).ok_or_else(|| ParseError::InvalidMethod(method.to_string()))?;
        self.request.path = path.to_string();
        self.request.version = version.to_string();
        self.state = ParseState::Headers;
        Ok(())
    }

    fn normalize_path(&mut self) {
        let path = &mut self.request.path;
        if path == "/" {
            *path = "/index.html".to_string();
        } else if DEFAULT_HTML.contains(&path.as_str()) {
            path.push_str(".html");
        }
    }

    /// `KEY: VALUE` with an optional single space. Anything else ends the
    /// header section.
    fn parse_header(&mut self, line: &str) {
        match line.split_once(':') {
            Some((key, value)) => {
                let value = value.strip_prefix(' ').unwrap_or(value);
                self.request.headers.insert(key.to_string(), value.to_string());
            }
            None => self.state = ParseState::Body,
        }
    }

    /// The body is `Content-Length` bytes when announced, otherwise the next
    /// line (or everything buffered if no CRLF arrived).
    fn take_body(&mut self, buf: &mut Buffer) -> bool {
        let data = buf.peek();
        let content_length = self.request.content_length();
        let (body_len, consumed) = if content_length > 0 {
            if data.len() < content_length {
                return false;
            }
            (content_length, content_length)
        } else {
            match find_crlf(data) {
                Some(end) => (end, end + CRLF.len()),
                None => (data.len(), data.len()),
            }
        };

        self.request.body = data[..body_len].to_vec();
        buf.retrieve(consumed);

        if self.request.content_type() == Some(FORM_URLENCODED) {
            self.request.form = decode_form(&self.request.body);
        }
        tracing::trace!(len = body_len, "Body parsed");
        self.state = ParseState::Finished;
        true
    }
}

/// Splits `key=value&key=value`, turning `+` into a space and `%XX` into the
/// byte it encodes.
pub fn decode_form(body: &[u8]) -> std::collections::HashMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(CRLF.len()).position(|w| w == CRLF)
}
