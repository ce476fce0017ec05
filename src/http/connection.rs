use std::io;
use std::net::{SocketAddr, TcpStream};

use crate::buffer::Buffer;
use crate::http::parser::RequestParser;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::static_files::StaticFiles;
use crate::http::writer::IoSegments;
use crate::poller::{Epoller, Interest};
use crate::store::CredentialStore;

/// Keep writing in level-triggered mode while more than this is pending.
const LARGE_WRITE: usize = 10 * 1024;

/// Per-client state: the socket, both buffers, and the exchange in flight.
///
/// The socket is owned; [`close`](Connection::close) drops it exactly once
/// and every later I/O call sees a closed connection.
///
/// ```text
///   read ──► process ──► write ──┬─ keep-alive ─► process (next request)
///              │                 └─ close
///              └─ incomplete ─► re-arm readable
/// ```
pub struct Connection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    edge_triggered: bool,
    inbound: Buffer,
    outbound: Buffer,
    segments: IoSegments,
    parser: RequestParser,
    response: Response,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, edge_triggered: bool) -> Self {
        Self {
            stream: Some(stream),
            peer,
            edge_triggered,
            inbound: Buffer::new(),
            outbound: Buffer::new(),
            segments: IoSegments::default(),
            parser: RequestParser::new(),
            response: Response::new(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Bytes of the current response not yet written.
    pub fn to_write_bytes(&self) -> usize {
        self.segments.remaining()
    }

    pub fn is_keep_alive(&self) -> bool {
        self.response.keep_alive()
    }

    pub fn register(&self, poller: &Epoller, token: u64, interest: Interest) -> io::Result<()> {
        match &self.stream {
            Some(stream) => poller.add(stream, token, interest),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Re-enables a one-shot registration for the next direction.
    pub fn rearm(&self, poller: &Epoller, token: u64, interest: Interest) -> io::Result<()> {
        match &self.stream {
            Some(stream) => poller.modify(stream, token, interest),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Deregisters and closes the socket, releasing any file mapping.
    /// Returns `false` if it was already closed.
    pub fn close(&mut self, poller: &Epoller) -> bool {
        let Some(stream) = self.stream.take() else {
            return false;
        };
        if let Err(e) = poller.delete(&stream) {
            tracing::trace!(peer = %self.peer, error = %e, "Deregister failed");
        }
        self.response.reset();
        self.segments.clear();
        drop(stream);
        tracing::info!(peer = %self.peer, "Client quit");
        true
    }

    /// Drains the socket into the inbound buffer: once in level-triggered
    /// mode, until it would block in edge-triggered mode.
    ///
    /// End of stream is reported as `UnexpectedEof`. `WouldBlock` is only
    /// returned when nothing at all was read.
    pub fn read(&mut self) -> io::Result<usize> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let mut source = stream;
        let mut total = 0;
        loop {
            match self.inbound.read_from(&mut source) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    total += n;
                    if !self.edge_triggered {
                        return Ok(total);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && total > 0 => return Ok(total),
                Err(e) => return Err(e),
            }
        }
    }

    /// Parses buffered input and, once a request is complete (or malformed),
    /// assembles the response.
    ///
    /// Returns `true` when a response is ready to write, `false` when more
    /// input is needed. A `HEAD` response carries the full head, including
    /// `Content-Length`, but no body bytes.
    pub fn process(&mut self, files: &StaticFiles, store: &dyn CredentialStore) -> bool {
        if self.parser.is_finished() {
            self.parser.reset();
        }
        if self.inbound.readable_bytes() == 0 {
            return false;
        }

        let head_only = match self.parser.parse(&mut self.inbound) {
            Ok(true) => {
                let request = self.parser.request();
                let path = route(request, store);
                self.response.init(&path, request.keep_alive(), None);
                request.method == Method::HEAD
            }
            Ok(false) => return false,
            Err(e) => {
                tracing::debug!(peer = %self.peer, error = %e, "Bad request");
                let path = self.parser.request().path.clone();
                self.parser.reset();
                self.response.init(&path, false, Some(StatusCode::BadRequest));
                false
            }
        };

        self.outbound.retrieve_all();
        self.response.make_response(files, &mut self.outbound);
        let body_len = if head_only { 0 } else { self.response.body().len() };
        self.segments = IoSegments::new(self.outbound.readable_bytes(), body_len);
        tracing::debug!(
            peer = %self.peer,
            path = self.response.path(),
            status = self.response.status().map(|s| s.as_u16()),
            bytes = self.segments.remaining(),
            "Response ready"
        );
        true
    }

    /// Writes the pending head and body with vectored writes.
    ///
    /// Loops while edge-triggered or while a large backlog remains;
    /// `WouldBlock` propagates so the caller re-arms for writable.
    pub fn write(&mut self) -> io::Result<usize> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        let mut sink = stream;
        let mut total = 0;
        while !self.segments.is_done() {
            match self
                .segments
                .write_to(&mut sink, self.outbound.peek(), self.response.body())
            {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            if !self.edge_triggered && self.segments.remaining() <= LARGE_WRITE {
                break;
            }
        }
        if self.segments.is_done() {
            self.outbound.retrieve_all();
        }
        Ok(total)
    }

    /// Releases the finished response before the next keep-alive request.
    pub fn finish_response(&mut self) {
        self.response.reset();
        self.segments.clear();
        self.outbound.retrieve_all();
    }
}

/// Path to serve for a finished request. Form posts to the login and
/// register pages are checked against the credential store.
fn route(request: &Request, store: &dyn CredentialStore) -> String {
    let is_login = match request.path.as_str() {
        "/login.html" => true,
        "/register.html" => false,
        _ => return request.path.clone(),
    };
    if request.method != Method::POST || request.form.is_empty() {
        return request.path.clone();
    }

    let username = request.form_value("username").unwrap_or_default();
    let password = request.form_value("password").unwrap_or_default();
    if store.verify(username, password, is_login) {
        "/welcome.html".to_string()
    } else {
        "/error.html".to_string()
    }
}
