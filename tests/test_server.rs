use kiln::config::Config;
use kiln::server::{Server, ServerHandle};
use kiln::store::MemoryStore;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const INDEX: &str = "<html><body>kiln index</body></html>";

struct TestServer {
    addr: SocketAddr,
    handle: ServerHandle,
    thread: Option<JoinHandle<anyhow::Result<()>>>,
    root: TempDir,
}

impl TestServer {
    fn start(trigger_mode: u8, idle_timeout_ms: u64) -> Self {
        Self::start_with(trigger_mode, idle_timeout_ms, 1024)
    }

    fn start_with(trigger_mode: u8, idle_timeout_ms: u64, max_connections: usize) -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("index.html"), INDEX).unwrap();
        fs::write(root.path().join("welcome.html"), "welcome page").unwrap();
        fs::write(root.path().join("error.html"), "error page").unwrap();

        let mut cfg = Config::default();
        cfg.server.host = "127.0.0.1".into();
        cfg.server.port = 0;
        cfg.server.trigger_mode = trigger_mode;
        cfg.server.idle_timeout_ms = idle_timeout_ms;
        cfg.server.workers = 2;
        cfg.server.max_connections = max_connections;
        cfg.static_files.root = root.path().to_path_buf();

        let server = Server::bind(&cfg, Arc::new(MemoryStore::new())).unwrap();
        let addr = server.local_addr();
        let handle = server.handle();
        let thread = thread::spawn(move || server.run());

        Self {
            addr,
            handle,
            thread: Some(thread),
            root,
        }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.handle.shutdown();
        match self.thread.take() {
            Some(thread) => thread.join().expect("reactor thread panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Reads one response; returns the head and the body.
fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    read_response_paced(stream, 4096, Duration::ZERO)
}

/// Like [`read_response`], but reads at most `chunk` bytes at a time and
/// sleeps `pause` after each read.
fn read_response_paced(
    stream: &mut TcpStream,
    chunk: usize,
    pause: Duration,
) -> (String, Vec<u8>) {
    let mut data = Vec::new();
    let mut scratch = vec![0u8; chunk];
    let mut read_some = |stream: &mut TcpStream, data: &mut Vec<u8>| {
        let n = stream.read(&mut scratch).unwrap();
        data.extend_from_slice(&scratch[..n]);
        if !pause.is_zero() {
            thread::sleep(pause);
        }
        n
    };
    loop {
        if let Some(pos) = find(&data, b"\r\n\r\n") {
            let head = String::from_utf8(data[..pos + 4].to_vec()).unwrap();
            let len = content_length(&head);
            while data.len() < pos + 4 + len {
                assert!(read_some(stream, &mut data) > 0, "connection closed mid-body");
            }
            assert_eq!(data.len(), pos + 4 + len, "bytes past the declared body");
            return (head, data[pos + 4..].to_vec());
        }
        assert!(
            read_some(stream, &mut data) > 0,
            "connection closed before response head"
        );
    }
}

/// Reads a response head that is not followed by a body.
fn read_head(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];
    while find(&data, b"\r\n\r\n").is_none() {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed before response head");
        data.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8(data).unwrap()
}

fn content_length(head: &str) -> usize {
    head.lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .and_then(|v| v.trim().parse().ok())
        .expect("response without Content-Length")
}

fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n")
}

fn form_post(path: &str, body: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\
         Content-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn assert_closed(stream: &mut TcpStream) {
    let mut rest = [0u8; 64];
    match stream.read(&mut rest) {
        Ok(0) => {}
        Ok(n) => panic!("unexpected {n} bytes after close"),
        Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
        Err(e) => panic!("expected close, got {e}"),
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn test_keep_alive_serves_sequential_requests_in_every_mode() {
    for mode in 0..4 {
        let server = TestServer::start(mode, 60_000);
        let mut stream = server.connect();

        for _ in 0..2 {
            stream.write_all(get("/index").as_bytes()).unwrap();
            let (head, body) = read_response(&mut stream);
            assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "mode {mode}: {head}");
            assert!(head.contains("Connection: keep-alive\r\n"));
            assert!(head.contains("Content-Type: text/html\r\n"));
            assert_eq!(body, INDEX.as_bytes());
        }
    }
}

#[test]
fn test_request_split_across_writes() {
    let server = TestServer::start(3, 60_000);
    let mut stream = server.connect();
    let request = get("/");

    let (first, second) = request.as_bytes().split_at(12);
    stream.write_all(first).unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(second).unwrap();

    let (head, body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, INDEX.as_bytes());
}

#[test]
fn test_not_found_keeps_connection_open() {
    let server = TestServer::start(3, 60_000);
    let mut stream = server.connect();

    stream.write_all(get("/missing.html").as_bytes()).unwrap();
    let (head, body) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(String::from_utf8_lossy(&body).contains("404 : Not Found"));

    stream.write_all(get("/index.html").as_bytes()).unwrap();
    let (head, _) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[test]
fn test_malformed_request_gets_400_and_close() {
    let server = TestServer::start(3, 60_000);
    let mut stream = server.connect();

    stream.write_all(b"GARBAGE\r\n\r\n").unwrap();
    let (head, _) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert_closed(&mut stream);
}

#[test]
fn test_http10_request_closes_after_response() {
    let server = TestServer::start(0, 60_000);
    let mut stream = server.connect();

    stream
        .write_all(b"GET /index.html HTTP/1.0\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let (head, body) = read_response(&mut stream);
    assert!(head.contains("Connection: close\r\n"));
    assert_eq!(body, INDEX.as_bytes());
    assert_closed(&mut stream);
}

#[test]
fn test_register_then_login() {
    let server = TestServer::start(3, 60_000);
    let mut stream = server.connect();

    stream
        .write_all(form_post("/register", "username=neo&password=matrix").as_bytes())
        .unwrap();
    let (_, body) = read_response(&mut stream);
    assert_eq!(body, b"welcome page");

    stream
        .write_all(form_post("/login", "username=neo&password=wrong").as_bytes())
        .unwrap();
    let (_, body) = read_response(&mut stream);
    assert_eq!(body, b"error page");

    stream
        .write_all(form_post("/login", "username=neo&password=matrix").as_bytes())
        .unwrap();
    let (_, body) = read_response(&mut stream);
    assert_eq!(body, b"welcome page");
}

#[test]
fn test_idle_connection_is_evicted() {
    let server = TestServer::start(3, 200);
    let mut stream = server.connect();
    assert!(wait_until(|| server.handle.connections() == 1));

    let started = Instant::now();
    assert_closed(&mut stream);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(wait_until(|| server.handle.connections() == 0));
}

#[test]
fn test_zero_timeout_never_evicts() {
    let server = TestServer::start(3, 0);
    let mut stream = server.connect();
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();

    let mut byte = [0u8; 1];
    let err = stream.read(&mut byte).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut));

    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(get("/").as_bytes()).unwrap();
    let (head, _) = read_response(&mut stream);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(server.handle.connections(), 1);
}

#[test]
fn test_connection_limit_rejects_with_busy_notice() {
    let server = TestServer::start_with(3, 60_000, 1);
    let mut first = server.connect();
    first.write_all(get("/").as_bytes()).unwrap();
    read_response(&mut first);
    assert_eq!(server.handle.connections(), 1);

    let mut second = server.connect();
    let mut notice = Vec::new();
    second.read_to_end(&mut notice).unwrap();
    assert_eq!(notice, b"Server busy!");
    assert_eq!(server.handle.connections(), 1);
}

#[test]
fn test_client_close_releases_connection() {
    let server = TestServer::start(3, 60_000);
    let stream = server.connect();
    assert!(wait_until(|| server.handle.connections() == 1));

    drop(stream);
    assert!(wait_until(|| server.handle.connections() == 0));
}

#[test]
fn test_shutdown_stops_reactor() {
    let mut server = TestServer::start(3, 60_000);
    let _client = server.connect();
    assert!(wait_until(|| server.handle.connections() == 1));

    server.stop().unwrap();
    assert!(server.handle.is_shutdown());
    assert_eq!(server.handle.connections(), 0);
}

#[test]
fn test_large_file_survives_slow_reader_in_every_mode() {
    let payload: Vec<u8> = (0..8 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

    for mode in 0..4 {
        let server = TestServer::start(mode, 60_000);
        fs::write(server.root.path().join("large.bin"), &payload).unwrap();
        let mut stream = server.connect();

        for round in 0..2 {
            stream.write_all(get("/large.bin").as_bytes()).unwrap();
            // Let the server fill the socket buffers and park on writable.
            thread::sleep(Duration::from_millis(100));
            let (head, body) =
                read_response_paced(&mut stream, 32 * 1024, Duration::from_millis(1));

            assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "mode {mode}: {head}");
            assert!(head.contains("Connection: keep-alive\r\n"));
            assert_eq!(content_length(&head), payload.len());
            assert!(body == payload, "mode {mode} round {round}: body differs");
        }
        assert_eq!(server.handle.connections(), 1);
    }
}

#[test]
fn test_head_sends_no_body_and_keeps_alive() {
    for mode in [0, 3] {
        let server = TestServer::start(mode, 60_000);
        let mut stream = server.connect();

        stream
            .write_all(b"HEAD /index.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();
        let head = read_head(&mut stream);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "mode {mode}: {head}");
        assert!(head.ends_with("\r\n\r\n"), "body bytes after HEAD head: {head}");
        assert_eq!(content_length(&head), INDEX.len());

        // The next response must start right where the HEAD head ended.
        stream.write_all(get("/index.html").as_bytes()).unwrap();
        let (head, body) = read_response(&mut stream);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "mode {mode}: {head}");
        assert_eq!(body, INDEX.as_bytes());
    }
}
