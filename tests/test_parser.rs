use kiln::buffer::Buffer;
use kiln::http::parser::{ParseError, ParseState, RequestParser, decode_form};
use kiln::http::request::Method;

fn buffer_of(bytes: &[u8]) -> Buffer {
    let mut buf = Buffer::new();
    buf.append(bytes);
    buf
}

#[test]
fn test_parse_simple_get_request() {
    let mut buf = buffer_of(b"GET /index HTTP/1.1\r\nHost: x\r\n\r\n");
    let mut parser = RequestParser::new();

    assert_eq!(parser.parse(&mut buf), Ok(true));
    assert_eq!(parser.state(), ParseState::Finished);

    let req = parser.request();
    assert_eq!(req.method, Method::GET);
    assert_eq!(req.path, "/index.html");
    assert_eq!(req.version, "1.1");
    assert_eq!(req.header("Host"), Some("x"));
    assert!(req.body.is_empty());
    assert_eq!(buf.readable_bytes(), 0);
}

#[test]
fn test_parse_root_maps_to_index() {
    let mut buf = buffer_of(b"GET / HTTP/1.1\r\n\r\n");
    let mut parser = RequestParser::new();

    assert_eq!(parser.parse(&mut buf), Ok(true));
    assert_eq!(parser.request().path, "/index.html");
}

#[test]
fn test_parse_logical_paths_get_html_suffix() {
    for (raw, expected) in [
        ("/login", "/login.html"),
        ("/register", "/register.html"),
        ("/picture", "/picture.html"),
        ("/about", "/about"),
        ("/login.html", "/login.html"),
    ] {
        let mut buf = buffer_of(format!("GET {raw} HTTP/1.1\r\n\r\n").as_bytes());
        let mut parser = RequestParser::new();
        assert_eq!(parser.parse(&mut buf), Ok(true));
        assert_eq!(parser.request().path, expected);
    }
}

#[test]
fn test_parse_rejects_short_request_line() {
    let mut buf = buffer_of(b"GET\r\n\r\n");
    let mut parser = RequestParser::new();

    assert!(matches!(
        parser.parse(&mut buf),
        Err(ParseError::InvalidRequest(_))
    ));
}

#[test]
fn test_parse_rejects_unknown_method() {
    let mut buf = buffer_of(b"BREW /pot HTTP/1.1\r\n\r\n");
    let mut parser = RequestParser::new();

    assert_eq!(
        parser.parse(&mut buf),
        Err(ParseError::InvalidMethod("BREW".to_string()))
    );
}

#[test]
fn test_parse_multiple_headers_last_wins() {
    let mut buf = buffer_of(
        b"GET /a.txt HTTP/1.1\r\nHost: example.com\r\nAccept:*/*\r\nHost: other\r\n\r\n",
    );
    let mut parser = RequestParser::new();

    assert_eq!(parser.parse(&mut buf), Ok(true));
    let req = parser.request();
    assert_eq!(req.header("Host"), Some("other"));
    assert_eq!(req.header("Accept"), Some("*/*"));
}

#[test]
fn test_parse_incremental_feed() {
    let raw = b"GET /index.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n";
    let mut buf = Buffer::new();
    let mut parser = RequestParser::new();

    buf.append(&raw[..10]);
    assert_eq!(parser.parse(&mut buf), Ok(false));
    assert_eq!(parser.state(), ParseState::RequestLine);
    assert_eq!(buf.readable_bytes(), 10);

    buf.append(&raw[10..30]);
    assert_eq!(parser.parse(&mut buf), Ok(false));
    assert_eq!(parser.state(), ParseState::Headers);

    buf.append(&raw[30..]);
    assert_eq!(parser.parse(&mut buf), Ok(true));
    assert!(parser.request().keep_alive());
    assert_eq!(buf.readable_bytes(), 0);
}

#[test]
fn test_parse_body_by_content_length() {
    let mut buf = buffer_of(b"POST /upload HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel");
    let mut parser = RequestParser::new();

    assert_eq!(parser.parse(&mut buf), Ok(false));
    assert_eq!(parser.state(), ParseState::Body);

    buf.append(b"lo");
    assert_eq!(parser.parse(&mut buf), Ok(true));
    assert_eq!(parser.request().body, b"hello");
}

#[test]
fn test_parse_form_post() {
    let mut buf = buffer_of(
        b"POST /login HTTP/1.1\r\n\
          Content-Type: application/x-www-form-urlencoded\r\n\
          Content-Length: 37\r\n\
          \r\n\
          username=J%C3%BCrgen+K&password=a%26b",
    );
    let mut parser = RequestParser::new();

    assert_eq!(parser.parse(&mut buf), Ok(true));
    let req = parser.request();
    assert_eq!(req.path, "/login.html");
    assert_eq!(req.form_value("username"), Some("Jürgen K"));
    assert_eq!(req.form_value("password"), Some("a&b"));
}

#[test]
fn test_parse_body_line_without_content_length() {
    let mut buf = buffer_of(
        b"POST /register HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\nusername=bo&password=pw",
    );
    let mut parser = RequestParser::new();

    assert_eq!(parser.parse(&mut buf), Ok(true));
    assert_eq!(parser.request().form_value("username"), Some("bo"));
    assert_eq!(parser.request().form_value("password"), Some("pw"));
}

#[test]
fn test_parse_every_state_resumes_on_later_input() {
    let mut buf = buffer_of(b"POST /upload HTTP/1.1\r\nContent-Length: 2\r\n\r\n");
    let mut parser = RequestParser::new();

    // Headers done, body not yet arrived: the parser parks in Body.
    assert_eq!(parser.parse(&mut buf), Ok(false));
    assert_eq!(parser.state(), ParseState::Body);
    assert_eq!(parser.parse(&mut buf), Ok(false));
    assert_eq!(parser.state(), ParseState::Body);

    buf.append(b"okGET");
    assert_eq!(parser.parse(&mut buf), Ok(true));
    assert_eq!(parser.request().body, b"ok");
    assert_eq!(buf.peek(), b"GET");
}

#[test]
fn test_parser_reset_starts_new_cycle() {
    let mut buf = buffer_of(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");
    let mut parser = RequestParser::new();

    assert_eq!(parser.parse(&mut buf), Ok(true));
    assert_eq!(parser.request().path, "/a");

    // A finished parser consumes nothing more until reset.
    assert_eq!(parser.parse(&mut buf), Ok(true));
    assert_eq!(parser.request().path, "/a");

    parser.reset();
    assert_eq!(parser.parse(&mut buf), Ok(true));
    assert_eq!(parser.request().path, "/b");
}

#[test]
fn test_decode_form_standard_percent_decoding() {
    let form = decode_form(b"a=%41%42&b=x+y&c=");
    assert_eq!(form.get("a").map(String::as_str), Some("AB"));
    assert_eq!(form.get("b").map(String::as_str), Some("x y"));
    assert_eq!(form.get("c").map(String::as_str), Some(""));
}
