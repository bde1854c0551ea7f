//! Request-line parsing and response assembly.
//!
//! The wire contract is deliberately small: the request is an ASCII request
//! line (`METHOD SP PATH SP VERSION CRLF`) whose remaining headers and body
//! are ignored, and the response is a status line, a header block, a blank
//! line and the raw body, sent as one byte string.

use std::time::SystemTime;

use crate::error::ServerError;

/// Identity string injected into every response via the `Server` header.
pub const SERVER_SOFTWARE: &str = "WSGIServer 0.2";

/// The three tokens of an HTTP request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub version: String,
}

/// Parses the first line of `raw` into method, path and version.
///
/// The line must split on whitespace into exactly three tokens; anything
/// else (including an empty or non-UTF-8 line) is
/// [`ServerError::MalformedRequest`]. No partial result is ever returned.
pub fn parse_request_line(raw: &[u8]) -> Result<RequestLine, ServerError> {
    let end = raw.iter().position(|&b| b == b'\n').unwrap_or(raw.len());
    let line = &raw[..end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let text = std::str::from_utf8(line)
        .map_err(|_| ServerError::MalformedRequest(String::from_utf8_lossy(line).into_owned()))?;

    let mut tokens = text.split_whitespace();
    match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
        (Some(method), Some(path), Some(version), None) => Ok(RequestLine {
            method: method.to_owned(),
            path: path.to_owned(),
            version: version.to_owned(),
        }),
        _ => Err(ServerError::MalformedRequest(text.to_owned())),
    }
}

/// Assembles the complete response byte string.
///
/// Emits `HTTP/1.1 {status}`, the application headers in the order given,
/// then the server-injected `Date` and `Server` headers, a blank line, and
/// the concatenated body chunks. Application headers always precede the
/// server headers; header lines use no space after the colon.
pub fn assemble_response(
    status: &str,
    headers: &[(String, String)],
    body: impl IntoIterator<Item = Vec<u8>>,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("HTTP/1.1 {status}\r\n").as_bytes());
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}:{value}\r\n").as_bytes());
    }
    let date = httpdate::fmt_http_date(SystemTime::now());
    out.extend_from_slice(format!("Date:{date}\r\n").as_bytes());
    out.extend_from_slice(format!("Server:{SERVER_SOFTWARE}\r\n").as_bytes());
    out.extend_from_slice(b"\r\n");
    for chunk in body {
        out.extend_from_slice(&chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recovers_all_three_tokens() {
        let line = parse_request_line(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(line.method, "GET");
        assert_eq!(line.path, "/hello");
        assert_eq!(line.version, "HTTP/1.1");
    }

    #[test]
    fn parse_only_looks_at_the_first_line() {
        let line = parse_request_line(b"POST /submit HTTP/1.0\r\nGET /other HTTP/1.1\r\n").unwrap();
        assert_eq!(line.method, "POST");
        assert_eq!(line.path, "/submit");
    }

    #[test]
    fn parse_without_trailing_newline_still_works() {
        let line = parse_request_line(b"GET / HTTP/1.1").unwrap();
        assert_eq!(line.path, "/");
    }

    #[test]
    fn one_token_line_is_malformed() {
        let err = parse_request_line(b"BADLINE\r\n\r\n").unwrap_err();
        assert!(matches!(err, ServerError::MalformedRequest(line) if line == "BADLINE"));
    }

    #[test]
    fn four_token_line_is_malformed() {
        let err = parse_request_line(b"GET /a HTTP/1.1 extra\r\n").unwrap_err();
        assert!(matches!(err, ServerError::MalformedRequest(_)));
    }

    #[test]
    fn empty_input_is_malformed() {
        assert!(matches!(
            parse_request_line(b""),
            Err(ServerError::MalformedRequest(_))
        ));
    }

    #[test]
    fn non_utf8_line_is_malformed() {
        assert!(matches!(
            parse_request_line(b"\xff\xfe /x HTTP/1.1\r\n"),
            Err(ServerError::MalformedRequest(_))
        ));
    }

    #[test]
    fn assembled_response_reparses_with_app_headers_first() {
        let headers = vec![
            ("Content-Type".to_owned(), "text/plain".to_owned()),
            ("X-Custom".to_owned(), "1".to_owned()),
        ];
        let bytes = assemble_response(
            "200 OK",
            &headers,
            vec![b"hi".to_vec(), b" there".to_vec()],
        );

        let mut parsed_headers = [httparse::EMPTY_HEADER; 8];
        let mut response = httparse::Response::new(&mut parsed_headers);
        let status = response.parse(&bytes).unwrap();
        let offset = match status {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => panic!("assembled response did not reparse"),
        };

        assert_eq!(response.code, Some(200));
        assert_eq!(response.reason, Some("OK"));
        let names: Vec<&str> = response.headers.iter().map(|h| h.name).collect();
        assert_eq!(names, ["Content-Type", "X-Custom", "Date", "Server"]);
        assert_eq!(response.headers[0].value, b"text/plain");
        assert_eq!(response.headers[3].value, SERVER_SOFTWARE.as_bytes());
        assert_eq!(&bytes[offset..], b"hi there");

        let date = std::str::from_utf8(response.headers[2].value).unwrap();
        httpdate::parse_http_date(date).expect("Date header is a valid HTTP date");
    }

    #[test]
    fn empty_body_ends_after_blank_line() {
        let bytes = assemble_response("204 No Content", &[], Vec::<Vec<u8>>::new());
        assert!(bytes.ends_with(b"\r\n\r\n"));
        assert!(bytes.starts_with(b"HTTP/1.1 204 No Content\r\n"));
    }
}
