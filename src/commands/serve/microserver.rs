//! Blocking HTTP/1.1 request reader and response writer over any stream.
//!
//! One request per connection, no keep-alive. Chunked bodies are refused and
//! every body needs a `Content-Length`. The body is read through
//! `Read::take`, so a client cannot make the server buffer more than the cap
//! by lying about its length.

use std::io::{Read, Write};
use thiserror::Error;

/// Maximum header section size (32 KiB)
const MAX_HEADER_SIZE: usize = 32 * 1024;

/// Maximum request body size (1 MiB)
pub const MAX_BODY_SIZE: usize = 1_048_576;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parsed HTTP request
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    /// Path without the query string
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP response to write back
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Why a request could not be read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("{0}")]
    Malformed(String),

    #[error("Headers too large")]
    HeadersTooLarge,

    #[error("Request body too large")]
    BodyTooLarge,
}

impl RequestError {
    /// Status code to answer with
    pub fn status(&self) -> u16 {
        match self {
            RequestError::Malformed(_) => 400,
            RequestError::HeadersTooLarge => 431,
            RequestError::BodyTooLarge => 413,
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .map(|pos| pos + HEADER_END.len())
}

/// Read and parse one request.
///
/// `None` means the peer closed the connection before sending anything.
pub fn read_request<R: Read>(stream: &mut R) -> Option<Result<HttpRequest, RequestError>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 1024];

    let header_len = loop {
        match stream.read(&mut chunk) {
            Ok(0) if buf.is_empty() => return None,
            Ok(0) => {
                return Some(Err(RequestError::Malformed(
                    "Connection closed mid-request".to_string(),
                )))
            }
            Ok(n) => {
                let scan_from = buf.len().saturating_sub(HEADER_END.len() - 1);
                buf.extend_from_slice(&chunk[..n]);
                if let Some(end) = find_header_end(&buf[scan_from..]) {
                    break scan_from + end;
                }
                if buf.len() > MAX_HEADER_SIZE {
                    return Some(Err(RequestError::HeadersTooLarge));
                }
            }
            Err(_) if buf.is_empty() => return None,
            Err(e) => return Some(Err(RequestError::Malformed(format!("Read error: {}", e)))),
        }
    };

    if header_len > MAX_HEADER_SIZE {
        return Some(Err(RequestError::HeadersTooLarge));
    }

    Some(parse(stream, &buf, header_len))
}

fn parse<R: Read>(stream: &mut R, buf: &[u8], header_len: usize) -> Result<HttpRequest, RequestError> {
    let mut parsed_headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut parsed_headers);

    match req.parse(&buf[..header_len]) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(RequestError::Malformed("Incomplete HTTP request".to_string()))
        }
        Err(e) => return Err(RequestError::Malformed(format!("HTTP parse error: {}", e))),
    }

    let method = req.method.unwrap_or("").to_string();
    let target = req.path.unwrap_or("/");
    let path = match target.split_once('?') {
        Some((path, _)) => path.to_string(),
        None => target.to_string(),
    };

    let mut headers = Vec::with_capacity(req.headers.len());
    let mut content_length: Option<usize> = None;

    for h in req.headers.iter() {
        let value = String::from_utf8_lossy(h.value).trim().to_string();
        if h.name.eq_ignore_ascii_case("Transfer-Encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            return Err(RequestError::Malformed(
                "Chunked transfer encoding not supported".to_string(),
            ));
        }
        if h.name.eq_ignore_ascii_case("Content-Length") {
            content_length = Some(value.parse().map_err(|_| {
                RequestError::Malformed(format!("Invalid Content-Length: {}", value))
            })?);
        }
        headers.push((h.name.to_string(), value));
    }

    let expects_body = matches!(method.as_str(), "POST" | "PUT" | "PATCH");
    let body = match (expects_body, content_length) {
        (false, None) | (false, Some(0)) => Vec::new(),
        (true, None) => {
            return Err(RequestError::Malformed(format!(
                "{} requires Content-Length",
                method
            )))
        }
        (_, Some(len)) => {
            if len > MAX_BODY_SIZE {
                return Err(RequestError::BodyTooLarge);
            }
            read_body(stream, &buf[header_len..], len)?
        }
    };

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

/// Body bytes: whatever arrived with the headers, then the rest of `len`
fn read_body<R: Read>(stream: &mut R, prefix: &[u8], len: usize) -> Result<Vec<u8>, RequestError> {
    let mut body = Vec::with_capacity(len);
    body.extend_from_slice(&prefix[..prefix.len().min(len)]);

    let remaining = (len - body.len()) as u64;
    stream
        .take(remaining)
        .read_to_end(&mut body)
        .map_err(|e| RequestError::Malformed(format!("Read error: {}", e)))?;

    if body.len() < len {
        return Err(RequestError::Malformed("Connection closed mid-body".to_string()));
    }
    Ok(body)
}

/// Write a response; write errors mean the client went away and are ignored
pub fn write_response<W: Write>(stream: &mut W, response: &HttpResponse) {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        reason(response.status),
        response.body.len()
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");

    let _ = stream.write_all(head.as_bytes());
    if !response.body.is_empty() {
        let _ = stream.write_all(&response.body);
    }
    let _ = stream.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read(raw: &[u8]) -> Option<Result<HttpRequest, RequestError>> {
        read_request(&mut Cursor::new(raw.to_vec()))
    }

    #[test]
    fn test_parse_get_with_query() {
        let req = read(b"GET /health?verbose=1 HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/health");
        assert_eq!(req.header("host"), Some("localhost"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_post_with_body() {
        let body = r#"{"query":"SELECT 1"}"#;
        let raw = format!(
            "POST /api/v1/runner HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let req = read(raw.as_bytes()).unwrap().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/v1/runner");
        assert_eq!(String::from_utf8_lossy(&req.body), body);
    }

    #[test]
    fn test_body_larger_than_first_read() {
        let body = "x".repeat(5000);
        let raw = format!(
            "POST /api/v1/runner HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let req = read(raw.as_bytes()).unwrap().unwrap();
        assert_eq!(req.body.len(), 5000);
    }

    #[test]
    fn test_truncated_body() {
        let raw = b"POST /api/v1/runner HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        let err = read(raw).unwrap().unwrap_err();
        assert!(err.to_string().contains("mid-body"));
    }

    #[test]
    fn test_reject_chunked() {
        let raw = b"POST /api/v1/runner HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        let err = read(raw).unwrap().unwrap_err();
        assert!(err.to_string().contains("Chunked"));
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_post_requires_content_length() {
        let raw = b"POST /api/v1/runner HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let err = read(raw).unwrap().unwrap_err();
        assert!(err.to_string().contains("Content-Length"));
    }

    #[test]
    fn test_oversized_body_rejected_before_reading() {
        let raw = format!(
            "POST /api/v1/runner HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_SIZE + 1
        );
        let err = read(raw.as_bytes()).unwrap().unwrap_err();
        assert_eq!(err, RequestError::BodyTooLarge);
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn test_headers_too_large() {
        let raw = format!(
            "GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n",
            "A".repeat(MAX_HEADER_SIZE)
        );
        let err = read(raw.as_bytes()).unwrap().unwrap_err();
        assert_eq!(err, RequestError::HeadersTooLarge);
    }

    #[test]
    fn test_empty_stream_returns_none() {
        assert!(read(b"").is_none());
    }

    #[test]
    fn test_write_response() {
        let resp = HttpResponse {
            status: 503,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: b"{}".to_vec(),
        };
        let mut buf = Vec::new();
        write_response(&mut buf, &resp);
        let output = String::from_utf8_lossy(&buf);
        assert!(output.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(output.contains("Content-Length: 2\r\n"));
        assert!(output.contains("Connection: close\r\n"));
        assert!(output.contains("Content-Type: application/json\r\n"));
        assert!(output.ends_with("\r\n\r\n{}"));
    }
}
