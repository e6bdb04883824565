use std::io::Read;

use crate::error::ServerError;
use crate::http::headers::HeaderMap;

const CRLF_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Other,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Other => "OTHER",
        }
    }
}

impl std::str::FromStr for Method {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, ()> {
        Ok(match s {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            _ => Method::Other,
        })
    }
}

/// A parsed request head plus a lazy, bounded reader over the body. The
/// body is never buffered eagerly -- a handler that doesn't care about the
/// body (a plain GET) never pays for reading it.
pub struct RequestMeta<'a> {
    pub method: Method,
    pub request_target: String,
    pub http_version: String,
    pub headers: HeaderMap,
    pub body_reader: BodyReader<'a>,
}

impl<'a> RequestMeta<'a> {
    pub fn content_length(&self) -> usize {
        self.headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// Reads at most `remaining` bytes from the underlying stream, then
/// reports EOF regardless of what the stream still has buffered. Any
/// bytes already consumed off the head while scanning for the header
/// terminator are replayed first from `carry`.
pub struct BodyReader<'a> {
    stream: &'a mut dyn Read,
    carry: Vec<u8>,
    carry_pos: usize,
    remaining: usize,
}

impl<'a> BodyReader<'a> {
    fn new(stream: &'a mut dyn Read, carry: Vec<u8>, remaining: usize) -> Self {
        Self {
            stream,
            carry,
            carry_pos: 0,
            remaining,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<'a> Read for BodyReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }

        if self.carry_pos < self.carry.len() {
            let available = &self.carry[self.carry_pos..];
            let n = available.len().min(buf.len()).min(self.remaining);
            buf[..n].copy_from_slice(&available[..n]);
            self.carry_pos += n;
            self.remaining -= n;
            return Ok(n);
        }

        let cap = buf.len().min(self.remaining);
        let n = self.stream.read(&mut buf[..cap])?;
        self.remaining -= n;
        Ok(n)
    }
}

/// Reads and parses a request head (request line + headers) from `stream`,
/// enforcing `max_head_size` on the combined size of the head. Leftover
/// bytes read past the head terminator are handed to the returned
/// `BodyReader` as its `carry` so no byte already off the wire is lost.
pub fn parse_request<'a>(
    stream: &'a mut dyn Read,
    max_head_size: usize,
) -> Result<RequestMeta<'a>, ServerError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(end) = find_subsequence(&buf, b"\r\n\r\n", 0) {
            break end;
        }
        if buf.len() > max_head_size {
            return Err(ServerError::RequestTooLarge);
        }
        let n = stream
            .read(&mut chunk)
            .map_err(ServerError::PeerBroken)?;
        if n == 0 {
            if buf.is_empty() {
                return Err(ServerError::ClientClosed);
            }
            return Err(ServerError::BadRequestSyntax(
                "connection closed before headers completed".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = &buf[..head_end];
    let carry = buf[head_end + 4..].to_vec();

    let mut lines = head.split(|&b| b == b'\n').map(|l| {
        if l.ends_with(b"\r") {
            &l[..l.len() - 1]
        } else {
            l
        }
    });

    let request_line = lines
        .next()
        .ok_or_else(|| ServerError::BadRequestSyntax("empty request".to_string()))?;
    let request_line = std::str::from_utf8(request_line)
        .map_err(|_| ServerError::BadRequestSyntax("request line is not utf-8".to_string()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ServerError::BadRequestSyntax("missing method".to_string()))?;
    let request_target = parts
        .next()
        .ok_or_else(|| ServerError::BadRequestSyntax("missing request target".to_string()))?
        .to_string();
    let http_version = parts
        .next()
        .ok_or_else(|| ServerError::BadRequestSyntax("missing http version".to_string()))?
        .to_string();
    if parts.next().is_some() {
        return Err(ServerError::BadRequestSyntax(
            "request line has extra tokens".to_string(),
        ));
    }

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let line = std::str::from_utf8(line)
            .map_err(|_| ServerError::BadRequestSyntax("header is not utf-8".to_string()))?;
        let sep = line
            .find(':')
            .ok_or_else(|| ServerError::BadRequestSyntax(format!("malformed header: {line}")))?;
        headers.push(line[..sep].trim(), line[sep + 1..].trim());
    }

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    Ok(RequestMeta {
        method: method.parse().unwrap_or(Method::Other),
        request_target,
        http_version,
        headers,
        body_reader: BodyReader::new(stream, carry, content_length),
    })
}

pub fn find_subsequence(buffer: &[u8], needle: &[u8], start_offset: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let search_area = buffer.get(start_offset..)?;
    let first_byte = needle[0];
    let mut pos = 0;

    while let Some(rel) = search_area[pos..].iter().position(|&b| b == first_byte) {
        let abs = pos + rel;
        if let Some(candidate) = search_area.get(abs..abs + needle.len()) {
            if candidate == needle {
                return Some(start_offset + abs);
            }
        } else {
            return None;
        }
        pos = abs + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_request_line_and_headers() {
        let raw = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nX-Test: 1\r\n\r\n";
        let mut cursor = Cursor::new(raw.to_vec());
        let req = parse_request(&mut cursor, 8192).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.request_target, "/index.html");
        assert_eq!(req.http_version, "HTTP/1.1");
        assert_eq!(req.headers.get("host"), Some("example.com"));
        assert_eq!(req.headers.get("x-test"), Some("1"));
    }

    #[test]
    fn reads_body_bounded_by_content_length() {
        let raw = b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloEXTRA";
        let mut cursor = Cursor::new(raw.to_vec());
        let mut req = parse_request(&mut cursor, 8192).unwrap();
        let mut body = Vec::new();
        req.body_reader.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn rejects_malformed_request_line() {
        let raw = b"BOGUS\r\n\r\n";
        let mut cursor = Cursor::new(raw.to_vec());
        let err = parse_request(&mut cursor, 8192).unwrap_err();
        assert!(matches!(err, ServerError::BadRequestSyntax(_)));
    }

    #[test]
    fn rejects_oversized_head() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        raw.extend(std::iter::repeat(b'a').take(200));
        let mut cursor = Cursor::new(raw);
        let err = parse_request(&mut cursor, 32).unwrap_err();
        assert!(matches!(err, ServerError::RequestTooLarge));
    }
}
