use crate::http::headers::HeaderMap;

/// The assembled HTTP response a handler produces. `headers` preserves
/// insertion order for emission; `Content-Length` is filled in from the
/// body length at serialization time if the handler didn't set one.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    pub version: String,
    pub status_code: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ResponseFrame {
    pub fn new(status_code: u16) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status_code,
            reason: status_text(status_code).to_string(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(status_code: u16, content_type: &str, body: Vec<u8>) -> Self {
        let mut res = Self::new(status_code);
        res.headers.set("Content-Type", content_type);
        res.body = body;
        res
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    pub fn set_status(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.reason = status_text(code).to_string();
        self
    }

    /// Serializes the status line, headers, and body as bytes ready to
    /// write to the client socket. Fills in `Content-Length` if absent.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            "{} {} {}\r\n",
            self.version, self.status_code, self.reason
        )
        .into_bytes();

        for (name, value) in self.headers.iter() {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        if self.headers.get("content-length").is_none() {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// A canonical error response for the propagation policy: the status
    /// line and a short plain-text body, `Connection: close` set so the
    /// worker knows not to attempt to reuse the socket.
    pub fn error(code: u16) -> Self {
        let body = format!("{} {}", code, status_text(code)).into_bytes();
        let mut res = Self::with_body(code, "text/plain", body);
        res.set_header("Connection", "close");
        res
    }
}

pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_in_content_length() {
        let res = ResponseFrame::with_body(200, "text/plain", b"hello".to_vec());
        let bytes = res.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("hello"));
    }

    #[test]
    fn respects_explicit_content_length() {
        let mut res = ResponseFrame::new(204);
        res.set_header("Content-Length", "0");
        let bytes = res.to_bytes();
        assert_eq!(bytes.iter().filter(|&&b| b == b':').count(), 1);
    }

    #[test]
    fn error_response_closes_connection() {
        let res = ResponseFrame::error(502);
        assert_eq!(res.headers.get("connection"), Some("close"));
        assert!(String::from_utf8(res.body.clone()).unwrap().contains("Bad Gateway"));
    }
}
