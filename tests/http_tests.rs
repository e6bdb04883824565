use std::io::{Cursor, Read};

use preforkd::http::{parse_request, Method, ResponseFrame};

#[test]
fn request_round_trips_headers_in_order_and_body_bytes() {
    let raw = b"POST /submit HTTP/1.1\r\na: 1\r\nb: 2\r\nContent-Length: 3\r\n\r\nxyz";
    let mut cursor = Cursor::new(raw.to_vec());
    let mut req = parse_request(&mut cursor, 8192).unwrap();

    assert_eq!(req.method, Method::Post);
    assert_eq!(req.request_target, "/submit");

    let names: Vec<&str> = req.headers.iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["a", "b", "Content-Length"]);

    let mut body = Vec::new();
    req.body_reader.read_to_end(&mut body).unwrap();
    assert_eq!(body, b"xyz");
}

#[test]
fn response_frame_serializes_a_well_formed_status_line_and_headers() {
    let mut res = ResponseFrame::with_body(201, "application/json", br#"{"ok":true}"#.to_vec());
    res.set_header("X-Request-Id", "abc123");

    let bytes = res.to_bytes();
    let text = String::from_utf8(bytes).unwrap();

    assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
    assert!(text.contains("Content-Type: application/json\r\n"));
    assert!(text.contains("X-Request-Id: abc123\r\n"));
    assert!(text.contains("Content-Length: 12\r\n"));
    assert!(text.ends_with("{\"ok\":true}"));
}

#[test]
fn malformed_request_line_is_rejected_before_any_header_is_read() {
    let raw = b"NOT A REQUEST LINE AT ALL\r\nHost: x\r\n\r\n";
    let mut cursor = Cursor::new(raw.to_vec());
    assert!(parse_request(&mut cursor, 8192).is_err());
}
