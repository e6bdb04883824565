use std::io::Cursor;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;

use preforkd::config::AppConfig;
use preforkd::handler::{Handler, StaticCgiHandler};
use preforkd::http::parse_request;

fn remote() -> SocketAddr {
    "127.0.0.1:54321".parse().unwrap()
}

#[test]
fn serves_an_existing_static_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"<h1>hi</h1>").unwrap();

    let handler = StaticCgiHandler::new(dir.path());
    let cfg = AppConfig::default();

    let raw = b"GET / HTTP/1.1\r\n\r\n";
    let mut cursor = Cursor::new(raw.to_vec());
    let mut req = parse_request(&mut cursor, 4096).unwrap();

    let res = handler.handle(&mut req, remote(), &cfg).unwrap();
    assert_eq!(res.status_code, 200);
    assert_eq!(res.body, b"<h1>hi</h1>");
}

#[test]
fn missing_static_file_yields_404() {
    let dir = tempfile::tempdir().unwrap();
    let handler = StaticCgiHandler::new(dir.path());
    let cfg = AppConfig::default();

    let raw = b"GET /nope.html HTTP/1.1\r\n\r\n";
    let mut cursor = Cursor::new(raw.to_vec());
    let mut req = parse_request(&mut cursor, 4096).unwrap();

    let res = handler.handle(&mut req, remote(), &cfg).unwrap();
    assert_eq!(res.status_code, 404);
}

#[test]
fn runs_a_cgi_script_and_promotes_its_status_line() {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("echo.cgi");
    std::fs::write(
        &script_path,
        "#!/bin/sh\nprintf 'Status: 201 Created\\nContent-Type: text/plain\\n\\nhello from cgi'\n",
    )
    .unwrap();
    std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let handler = StaticCgiHandler::new(dir.path());
    let cfg = AppConfig::default();

    let raw = b"GET /echo.cgi HTTP/1.1\r\n\r\n";
    let mut cursor = Cursor::new(raw.to_vec());
    let mut req = parse_request(&mut cursor, 4096).unwrap();

    let res = handler.handle(&mut req, remote(), &cfg).unwrap();
    assert_eq!(res.status_code, 201);
    assert_eq!(res.body, b"hello from cgi");
}
