use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::http::{Method, RequestMeta};
use crate::prelude::*;

/// Which direction of I/O the pump needs to make progress. The worker
/// registers exactly this interest with its private poller before the
/// next `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Readable,
    Writable,
}

pub enum PumpOutcome {
    /// The pump made no further progress without blocking; wait for
    /// `fd` to become ready for `direction` and call `step` again.
    Pending(RawFd, Direction),
    Done(ResponseFrame),
}

#[derive(Debug, PartialEq)]
enum PumpState {
    WritingBody,
    ReadingMeta,
    ReadingBody,
}

/// Drives one CGI invocation to completion: writes the request body to
/// the script's stdin, reads its stdout, splits the meta header block
/// off the response, and accumulates the rest as the response body. Both
/// pipes are non-blocking; `step` never blocks and is meant to be called
/// from a loop that waits on readiness between calls.
pub struct CgiPump {
    child: Child,
    stdin_fd: Option<RawFd>,
    stdout_fd: RawFd,
    request_body: Vec<u8>,
    request_body_pos: usize,
    meta_buf: Vec<u8>,
    body_buf: Vec<u8>,
    state: PumpState,
    meta_limit: usize,
    started_at: Instant,
}

impl CgiPump {
    pub fn spawn(
        script_path: &Path,
        req: &RequestMeta,
        request_body: Vec<u8>,
        remote_addr: SocketAddr,
        cfg: &AppConfig,
    ) -> Result<Self> {
        let mut cmd = Command::new(script_path);
        cmd.envs(build_cgi_env(req, remote_addr, cfg))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(ServerError::CGISpawnFailed)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("stdout was piped");

        let stdin_fd = stdin.as_ref().map(|s| s.as_raw_fd());
        let stdout_fd = stdout.as_raw_fd();
        set_nonblocking(stdout_fd)?;
        if let Some(fd) = stdin_fd {
            set_nonblocking(fd)?;
        }

        // Leak the typed handles into raw fds: we read/write through the
        // raw descriptor directly so the pump isn't tied to `Child`'s
        // borrow of them, and `Child` still closes them on drop.
        std::mem::forget(stdin);
        std::mem::forget(stdout);

        let state = if request_body.is_empty() {
            PumpState::ReadingMeta
        } else {
            PumpState::WritingBody
        };

        Ok(Self {
            child,
            stdin_fd,
            stdout_fd,
            request_body,
            request_body_pos: 0,
            meta_buf: Vec::new(),
            body_buf: Vec::new(),
            state,
            meta_limit: cfg.cgi_res_meta_limit,
            started_at: Instant::now(),
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Performs one non-blocking unit of I/O and advances the state
    /// machine. Returns `Pending` with the fd/direction to wait on next,
    /// or `Done` once the whole response has been assembled.
    pub fn step(&mut self) -> Result<PumpOutcome> {
        loop {
            match self.state {
                PumpState::WritingBody => match self.write_body()? {
                    Some(outcome) => return Ok(outcome),
                    None => self.state = PumpState::ReadingMeta,
                },
                PumpState::ReadingMeta => match self.read_meta()? {
                    Some(outcome) => return Ok(outcome),
                    None => self.state = PumpState::ReadingBody,
                },
                PumpState::ReadingBody => match self.read_body()? {
                    Some(outcome) => return Ok(outcome),
                    None => return Ok(PumpOutcome::Done(self.finish()?)),
                },
            }
        }
    }

    fn write_body(&mut self) -> Result<Option<PumpOutcome>> {
        let Some(fd) = self.stdin_fd else {
            return Ok(None);
        };
        if self.request_body_pos >= self.request_body.len() {
            close_fd(fd);
            self.stdin_fd = None;
            return Ok(None);
        }

        let remaining = &self.request_body[self.request_body_pos..];
        match write_raw(fd, remaining) {
            Ok(n) => {
                self.request_body_pos += n;
                Ok(None)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Ok(Some(PumpOutcome::Pending(fd, Direction::Writable)))
            }
            Err(e) => Err(ServerError::CGIProtocolError(format!(
                "failed writing request body to script: {e}"
            ))),
        }
    }

    fn read_meta(&mut self) -> Result<Option<PumpOutcome>> {
        if let Some(sep) = find_subsequence(&self.meta_buf, b"\n\n") {
            let remainder = self.meta_buf.split_off(sep + 2);
            self.meta_buf.truncate(sep);
            self.body_buf = remainder;
            return Ok(None);
        }
        if self.meta_buf.len() > self.meta_limit {
            return Err(ServerError::CGIProtocolError(
                "cgi response meta too long".to_string(),
            ));
        }

        let mut chunk = [0u8; 4096];
        match read_raw(self.stdout_fd, &mut chunk) {
            Ok(0) => Err(ServerError::CGIProtocolError(
                "script closed stdout before sending a complete meta block".to_string(),
            )),
            Ok(n) => {
                self.meta_buf.extend_from_slice(&chunk[..n]);
                Ok(None)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Some(PumpOutcome::Pending(
                self.stdout_fd,
                Direction::Readable,
            ))),
            Err(e) => Err(ServerError::CGIProtocolError(format!(
                "failed reading cgi script output: {e}"
            ))),
        }
    }

    fn read_body(&mut self) -> Result<Option<PumpOutcome>> {
        let mut chunk = [0u8; 4096];
        match read_raw(self.stdout_fd, &mut chunk) {
            Ok(0) => Ok(None),
            Ok(n) => {
                self.body_buf.extend_from_slice(&chunk[..n]);
                self.step_again()
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Some(PumpOutcome::Pending(
                self.stdout_fd,
                Direction::Readable,
            ))),
            Err(e) => Err(ServerError::CGIProtocolError(format!(
                "failed reading cgi script output: {e}"
            ))),
        }
    }

    fn step_again(&mut self) -> Result<Option<PumpOutcome>> {
        // Keep draining stdout until it would block or hits EOF; the
        // caller's loop in `step` re-enters `read_body` on `Ok(None)`.
        self.read_body()
    }

    fn finish(&mut self) -> Result<ResponseFrame> {
        let _ = self.child.wait();
        let (status, headers) = parse_meta(&self.meta_buf)?;
        let mut res = ResponseFrame::new(status);
        for (name, value) in headers {
            res.set_header(&name, &value);
        }
        res.body = std::mem::take(&mut self.body_buf);
        Ok(res)
    }

    /// Terminates the script: SIGTERM first, then SIGKILL if it hasn't
    /// exited after `grace`. Always reaps before returning.
    pub fn terminate(&mut self, grace: Duration) {
        let pid = Pid::from_raw(self.child.id() as i32);
        let _ = kill(pid, Signal::SIGTERM);

        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                _ => break,
            }
        }
        let _ = kill(pid, Signal::SIGKILL);
        let _ = self.child.wait();
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(ServerError::ForkUnavailable)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(ServerError::ForkUnavailable)?;
    Ok(())
}

fn close_fd(fd: RawFd) {
    unsafe {
        nix::libc::close(fd);
    }
}

fn read_raw(fd: RawFd, buf: &mut [u8]) -> std::io::Result<usize> {
    let n = unsafe { nix::libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
    if n < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn write_raw(fd: RawFd, buf: &[u8]) -> std::io::Result<usize> {
    let n = unsafe { nix::libc::write(fd, buf.as_ptr() as *const _, buf.len()) };
    if n < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Splits a CGI meta block (`name: value` lines separated by a single
/// `\n`) into a status code and the remaining headers. A `Status` line
/// sets the code; its absence defaults to 200.
fn parse_meta(raw: &[u8]) -> Result<(u16, Vec<(String, String)>)> {
    let text = String::from_utf8_lossy(raw);
    let mut status = 200;
    let mut headers = Vec::new();

    for line in text.split('\n') {
        if line.trim().is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(ServerError::CGIProtocolError(format!(
                "malformed cgi meta line: {line}"
            )));
        };
        let name = name.trim();
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("status") {
            status = value
                .split_whitespace()
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200);
        } else {
            headers.push((name.to_string(), value));
        }
    }

    Ok((status, headers))
}

/// Builds the CGI/1.1 environment for one request. Deliberately the
/// fixed, minimal set this repository's CGI scripts rely on -- no
/// per-header `HTTP_*` passthrough, since handlers are scripts written
/// against that minimal contract, not general reverse-proxy targets.
pub fn build_cgi_env(
    req: &RequestMeta,
    remote_addr: SocketAddr,
    cfg: &AppConfig,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    let query_string = req
        .request_target
        .split_once('?')
        .map(|(_, q)| q.to_string())
        .unwrap_or_default();

    env.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    env.insert("QUERY_STRING".to_string(), query_string);
    env.insert("REMOTE_ADDR".to_string(), remote_addr.ip().to_string());
    env.insert(
        "REQUEST_METHOD".to_string(),
        method_str(req.method).to_string(),
    );
    env.insert("SERVER_PORT".to_string(), cfg.port.to_string());
    env.insert("SERVER_PROTOCOL".to_string(), cfg.protocol.clone());

    if let Some(cl) = req.headers.get("content-length") {
        env.insert("CONTENT_LENGTH".to_string(), cl.to_string());
    }

    env
}

fn method_str(method: Method) -> &'static str {
    method.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meta_and_promotes_status() {
        let raw = b"Status: 404 Not Found\nContent-Type: text/plain";
        let (status, headers) = parse_meta(raw).unwrap();
        assert_eq!(status, 404);
        assert_eq!(headers, vec![("Content-Type".to_string(), "text/plain".to_string())]);
    }

    #[test]
    fn defaults_to_200_without_status_line() {
        let raw = b"Content-Type: text/html";
        let (status, _) = parse_meta(raw).unwrap();
        assert_eq!(status, 200);
    }

    #[test]
    fn rejects_malformed_meta_line() {
        let raw = b"not-a-header-line";
        assert!(parse_meta(raw).is_err());
    }

    #[test]
    fn finds_lf_lf_separator() {
        let haystack = b"a: 1\nb: 2\n\nbody";
        assert_eq!(find_subsequence(haystack, b"\n\n"), Some(9));
    }
}
