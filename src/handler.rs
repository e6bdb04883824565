use std::fs;
use std::path::{Path, PathBuf};

use crate::cgi::{CgiPump, Direction, PumpOutcome};
use crate::http::{get_mime_type, Method};
use crate::prelude::*;

/// The external collaborator this crate treats as a pluggable boundary:
/// given a parsed request, produce a response. Routing, virtual hosts,
/// and access control all live on the far side of this trait; the one
/// implementation shipped here is just enough to serve static files and
/// dispatch `.cgi`-suffixed paths to a script.
pub trait Handler: Send + Sync {
    fn handle(
        &self,
        req: &mut RequestMeta,
        remote_addr: SocketAddr,
        cfg: &AppConfig,
    ) -> Result<ResponseFrame>;
}

/// Serves files under `document_root`; a request target ending in
/// `.cgi` is executed as a CGI script instead of being read as a file.
pub struct StaticCgiHandler {
    pub document_root: PathBuf,
}

impl StaticCgiHandler {
    pub fn new(document_root: impl Into<PathBuf>) -> Self {
        Self {
            document_root: document_root.into(),
        }
    }

    fn resolve_path(&self, request_target: &str) -> PathBuf {
        let path = request_target.split('?').next().unwrap_or("/");
        let relative = path.trim_start_matches('/');
        self.document_root.join(if relative.is_empty() {
            "index.html"
        } else {
            relative
        })
    }
}

impl Handler for StaticCgiHandler {
    fn handle(
        &self,
        req: &mut RequestMeta,
        remote_addr: SocketAddr,
        cfg: &AppConfig,
    ) -> Result<ResponseFrame> {
        let path = self.resolve_path(&req.request_target);

        if path.extension().and_then(|e| e.to_str()) == Some("cgi") {
            return run_cgi(&path, req, remote_addr, cfg);
        }

        if !matches!(req.method, Method::Get | Method::Head) {
            return Ok(ResponseFrame::error(405));
        }

        match fs::read(&path) {
            Ok(body) => {
                let ext = path.extension().and_then(|e| e.to_str());
                Ok(ResponseFrame::with_body(200, get_mime_type(ext), body))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ResponseFrame::error(404)),
            Err(_) => Ok(ResponseFrame::error(500)),
        }
    }
}

fn run_cgi(
    script_path: &Path,
    req: &mut RequestMeta,
    remote_addr: SocketAddr,
    cfg: &AppConfig,
) -> Result<ResponseFrame> {
    let mut request_body = Vec::new();
    req.body_reader
        .read_to_end(&mut request_body)
        .map_err(ServerError::PeerBroken)?;

    let mut pump = CgiPump::spawn(script_path, req, request_body, remote_addr, cfg)?;
    let grace = Duration::from_secs(cfg.process_sigterm_timeout);
    let deadline = std::time::Instant::now() + Duration::from_secs(cfg.request_timeout);

    let mut poll = mio::Poll::new().map_err(ServerError::Io)?;
    let mut events = mio::Events::with_capacity(4);
    const PUMP_TOKEN: mio::Token = mio::Token(0);
    let mut registered: Option<(std::os::fd::RawFd, Direction)> = None;

    loop {
        if std::time::Instant::now() >= deadline {
            pump.terminate(grace);
            return Ok(ResponseFrame::error(504));
        }

        match pump.step() {
            Ok(PumpOutcome::Done(response)) => return Ok(response),
            Ok(PumpOutcome::Pending(fd, direction)) => {
                let interest = match direction {
                    Direction::Readable => mio::Interest::READABLE,
                    Direction::Writable => mio::Interest::WRITABLE,
                };
                let mut source = mio::unix::SourceFd(&fd);
                match registered {
                    Some((prev_fd, prev_dir)) if prev_fd == fd && prev_dir == direction => {}
                    Some((prev_fd, _)) if prev_fd == fd => {
                        poll.registry()
                            .reregister(&mut source, PUMP_TOKEN, interest)
                            .map_err(ServerError::Io)?;
                    }
                    Some((mut prev_fd, _)) => {
                        let mut prev_source = mio::unix::SourceFd(&mut prev_fd);
                        let _ = poll.registry().deregister(&mut prev_source);
                        poll.registry()
                            .register(&mut source, PUMP_TOKEN, interest)
                            .map_err(ServerError::Io)?;
                    }
                    None => {
                        poll.registry()
                            .register(&mut source, PUMP_TOKEN, interest)
                            .map_err(ServerError::Io)?;
                    }
                }
                registered = Some((fd, direction));

                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                poll.poll(&mut events, Some(remaining.min(Duration::from_millis(200))))
                    .map_err(ServerError::Io)?;
            }
            Err(e) => {
                pump.terminate(grace);
                return Err(e);
            }
        }
    }
}
