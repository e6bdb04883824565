use crate::connection::ClientConnection;
use crate::handler::Handler;
use crate::http::parse_request;
use crate::prelude::*;
use crate::transport::ControlChannel;

/// A worker never calls `accept` -- all listening lives in the
/// supervisor. It spends its whole life alternating between receiving a
/// client descriptor over its control channel and serving exactly one
/// request on it.
pub fn run(channel: ControlChannel, handler: Arc<dyn Handler>, cfg: Arc<AppConfig>) -> i32 {
    info!("worker {} entering serve loop", std::process::id());

    loop {
        let (stream, peer_addr) = match channel.receive() {
            Ok(pair) => pair,
            Err(ServerError::TransportBroken(_)) => {
                info!("worker {} control channel closed, exiting", std::process::id());
                return 0;
            }
            Err(e) => {
                errors!("worker {} failed to receive connection: {}", std::process::id(), e);
                return 1;
            }
        };

        if let Err(e) = serve_one(stream, peer_addr, &handler, &cfg) {
            if !e.is_silent() {
                warn!("worker {} request failed: {}", std::process::id(), e);
            }
        }
    }
}

fn serve_one(
    stream: std::net::TcpStream,
    peer_addr: SocketAddr,
    handler: &Arc<dyn Handler>,
    cfg: &AppConfig,
) -> Result<()> {
    let io_timeout = Duration::from_secs(cfg.request_timeout);
    let connection_timeout = Duration::from_secs(cfg.connection_timeout);
    let mut conn = ClientConnection::new(stream, peer_addr, io_timeout, connection_timeout)
        .map_err(ServerError::PeerBroken)?;

    conn.check_deadline()?;

    let max_head_size = cfg.read_buffer;
    let peer_addr = conn.peer_addr;
    let response: Result<ResponseFrame> = (|| {
        let mut stream_clone = conn.try_clone().map_err(ServerError::PeerBroken)?;
        let mut req = parse_request(&mut stream_clone, max_head_size)?;
        conn.check_deadline()?;
        handler.handle(&mut req, peer_addr, cfg)
    })();

    let response = match response {
        Ok(frame) => frame,
        Err(e) if e.is_silent() => return Err(e),
        Err(e) => ResponseFrame::error(e.status_code()),
    };

    conn.stream
        .write_all(&response.to_bytes())
        .map_err(ServerError::PeerBroken)?;
    Ok(())
}
