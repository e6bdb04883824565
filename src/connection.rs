use std::net::TcpStream;

use crate::prelude::*;

/// An accepted client socket, owned by exactly one worker for the
/// lifetime of one request/response exchange. Carries the two timers the
/// worker enforces: a per-I/O-operation timeout (applied to the
/// underlying socket directly) and a whole-connection deadline checked
/// between parsing phases.
pub struct ClientConnection {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    deadline: Instant,
}

impl ClientConnection {
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        io_timeout: Duration,
        connection_timeout: Duration,
    ) -> std::io::Result<Self> {
        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_write_timeout(Some(io_timeout))?;
        Ok(Self {
            stream,
            peer_addr,
            deadline: Instant::now() + connection_timeout,
        })
    }

    /// Returns an error once the whole-connection deadline has elapsed.
    /// Called between request phases so a slow client can't hold a
    /// worker hostage indefinitely even if every individual read/write
    /// stays under the per-I/O timeout.
    pub fn check_deadline(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(ServerError::PeerBroken(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection deadline exceeded",
            )));
        }
        Ok(())
    }

    pub fn try_clone(&self) -> std::io::Result<TcpStream> {
        self.stream.try_clone()
    }
}
