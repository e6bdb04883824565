use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;

use sendfd::{RecvWithFd, SendWithFd};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

const MAX_PAYLOAD: usize = 4096;

/// Wire shape is a one-element array wrapping the `[host, port]` pair
/// (`[["host", port]]`), not a bare two-element array, so the payload can
/// grow a second slot later without breaking framing.
#[derive(Serialize, Deserialize)]
struct AddrPayload([(String, u16); 1]);

/// The point-to-point channel a supervisor and one worker use to hand
/// off accepted client sockets. Backed by a pre-established
/// `UnixStream` pair; each logical message carries exactly one
/// descriptor plus a small JSON payload describing the peer address.
pub struct ControlChannel {
    socket: UnixStream,
}

impl ControlChannel {
    /// The first socket of the pair (conventionally the supervisor's end,
    /// used for `send`) is put in non-blocking mode so a worker that
    /// hasn't drained its previous message can never stall the
    /// supervisor's accept loop; the second (the worker's end, used for
    /// `receive`) is left blocking since a worker is meant to block
    /// waiting for its next connection.
    pub fn pair() -> std::io::Result<(ControlChannel, ControlChannel)> {
        let (a, b) = UnixStream::pair()?;
        a.set_nonblocking(true)?;
        Ok((ControlChannel { socket: a }, ControlChannel { socket: b }))
    }

    pub fn from_socket(socket: UnixStream) -> Self {
        Self { socket }
    }

    pub fn try_clone(&self) -> std::io::Result<ControlChannel> {
        Ok(ControlChannel {
            socket: self.socket.try_clone()?,
        })
    }

    /// The underlying descriptor, for a sibling worker that needs to
    /// close someone else's channel after fork without taking ownership
    /// of it.
    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Hands `stream` and its peer address to the channel's other end.
    /// The descriptor is duplicated by the kernel into the receiving
    /// process; the caller keeps ownership of its own `stream` and is
    /// still responsible for closing it afterward.
    pub fn send(&self, stream: &TcpStream, addr: SocketAddr) -> Result<(), ServerError> {
        let payload = AddrPayload([(addr.ip().to_string(), addr.port())]);
        let bytes = serde_json::to_vec(&payload).map_err(|e| {
            ServerError::TransportBroken(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        self.socket.send_with_fd(&bytes, &[stream]).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                ServerError::TransportWouldBlock
            } else {
                ServerError::TransportBroken(e)
            }
        })?;
        Ok(())
    }

    /// Blocks until a client descriptor and its address arrive. Fails
    /// with `TransportBroken` on EOF and `TransportTruncated` if no
    /// descriptor accompanied the payload.
    pub fn receive(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        let mut buf = [0u8; MAX_PAYLOAD];
        let mut fds: [RawFd; 1] = [-1];

        let (n, fd_count) = self
            .socket
            .recv_with_fd(&mut buf, &mut fds)
            .map_err(ServerError::TransportBroken)?;

        if n == 0 {
            return Err(ServerError::TransportBroken(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "control channel closed",
            )));
        }
        if fd_count != 1 {
            return Err(ServerError::TransportTruncated);
        }

        let AddrPayload([(host, port)]) = serde_json::from_slice(&buf[..n])
            .map_err(|_| ServerError::TransportTruncated)?;
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| ServerError::TransportTruncated)?;

        let stream = unsafe { TcpStream::from_raw_fd(fds[0]) };
        Ok((stream, addr))
    }

    /// Idempotently closes the local end by dropping the socket; callers
    /// hold this in an `Option` when they need to discard it before the
    /// struct itself goes out of scope.
    pub fn discard(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn send_receive_round_trip_preserves_address_and_data() {
        let (sender, receiver) = ControlChannel::pair().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let peer_addr: SocketAddr = "203.0.113.7:54321".parse().unwrap();

        sender.send(&client, peer_addr).unwrap();
        let (_received, received_addr) = receiver.receive().unwrap();
        assert_eq!(received_addr, peer_addr);
    }
}
