use std::io::Write;
use std::net::{SocketAddrV4, TcpListener};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::socket::{bind, listen, setsockopt, socket, sockopt::ReuseAddr};
use nix::sys::socket::{AddressFamily, Backlog, SockFlag, SockType, SockaddrIn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{fork, ForkResult, Pid};

use proxy_log::{errors, info, warn};

use crate::config::AppConfig;
use crate::error::ServerError;
use crate::handler::Handler;
use crate::http::ResponseFrame;
use crate::signals;
use crate::timeouts::kill_if_hanged;
use crate::transport::ControlChannel;
use crate::worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Forking,
    Active,
    Terminating,
    Reaped,
}

/// One entry in the supervisor's pool. `channel` is the supervisor's end
/// of the pair created before fork; the worker holds the other end.
pub struct Worker {
    pub pid: i32,
    pub created_at: Instant,
    pub channel: ControlChannel,
    pub sigterm_sent_at: Option<Instant>,
    pub state: WorkerState,
}

impl Worker {
    pub fn eligible(&self) -> bool {
        matches!(self.state, WorkerState::Active)
    }
}

/// Owns the listening socket and the worker pool. Never touches a client
/// connection's bytes itself -- its only jobs are accepting, handing off
/// descriptors, and keeping the pool at `process_count_limit`.
pub struct Supervisor {
    listener: TcpListener,
    pool: Vec<Worker>,
    handler: Arc<dyn Handler>,
    cfg: Arc<AppConfig>,
    accepted_connections: usize,
}

impl Supervisor {
    pub fn bind(cfg: Arc<AppConfig>, handler: Arc<dyn Handler>) -> Result<Self, ServerError> {
        let listener = bind_listener(&cfg)?;
        let mut supervisor = Self {
            listener,
            pool: Vec::with_capacity(cfg.process_count_limit),
            handler,
            cfg,
            accepted_connections: 0,
        };
        supervisor.refill()?;
        Ok(supervisor)
    }

    /// Runs until a shutdown signal is observed, then tears the pool
    /// down and returns the process exit code.
    pub fn run(mut self) -> i32 {
        info!(
            "supervisor listening on {} with {} workers",
            self.listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            self.cfg.process_count_limit
        );

        loop {
            if signals::shutdown_requested() {
                info!("shutdown requested, entering teardown");
                self.shutdown();
                return 0;
            }

            match self.listener.accept() {
                Ok((stream, addr)) => {
                    self.accepted_connections += 1;
                    self.dispatch(stream, addr);
                }
                Err(e) => {
                    if is_fatal_accept_error(&e) {
                        errors!("fatal accept() error, aborting supervisor: {e}");
                        return 1;
                    }
                    warn!("transient accept() error, continuing: {e}");
                }
            }

            self.reap();
            if let Err(e) = self.refill() {
                // A single failed fork (transient ENOMEM/EAGAIN and the
                // like) degrades the pool, it doesn't end the process --
                // the remaining workers keep serving and a later refill
                // tops the pool back up once resources free up.
                errors!("failed to refill worker pool, continuing short-handed: {e}");
            }
            kill_if_hanged(
                &mut self.pool,
                Duration::from_secs(self.cfg.process_sigterm_timeout),
            );
        }
    }

    /// Distributes one accepted connection to the first eligible worker
    /// starting at the round-robin offset. Closes the supervisor's copy
    /// of the descriptor unconditionally once a worker has it or every
    /// worker has been tried.
    fn dispatch(&mut self, mut stream: std::net::TcpStream, addr: std::net::SocketAddr) {
        let start = self.accepted_connections;
        let mut tried = vec![false; self.pool.len()];

        loop {
            let Some(idx) = select_worker(&self.pool, start, &tried) else {
                break;
            };
            tried[idx] = true;
            let worker = &mut self.pool[idx];
            match worker.channel.send(&stream, addr) {
                Ok(()) => return,
                // The worker's control channel is non-blocking; a full
                // send buffer means it just hasn't drained its previous
                // connection yet, not that it's broken. Try the next
                // eligible worker instead of killing a healthy one.
                Err(ServerError::TransportWouldBlock) => {
                    continue;
                }
                Err(e) => {
                    warn!(
                        "worker {} rejected dispatch, marking terminating: {e}",
                        worker.pid
                    );
                    worker.state = WorkerState::Terminating;
                    worker.sigterm_sent_at = Some(Instant::now());
                    let _ = kill(Pid::from_raw(worker.pid), Signal::SIGTERM);
                }
            }
        }

        let err = ServerError::ForkPoolExhausted;
        warn!("no eligible worker accepted connection from {addr}: {err}");
        let response = ResponseFrame::error(err.status_code());
        let _ = stream.write_all(&response.to_bytes());
    }

    /// Drains the SIGCHLD handler's reaped-pid set and marks the
    /// matching pool entries `Reaped`.
    fn reap(&mut self) {
        let reaped = signals::drain_reaped();
        if reaped.is_empty() {
            return;
        }
        for worker in self.pool.iter_mut() {
            if reaped.contains(&worker.pid) {
                worker.state = WorkerState::Reaped;
            }
        }
    }

    /// Removes reaped entries and forks fresh workers until the pool is
    /// back to `process_count_limit`. The snapshot-then-remove-then-fork
    /// ordering keeps a new child from ever inheriting a pid that is
    /// about to be dropped from the pool.
    fn refill(&mut self) -> Result<(), ServerError> {
        remove_reaped(&mut self.pool);

        while self.pool.len() < self.cfg.process_count_limit {
            let worker = self.spawn_worker()?;
            self.pool.push(worker);
        }
        Ok(())
    }

    fn spawn_worker(&self) -> Result<Worker, ServerError> {
        let (supervisor_end, worker_end) =
            ControlChannel::pair().map_err(ServerError::TransportBroken)?;

        match unsafe { fork() }.map_err(ServerError::ForkUnavailable)? {
            ForkResult::Parent { child } => {
                drop(worker_end);
                Ok(Worker {
                    pid: child.as_raw(),
                    created_at: Instant::now(),
                    channel: supervisor_end,
                    sigterm_sent_at: None,
                    state: WorkerState::Active,
                })
            }
            ForkResult::Child => {
                let _ = nix::unistd::close(self.listener.as_raw_fd());
                for sibling in self.pool.iter() {
                    let _ = nix::unistd::close(sibling.channel.as_raw_fd());
                }
                supervisor_end.discard();
                let _ = signals::reset_to_default();
                let code = worker::run(worker_end, Arc::clone(&self.handler), Arc::clone(&self.cfg));
                std::process::exit(code);
            }
        }
    }

    /// Masks SIGCHLD is not possible to scope cleanly with `nix`'s signal
    /// API here, so instead this relies on the supervisor loop having
    /// already stopped calling `accept`; it closes the listener, signals
    /// every eligible worker, waits the configured grace, then kills
    /// survivors without blocking on `waitpid`.
    fn shutdown(&mut self) {
        drop(std::mem::replace(
            &mut self.listener,
            // listener is about to be discarded; a closed placeholder
            // bound to port 0 avoids holding the real port open further.
            TcpListener::bind("127.0.0.1:0").expect("bind throwaway shutdown placeholder"),
        ));

        for worker in self.pool.iter_mut() {
            if worker.state == WorkerState::Active {
                let _ = kill(Pid::from_raw(worker.pid), Signal::SIGTERM);
                worker.state = WorkerState::Terminating;
                worker.sigterm_sent_at = Some(Instant::now());
            }
        }

        let grace = Duration::from_secs(self.cfg.process_sigterm_timeout);
        std::thread::sleep(grace);

        self.reap();
        for worker in self.pool.iter() {
            if worker.state == WorkerState::Terminating {
                let _ = kill(Pid::from_raw(worker.pid), Signal::SIGKILL);
            }
        }
    }
}

fn bind_listener(cfg: &AppConfig) -> Result<TcpListener, ServerError> {
    let fd = socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )
    .map_err(ServerError::ForkUnavailable)?;

    setsockopt(&fd, ReuseAddr, &true).map_err(ServerError::ForkUnavailable)?;

    let ip: std::net::Ipv4Addr = cfg.host.parse().map_err(|_| {
        ServerError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid host address: {}", cfg.host),
        ))
    })?;
    let addr = SockaddrIn::from(SocketAddrV4::new(ip, cfg.port));
    bind(fd.as_raw_fd(), &addr).map_err(ServerError::ForkUnavailable)?;

    let backlog = Backlog::try_from(cfg.tcp_backlog_size as i32).map_err(ServerError::ForkUnavailable)?;
    listen(&fd, backlog).map_err(ServerError::ForkUnavailable)?;

    Ok(unsafe { TcpListener::from_raw_fd(fd.into_raw_fd()) })
}

/// `accept()` fails fatally on a bad listening descriptor or an argument
/// the kernel will never accept (`EBADF`/`EFAULT`/`EINVAL`/`ENOTSOCK`/
/// `EOPNOTSUPP`); it fails transiently on resource exhaustion or a peer
/// that reset before the connection could be fully established
/// (`EMFILE`/`ENFILE`/`ENOBUFS`/`ENOMEM`/`EPERM`/`EPROTO`/
/// `ECONNABORTED`). Matched on the raw errno rather than `ErrorKind`
/// since several of these collapse to the same `ErrorKind::Other` and
/// would otherwise be indistinguishable.
fn is_fatal_accept_error(e: &std::io::Error) -> bool {
    use nix::libc::{EBADF, EFAULT, EINVAL, ENOTSOCK, EOPNOTSUPP};

    match e.raw_os_error() {
        Some(errno) => matches!(errno, EBADF | EFAULT | EINVAL | ENOTSOCK | EOPNOTSUPP),
        None => false,
    }
}

/// Scans `pool` starting at `start mod pool.len()`, returning the index of
/// the first entry that is eligible and not yet in `tried`. Pulled out of
/// `dispatch` so the round-robin scan order can be tested without a real
/// fd transport.
fn select_worker(pool: &[Worker], start: usize, tried: &[bool]) -> Option<usize> {
    let len = pool.len();
    if len == 0 {
        return None;
    }
    let offset = start % len;
    (0..len)
        .map(|i| (offset + i) % len)
        .find(|&idx| pool[idx].eligible() && !tried[idx])
}

fn remove_reaped(pool: &mut Vec<Worker>) {
    pool.retain(|w| w.state != WorkerState::Reaped);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_worker(pid: i32, state: WorkerState) -> Worker {
        let (channel, _other) = ControlChannel::pair().unwrap();
        Worker {
            pid,
            created_at: Instant::now(),
            channel,
            sigterm_sent_at: None,
            state,
        }
    }

    #[test]
    fn round_robin_distributes_fairly_across_eligible_workers() {
        let pool: Vec<Worker> = (0..3)
            .map(|i| fake_worker(i, WorkerState::Active))
            .collect();

        let mut counts = [0usize; 3];
        for n in 0..9 {
            let tried = vec![false; pool.len()];
            let idx = select_worker(&pool, n, &tried).unwrap();
            counts[idx] += 1;
        }
        assert_eq!(counts, [3, 3, 3]);
    }

    #[test]
    fn round_robin_skips_ineligible_workers() {
        let pool = vec![
            fake_worker(1, WorkerState::Terminating),
            fake_worker(2, WorkerState::Active),
            fake_worker(3, WorkerState::Reaped),
        ];
        let tried = vec![false; pool.len()];
        assert_eq!(select_worker(&pool, 0, &tried), Some(1));
    }

    #[test]
    fn select_worker_returns_none_when_all_tried() {
        let pool = vec![fake_worker(1, WorkerState::Active)];
        let tried = vec![true];
        assert_eq!(select_worker(&pool, 0, &tried), None);
    }

    #[test]
    fn remove_reaped_drops_only_reaped_entries() {
        let mut pool = vec![
            fake_worker(1, WorkerState::Active),
            fake_worker(2, WorkerState::Reaped),
            fake_worker(3, WorkerState::Terminating),
        ];
        remove_reaped(&mut pool);
        assert_eq!(pool.len(), 2);
        assert!(pool.iter().all(|w| w.pid != 2));
    }
}
