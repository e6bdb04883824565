use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::prelude::*;
use crate::supervisor::{Worker, WorkerState};

/// Sends SIGKILL to any `Terminating` worker whose sigterm grace has
/// expired. Called once per accept iteration; a worker that exits
/// promptly after SIGTERM is reaped by the SIGCHLD handler long before
/// this ever fires.
pub fn kill_if_hanged(workers: &mut [Worker], sigterm_timeout: Duration) {
    let now = Instant::now();
    for worker in workers.iter_mut() {
        if worker.state != WorkerState::Terminating {
            continue;
        }
        let Some(sent_at) = worker.sigterm_sent_at else {
            continue;
        };
        if now.duration_since(sent_at) > sigterm_timeout {
            warn!(
                "worker {} did not exit within {:?} of SIGTERM, sending SIGKILL",
                worker.pid, sigterm_timeout
            );
            let _ = kill(Pid::from_raw(worker.pid), Signal::SIGKILL);
            worker.sigterm_sent_at = Some(now);
        }
    }
}
