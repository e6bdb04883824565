use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::Pid;

/// Guards the SIGCHLD handler against re-entrancy: a handler invocation
/// that finds the flag already set returns immediately, trusting the
/// outer invocation's drain loop to pick up whatever the kernel
/// coalesced in the meantime.
static REAPING: AtomicBool = AtomicBool::new(false);
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Reaped pids are handed from the signal handler to `drain_reaped` through
/// a fixed-size ring of atomics rather than a `Mutex`: the handler runs on
/// the same thread it can interrupt, so any lock it might block on could
/// already be held by the very code it interrupted, deadlocking the process
/// forever. Every slot access here is a single atomic operation, which is
/// safe to perform from inside a signal handler; a `Mutex::lock` is not.
const SLOT_COUNT: usize = 256;
const EMPTY_SLOT: i32 = -1;

const INIT_SLOT: AtomicI32 = AtomicI32::new(EMPTY_SLOT);
static REAPED_SLOTS: [AtomicI32; SLOT_COUNT] = [INIT_SLOT; SLOT_COUNT];
static WRITE_CURSOR: AtomicUsize = AtomicUsize::new(0);
static DRAIN_CURSOR: AtomicUsize = AtomicUsize::new(0);

extern "C" fn handle_sigchld(_: i32) {
    if REAPING.swap(true, Ordering::SeqCst) {
        return;
    }

    loop {
        match nix::sys::wait::waitpid(
            Pid::from_raw(-1),
            Some(nix::sys::wait::WaitPidFlag::WNOHANG),
        ) {
            Ok(nix::sys::wait::WaitStatus::Exited(pid, _))
            | Ok(nix::sys::wait::WaitStatus::Signaled(pid, _, _)) => {
                // If the drain side can't keep up and the ring wraps onto
                // a slot it hasn't read yet, that pid is lost; SLOT_COUNT
                // is sized far above any realistic per-tick reap burst.
                let idx = WRITE_CURSOR.fetch_add(1, Ordering::SeqCst) % SLOT_COUNT;
                REAPED_SLOTS[idx].store(pid.as_raw(), Ordering::SeqCst);
            }
            Ok(nix::sys::wait::WaitStatus::StillAlive) | Err(_) => break,
            _ => continue,
        }
    }

    REAPING.store(false, Ordering::SeqCst);
}

extern "C" fn handle_sigterm(_: i32) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs the supervisor's signal handlers. Must be called exactly
/// once, before the listening socket is bound, so no connection can
/// race a SIGCHLD whose handler isn't installed yet.
pub fn install() -> Result<(), nix::Error> {
    unsafe {
        signal::signal(Signal::SIGCHLD, SigHandler::Handler(handle_sigchld))?;
        signal::signal(Signal::SIGTERM, SigHandler::Handler(handle_sigterm))?;
    }
    Ok(())
}

/// Drains and returns the set of pids reaped since the last call.
pub fn drain_reaped() -> HashSet<i32> {
    let mut out = HashSet::new();
    let write = WRITE_CURSOR.load(Ordering::SeqCst);
    let mut drain = DRAIN_CURSOR.load(Ordering::SeqCst);
    while drain < write {
        let idx = drain % SLOT_COUNT;
        let pid = REAPED_SLOTS[idx].swap(EMPTY_SLOT, Ordering::SeqCst);
        if pid != EMPTY_SLOT {
            out.insert(pid);
        }
        drain += 1;
    }
    DRAIN_CURSOR.store(drain, Ordering::SeqCst);
    out
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Resets a forked worker's signal disposition back to default so a
/// child doesn't inherit the supervisor's SIGCHLD/SIGTERM handlers.
pub fn reset_to_default() -> Result<(), nix::Error> {
    unsafe {
        signal::signal(Signal::SIGCHLD, SigHandler::SigDfl)?;
        signal::signal(Signal::SIGTERM, SigHandler::SigDfl)?;
    }
    Ok(())
}
