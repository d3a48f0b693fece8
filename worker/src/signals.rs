//! Hand-rolled signal capture for the worker main loop.
//!
//! `tokio::signal::ctrl_c` (used by `graceful_shutdown`) only covers
//! SIGINT. The worker loop additionally has to react to SIGTERM, SIGQUIT,
//! SIGUSR1, SIGUSR2, SIGCONT and SIGPIPE (spec §4.3), none of which tokio's
//! signal module exposes without the `signal` feature's per-signal streams,
//! which in turn require a multi-threaded reactor this process's
//! fork-before-exec model can't guarantee is safe to hold open across
//! `fork()`. A flag set from an `extern "C"` handler and polled from the
//! main loop sidesteps that entirely.

use std::sync::atomic::{AtomicI32, Ordering};

use nix::sys::signal::{self, SigHandler, Signal};

use crate::error::Error;

static PENDING: AtomicI32 = AtomicI32::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Term,
    Int,
    Quit,
    UsrOne,
    UsrTwo,
    Cont,
    Pipe,
}

impl SignalEvent {
    fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            x if x == Signal::SIGTERM as i32 => Some(SignalEvent::Term),
            x if x == Signal::SIGINT as i32 => Some(SignalEvent::Int),
            x if x == Signal::SIGQUIT as i32 => Some(SignalEvent::Quit),
            x if x == Signal::SIGUSR1 as i32 => Some(SignalEvent::UsrOne),
            x if x == Signal::SIGUSR2 as i32 => Some(SignalEvent::UsrTwo),
            x if x == Signal::SIGCONT as i32 => Some(SignalEvent::Cont),
            x if x == Signal::SIGPIPE as i32 => Some(SignalEvent::Pipe),
            _ => None,
        }
    }

    fn to_raw(self) -> i32 {
        match self {
            SignalEvent::Term => Signal::SIGTERM as i32,
            SignalEvent::Int => Signal::SIGINT as i32,
            SignalEvent::Quit => Signal::SIGQUIT as i32,
            SignalEvent::UsrOne => Signal::SIGUSR1 as i32,
            SignalEvent::UsrTwo => Signal::SIGUSR2 as i32,
            SignalEvent::Cont => Signal::SIGCONT as i32,
            SignalEvent::Pipe => Signal::SIGPIPE as i32,
        }
    }
}

extern "C" fn record_signal(raw: libc::c_int) {
    PENDING.store(raw, Ordering::SeqCst);
}

/// Installs handlers for every signal the worker loop cares about. Must be
/// called once, before the loop starts polling `take_pending`.
pub fn install() -> Result<(), Error> {
    let handler = SigHandler::Handler(record_signal);
    for sig in [
        Signal::SIGTERM,
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGUSR1,
        Signal::SIGUSR2,
        Signal::SIGCONT,
        Signal::SIGPIPE,
    ] {
        unsafe { signal::signal(sig, handler) }.map_err(Error::Signal)?;
    }
    Ok(())
}

/// Drains and returns the most recently recorded signal, if any has arrived
/// since the last call. Later signals overwrite earlier, unread ones; the
/// loop only needs "a shutdown signal happened", not an exact tally.
pub fn take_pending() -> Option<SignalEvent> {
    let raw = PENDING.swap(0, Ordering::SeqCst);
    if raw == 0 {
        None
    } else {
        SignalEvent::from_raw(raw)
    }
}

/// Puts a drained event back, unless a newer signal has since arrived.
/// Used by callers (the child-wait loop) that take an event off the queue
/// to check for one specific case but must not swallow the others.
pub fn requeue(event: SignalEvent) {
    let _ = PENDING.compare_exchange(0, event.to_raw(), Ordering::SeqCst, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_signals() {
        assert_eq!(
            SignalEvent::from_raw(Signal::SIGTERM as i32),
            Some(SignalEvent::Term)
        );
        assert_eq!(
            SignalEvent::from_raw(Signal::SIGUSR2 as i32),
            Some(SignalEvent::UsrTwo)
        );
    }

    #[test]
    fn unknown_raw_value_maps_to_none() {
        assert_eq!(SignalEvent::from_raw(9999), None);
    }

    #[test]
    fn take_pending_drains_exactly_once() {
        PENDING.store(Signal::SIGUSR1 as i32, Ordering::SeqCst);
        assert_eq!(take_pending(), Some(SignalEvent::UsrOne));
        assert_eq!(take_pending(), None);
    }
}
