//! Process signal posture.
//!
//! The locking process must not be interruptible from the keyboard, and a
//! SIGTERM has to leave through the normal exit path so every cleanup
//! action still runs. The handler only sets a flag; the blocking reads
//! notice it through EINTR and unwind.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

static TERMINATE: AtomicBool = AtomicBool::new(false);

/// Was a termination request received?
pub fn terminate_requested() -> bool {
    TERMINATE.load(Ordering::Relaxed)
}

extern "C" fn handle_terminate(_: libc::c_int) {
    TERMINATE.store(true, Ordering::Relaxed);
}

/// Install the signal dispositions for the lifetime of the lock.
///
/// SIGINT, SIGQUIT and SIGTSTP are ignored; they should not be delivered
/// anyway once the terminal signals are disabled, this covers the window
/// before that. SIGTERM sets the termination flag, deliberately without
/// SA_RESTART so blocking reads return EINTR and observe it.
pub fn setup() {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::SA_RESTART, SigSet::empty());
    for signal in [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTSTP] {
        let _ = unsafe { sigaction(signal, &ignore) };
    }

    let terminate = SigAction::new(
        SigHandler::Handler(handle_terminate),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    let _ = unsafe { sigaction(Signal::SIGTERM, &terminate) };
}
