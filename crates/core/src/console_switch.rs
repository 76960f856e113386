//! Console switch locking.
//!
//! While the lock is held the kernel delivers VT release and acquire
//! requests as SIGUSR1/SIGUSR2 instead of switching consoles on its own.
//! The release handler refuses every request, so the console cannot be
//! left until the lock is dropped.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::warn;

use crate::errors::ConsoleError;
use crate::vt;

static CONSOLE_SWITCH_LOCKED: AtomicBool = AtomicBool::new(false);

/// Is console switching currently disabled?
///
/// The main flow reads this to pick the right banner message.
pub fn is_locked() -> bool {
    CONSOLE_SWITCH_LOCKED.load(Ordering::Relaxed)
}

/// Answer the kernel's release request: deny the switch.
///
/// ioctl is async-signal-safe; nothing else belongs in here.
extern "C" fn release_vt(_: libc::c_int) {
    unsafe { libc::ioctl(libc::STDIN_FILENO, vt::sys::VT_RELDISP as _, 0) };
}

/// Answer the kernel's acquire request: acknowledge the switch back.
extern "C" fn acquire_vt(_: libc::c_int) {
    unsafe { libc::ioctl(libc::STDIN_FILENO, vt::sys::VT_RELDISP as _, vt::sys::VT_ACKACQ) };
}

/// A held console-switch lock.
///
/// Dropping it restores the previous console mode and signal
/// dispositions.
pub struct ConsoleSwitchLock {
    saved_mode: vt::sys::vt_mode,
    saved_usr1: SigAction,
    saved_usr2: SigAction,
    released: bool,
}

/// Disable virtual console switching on stdin's console.
///
/// Fails with [`ConsoleError::NotAConsole`] when stdin is not a virtual
/// console at all.
pub fn lock() -> Result<ConsoleSwitchLock, ConsoleError> {
    let saved_mode = vt::get_mode(libc::STDIN_FILENO).map_err(|errno| match errno {
        Errno::ENOTTY | Errno::EINVAL => ConsoleError::NotAConsole,
        errno => ConsoleError::Ioctl {
            action: "get virtual console mode",
            source: errno,
        },
    })?;

    let handler = |f: extern "C" fn(libc::c_int)| {
        SigAction::new(SigHandler::Handler(f), SaFlags::SA_RESTART, SigSet::empty())
    };
    let saved_usr1 = unsafe { sigaction(Signal::SIGUSR1, &handler(release_vt)) }.map_err(|e| {
        ConsoleError::Ioctl {
            action: "install release handler",
            source: e,
        }
    })?;
    let saved_usr2 = match unsafe { sigaction(Signal::SIGUSR2, &handler(acquire_vt)) } {
        Ok(previous) => previous,
        Err(errno) => {
            let _ = unsafe { sigaction(Signal::SIGUSR1, &saved_usr1) };
            return Err(ConsoleError::Ioctl {
                action: "install acquire handler",
                source: errno,
            });
        }
    };

    let mut locked_mode = saved_mode;
    // Terminal switching becomes process governed: releases arrive as
    // SIGUSR1, acquires as SIGUSR2.
    locked_mode.mode = vt::sys::VT_PROCESS;
    locked_mode.relsig = Signal::SIGUSR1 as libc::c_int as libc::c_short;
    locked_mode.acqsig = Signal::SIGUSR2 as libc::c_int as libc::c_short;
    // Linux ignores frsig but FreeBSD wants a valid signal number here.
    locked_mode.frsig = Signal::SIGHUP as libc::c_int as libc::c_short;

    if let Err(errno) = vt::set_mode(libc::STDIN_FILENO, &locked_mode) {
        let _ = unsafe { sigaction(Signal::SIGUSR1, &saved_usr1) };
        let _ = unsafe { sigaction(Signal::SIGUSR2, &saved_usr2) };
        return Err(ConsoleError::Ioctl {
            action: "disable console switching",
            source: errno,
        });
    }

    CONSOLE_SWITCH_LOCKED.store(true, Ordering::Relaxed);

    Ok(ConsoleSwitchLock {
        saved_mode,
        saved_usr1,
        saved_usr2,
        released: false,
    })
}

impl ConsoleSwitchLock {
    /// Reenable console switching.
    ///
    /// Failures are reported but not fatal; the process is usually on its
    /// way out when this runs.
    pub fn unlock(mut self) -> Result<(), ConsoleError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), ConsoleError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        CONSOLE_SWITCH_LOCKED.store(false, Ordering::Relaxed);

        vt::set_mode(libc::STDIN_FILENO, &self.saved_mode).map_err(|errno| {
            ConsoleError::Ioctl {
                action: "reenable console switching",
                source: errno,
            }
        })?;

        let _ = unsafe { sigaction(Signal::SIGUSR1, &self.saved_usr1) };
        let _ = unsafe { sigaction(Signal::SIGUSR2, &self.saved_usr2) };
        Ok(())
    }
}

impl Drop for ConsoleSwitchLock {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            warn!(%error, "reenabling console switching failed");
        }
    }
}
