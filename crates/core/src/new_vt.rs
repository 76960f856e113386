//! New virtual terminal allocation.
//!
//! The `new` plugin moves the lock onto a freshly allocated console so
//! the invoking session keeps whatever was on its screen. Stdio is
//! redirected to the new terminal for the duration of the lock and the
//! previous console is reactivated on the way out.

use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use tracing::warn;

use crate::errors::ConsoleError;
use crate::vt;

/// A lock session running on its own virtual terminal.
pub struct NewVtSession {
    console: OwnedFd,
    old_vt: libc::c_int,
    new_vt: libc::c_int,
    saved_stdin: OwnedFd,
    saved_stdout: OwnedFd,
    saved_stderr: OwnedFd,
    ended: bool,
}

fn dup_fd(fd: RawFd) -> Result<OwnedFd, ConsoleError> {
    let duplicate = unsafe { libc::dup(fd) };
    if duplicate < 0 {
        return Err(ConsoleError::Ioctl {
            action: "duplicate a standard descriptor",
            source: Errno::last(),
        });
    }
    Ok(unsafe { OwnedFd::from_raw_fd(duplicate) })
}

fn open_rw(path: &std::path::Path) -> Result<OwnedFd, ConsoleError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| ConsoleError::OpenConsole {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(file.into())
}

impl NewVtSession {
    /// Allocate a fresh console, switch to it and point stdio there.
    pub fn start() -> Result<Self, ConsoleError> {
        // stdin may already be a console; otherwise fall back to the
        // system console device.
        let stdin_copy = dup_fd(libc::STDIN_FILENO)?;
        let (console, old_vt) = match vt::active_console(stdin_copy.as_raw_fd()) {
            Ok(active) => (stdin_copy, active),
            Err(_) => {
                drop(stdin_copy);
                let console = open_rw(std::path::Path::new(vt::sys::CONSOLE_DEVICE))?;
                let active = vt::active_console(console.as_raw_fd()).map_err(|errno| {
                    ConsoleError::Ioctl {
                        action: "get the currently active console",
                        source: errno,
                    }
                })?;
                (console, active)
            }
        };

        let new_vt = vt::open_query(console.as_raw_fd()).map_err(|errno| ConsoleError::Ioctl {
            action: "find a free virtual terminal",
            source: errno,
        })?;
        let device = vt::console_device(new_vt)?;
        let vt_fd = open_rw(&device)?;

        // Switching right after the command was entered can leave the
        // enter key stuck under X11; give the server a moment.
        if std::env::var_os("DISPLAY").is_some() {
            std::thread::sleep(Duration::from_secs(1));
        }

        vt::activate_console(console.as_raw_fd(), new_vt).map_err(|errno| {
            ConsoleError::Ioctl {
                action: "activate new terminal",
                source: errno,
            }
        })?;

        let saved_stdin = dup_fd(libc::STDIN_FILENO)?;
        let saved_stdout = dup_fd(libc::STDOUT_FILENO)?;
        let saved_stderr = dup_fd(libc::STDERR_FILENO)?;

        for target in [
            libc::STDIN_FILENO,
            libc::STDOUT_FILENO,
            libc::STDERR_FILENO,
        ] {
            unsafe { libc::dup2(vt_fd.as_raw_fd(), target) };
        }
        drop(vt_fd);

        Ok(Self {
            console,
            old_vt,
            new_vt,
            saved_stdin,
            saved_stdout,
            saved_stderr,
            ended: false,
        })
    }

    /// Restore stdio, switch back to the previous console and release the
    /// allocated terminal.
    pub fn end(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;

        unsafe {
            libc::dup2(self.saved_stdin.as_raw_fd(), libc::STDIN_FILENO);
            libc::dup2(self.saved_stdout.as_raw_fd(), libc::STDOUT_FILENO);
            libc::dup2(self.saved_stderr.as_raw_fd(), libc::STDERR_FILENO);
        }

        if let Err(errno) = vt::activate_console(self.console.as_raw_fd(), self.old_vt) {
            warn!(error = %errno, "could not activate previous console");
        }

        #[cfg(target_os = "linux")]
        if let Err(errno) = vt::disallocate_console(self.console.as_raw_fd(), self.new_vt) {
            warn!(error = %errno, "could not disallocate console");
        }
    }
}

impl Drop for NewVtSession {
    fn drop(&mut self) {
        self.restore();
    }
}
