//! The script backend.
//!
//! Scripts are executables run as unprivileged children of the locking
//! process. Dependencies are retrieved by running the script once per
//! dependency kind with the kind name as its single argument; it prints
//! the related plugin names to stdout. For hooks the script is started
//! once with `hooks` as its single argument and hook names are written to
//! its stdin one per line; it should exit when stdin closes.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::errors::{PluginError, ProcessError};
use crate::plugin::{Backend, Dependencies, DependencyKind, Hook};
use crate::process::{ensure_death, wait_for_death, Child, ChildSpec, ChildTarget, StdioRedirect};
use crate::util::LINE_MAX;

/// Total time a script gets to answer one dependency query.
const QUERY_BUDGET: Duration = Duration::from_secs(1);
/// Grace period for a script to exit on its own before it is killed.
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) struct ScriptBackend {
    path: PathBuf,
    /// The hook-mode child, once the first hook was delivered.
    hooks: Option<HookPipe>,
    /// Set when a write to the hook pipe failed; the script no longer
    /// receives hooks and every later hook reports failure.
    dead: bool,
}

struct HookPipe {
    stdin: OwnedFd,
    pid: Pid,
}

impl ScriptBackend {
    /// Query `<script_dir>/<name>` for its dependencies.
    ///
    /// This doubles as the existence check: a script that cannot be
    /// executed at all surfaces a distinguishable not-found condition.
    pub(crate) fn open(
        name: &str,
        script_dir: &Path,
    ) -> Result<(Self, Dependencies), PluginError> {
        let path = script_dir.join(name);
        let mut dependencies = Dependencies::new();

        for kind in DependencyKind::ALL {
            let output = match query(&path, kind) {
                Ok(output) => output,
                Err(ProcessError::ChildFailed(Errno::ENOENT)) => {
                    return Err(PluginError::NotFound {
                        name: name.to_string(),
                    })
                }
                Err(source) => {
                    return Err(PluginError::Query {
                        path,
                        kind: kind.name(),
                        source,
                    })
                }
            };

            for token in output
                .split(|&byte| matches!(byte, b' ' | b'\r' | b'\n'))
                .filter(|token| !token.is_empty())
            {
                dependencies.push(kind, String::from_utf8_lossy(token).into_owned());
            }
        }

        debug!(script = %path.display(), "loaded script");

        Ok((
            Self {
                path,
                hooks: None,
                dead: false,
            },
            dependencies,
        ))
    }
}

/// Run the script in query mode and collect its stdout.
///
/// Reading fails if the one second budget elapses or more than
/// [`LINE_MAX`] bytes arrive.
fn query(path: &Path, kind: DependencyKind) -> Result<Vec<u8>, ProcessError> {
    let mut child = Child::spawn(ChildSpec {
        target: ChildTarget::Exec {
            path: path.to_path_buf(),
            argv: vec![path.display().to_string(), kind.name().to_string()],
        },
        stdin: StdioRedirect::DevNull,
        stdout: StdioRedirect::Pipe,
        stderr: StdioRedirect::DevNull,
    })?;

    let stdout = child.stdout.take().expect("stdout was piped");

    let mut output = Vec::new();
    let mut remaining = QUERY_BUDGET;

    let result = loop {
        let before = Instant::now();
        let mut poll_fd = libc::pollfd {
            fd: stdout.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = remaining.as_millis() as libc::c_int;

        if unsafe { libc::poll(&mut poll_fd, 1, timeout_ms) } != 1 {
            break Err(ProcessError::Timeout);
        }

        // Tick the budget down across iterations.
        remaining = match remaining.checked_sub(before.elapsed()) {
            Some(left) => left,
            None => break Err(ProcessError::Timeout),
        };

        let mut buffer = [0u8; LINE_MAX];
        let length = unsafe {
            libc::read(
                stdout.as_raw_fd(),
                buffer.as_mut_ptr().cast(),
                buffer.len(),
            )
        };

        // EOF, or the script died.
        if length <= 0 {
            break Ok(());
        }

        let length = length as usize;
        if output.len() + length + 1 > LINE_MAX {
            break Err(ProcessError::OutputTooLarge);
        }
        output.extend_from_slice(&buffer[..length]);
    };

    drop(stdout);
    if !wait_for_death(child.pid, REAP_TIMEOUT) {
        ensure_death(child.pid);
    }

    result.map(|()| output)
}

/// Start the script in hook mode with its stdin on a non-blocking pipe.
fn launch(path: &Path) -> Result<HookPipe, ProcessError> {
    let mut child = Child::spawn(ChildSpec {
        target: ChildTarget::Exec {
            path: path.to_path_buf(),
            argv: vec![path.display().to_string(), "hooks".to_string()],
        },
        stdin: StdioRedirect::Pipe,
        stdout: StdioRedirect::DevNull,
        stderr: StdioRedirect::DevNull,
    })?;

    let stdin = child.stdin.take().expect("stdin was piped");

    // A stalled script must not block hook delivery.
    let flags = unsafe { libc::fcntl(stdin.as_raw_fd(), libc::F_GETFL) };
    if flags != -1 {
        unsafe { libc::fcntl(stdin.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };
    }

    Ok(HookPipe {
        stdin,
        pid: child.pid,
    })
}

impl Backend for ScriptBackend {
    /// Deliver a hook by writing its name on a single line to the
    /// script's stdin.
    fn call_hook(&mut self, hook: Hook) -> bool {
        if self.hooks.is_none() {
            match launch(&self.path) {
                Ok(pipe) => self.hooks = Some(pipe),
                Err(error) => {
                    debug!(script = %self.path.display(), %error, "hook launch failed");
                    return false;
                }
            }
        }

        if self.dead {
            return false;
        }

        let Some(pipe) = &self.hooks else {
            return false;
        };

        // Writing to a pipe whose read end is gone raises SIGPIPE, which
        // must not kill the locking process.
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::SA_RESTART, SigSet::empty());
        let previous = unsafe { sigaction(Signal::SIGPIPE, &ignore) }.ok();

        let line = format!("{}\n", hook.name());
        let written = unsafe {
            libc::write(
                pipe.stdin.as_raw_fd(),
                line.as_ptr().cast(),
                line.len(),
            )
        };

        if let Some(previous) = previous {
            let _ = unsafe { sigaction(Signal::SIGPIPE, &previous) };
        }

        // A short write means the script died.
        self.dead = written != line.len() as isize;
        !self.dead
    }
}

impl Drop for ScriptBackend {
    fn drop(&mut self) {
        if let Some(pipe) = self.hooks.take() {
            drop(pipe.stdin);
            if !wait_for_death(pipe.pid, REAP_TIMEOUT) {
                ensure_death(pipe.pid);
            }
        }
    }
}
