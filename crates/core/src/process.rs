//! Child process management.
//!
//! The script backend and sandboxed save hooks run as unprivileged child
//! processes. [`Child::spawn`] forks, wires up stdio, closes every stray
//! descriptor, drops the effective IDs back to the real ones and reports
//! an exec failure through a CLOEXEC status pipe so the parent observes
//! the child's errno instead of a silent exit.

use std::ffi::CString;
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execv, fork, pipe, ForkResult, Pid};

use crate::errors::ProcessError;

/// Scan bound when `RLIMIT_NOFILE` cannot be determined.
const FALLBACK_MAXFD: RawFd = 1024;

/// How one of the child's standard descriptors is set up.
pub enum StdioRedirect {
    /// Leave the descriptor untouched.
    Inherit,
    /// Redirect from or to `/dev/null`.
    DevNull,
    /// Create a pipe; the parent's end is available on the spawned
    /// [`Child`].
    Pipe,
    /// Connect a caller-supplied descriptor. The descriptor is consumed.
    Fd(OwnedFd),
}

/// What the child runs.
pub enum ChildTarget {
    /// `execv` the program at `path` with the given argument vector.
    Exec { path: PathBuf, argv: Vec<String> },
    /// Call a function in the forked child and `_exit` with its return
    /// value.
    Call(Box<dyn FnOnce() -> i32>),
}

/// Everything needed to create a child process.
pub struct ChildSpec {
    pub target: ChildTarget,
    pub stdin: StdioRedirect,
    pub stdout: StdioRedirect,
    pub stderr: StdioRedirect,
}

/// A spawned child process and the parent ends of any requested pipes.
pub struct Child {
    pub pid: Pid,
    /// Write end of the child's stdin when `Pipe` was requested.
    pub stdin: Option<OwnedFd>,
    /// Read end of the child's stdout when `Pipe` was requested.
    pub stdout: Option<OwnedFd>,
    /// Read end of the child's stderr when `Pipe` was requested.
    pub stderr: Option<OwnedFd>,
}

enum PreparedTarget {
    Exec { path: CString, argv: Vec<CString> },
    Call(Box<dyn FnOnce() -> i32>),
}

/// What the child does with one standard descriptor.
#[derive(Clone, Copy)]
enum ChildFd {
    Inherit,
    DevNull,
    Dup(RawFd),
}

impl Child {
    /// Create a new child process.
    ///
    /// All file descriptors except stdin, stdout, stderr and the internal
    /// status pipe are closed in the child and effective privileges are
    /// dropped to the real IDs before the target runs. For every
    /// [`StdioRedirect::Pipe`] field the parent's pipe end is stored on
    /// the returned `Child`; the caller owns and eventually closes it. On
    /// failure every pipe opened here is closed again before the error is
    /// surfaced.
    pub fn spawn(spec: ChildSpec) -> Result<Self, ProcessError> {
        let ChildSpec {
            target,
            stdin,
            stdout,
            stderr,
        } = spec;

        let target = prepare_target(target)?;

        let (status_rd, status_wr) = pipe().map_err(ProcessError::Sys)?;
        set_cloexec(status_wr.as_raw_fd());

        let stdin_pipe = make_pipe(&stdin)?;
        let stdout_pipe = make_pipe(&stdout)?;
        let stderr_pipe = make_pipe(&stderr)?;

        // Read ends index 0, write ends index 1, as with pipe(2).
        let child_stdin = child_fd(&stdin, &stdin_pipe, 0);
        let child_stdout = child_fd(&stdout, &stdout_pipe, 1);
        let child_stderr = child_fd(&stderr, &stderr_pipe, 1);

        match unsafe { fork() }.map_err(ProcessError::Sys)? {
            ForkResult::Child => {
                apply_redirects(child_stdin, child_stdout, child_stderr);
                close_extra_fds(status_wr.as_raw_fd());

                // The binary may run setuid; children never keep the
                // elevated IDs.
                unsafe {
                    libc::setgid(libc::getgid());
                    libc::setuid(libc::getuid());
                }

                match target {
                    PreparedTarget::Call(function) => {
                        // Closing the status pipe first lets the parent
                        // see success before the function runs.
                        drop(status_wr);
                        // The child must never unwind back into the
                        // caller's stack frames.
                        let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                            function,
                        ))
                        .unwrap_or(101);
                        unsafe { libc::_exit(code) }
                    }
                    PreparedTarget::Exec { path, argv } => {
                        let _ = execv(&path, &argv);
                        let error = (Errno::last() as i32).to_ne_bytes();
                        unsafe {
                            libc::write(
                                status_wr.as_raw_fd(),
                                error.as_ptr().cast(),
                                error.len(),
                            );
                            libc::_exit(1)
                        }
                    }
                }
            }
            ForkResult::Parent { child } => {
                drop(status_wr);

                // One errno worth of bytes means the exec failed; EOF
                // means the child is running its target.
                let mut status = std::fs::File::from(status_rd);
                let mut buffer = [0u8; 4];
                if matches!(status.read(&mut buffer), Ok(n) if n >= buffer.len()) {
                    let errno = Errno::from_raw(i32::from_ne_bytes(buffer));
                    // The child has already exited; don't leave a zombie.
                    let _ = waitpid(child, None);
                    // Dropping the pipe pairs restores the caller's
                    // invariants before the errno is surfaced.
                    return Err(ProcessError::ChildFailed(errno));
                }

                Ok(Child {
                    pid: child,
                    stdin: stdin_pipe.map(|(read, write)| {
                        drop(read);
                        write
                    }),
                    stdout: stdout_pipe.map(|(read, write)| {
                        drop(write);
                        read
                    }),
                    stderr: stderr_pipe.map(|(read, write)| {
                        drop(write);
                        read
                    }),
                })
            }
        }
    }
}

fn prepare_target(target: ChildTarget) -> Result<PreparedTarget, ProcessError> {
    // CStrings are built before the fork; allocating in the child is off
    // limits.
    match target {
        ChildTarget::Call(function) => Ok(PreparedTarget::Call(function)),
        ChildTarget::Exec { path, argv } => {
            let path = CString::new(path.as_os_str().as_bytes())
                .map_err(|_| ProcessError::Sys(Errno::EINVAL))?;
            let argv = argv
                .into_iter()
                .map(|arg| CString::new(arg).map_err(|_| ProcessError::Sys(Errno::EINVAL)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PreparedTarget::Exec { path, argv })
        }
    }
}

fn make_pipe(redirect: &StdioRedirect) -> Result<Option<(OwnedFd, OwnedFd)>, ProcessError> {
    match redirect {
        StdioRedirect::Pipe => Ok(Some(pipe().map_err(ProcessError::Sys)?)),
        _ => Ok(None),
    }
}

fn child_fd(
    redirect: &StdioRedirect,
    pipe: &Option<(OwnedFd, OwnedFd)>,
    child_end: usize,
) -> ChildFd {
    match (redirect, pipe) {
        (StdioRedirect::Inherit, _) => ChildFd::Inherit,
        (StdioRedirect::DevNull, _) => ChildFd::DevNull,
        (StdioRedirect::Fd(fd), _) => ChildFd::Dup(fd.as_raw_fd()),
        (StdioRedirect::Pipe, Some(ends)) => ChildFd::Dup(if child_end == 0 {
            ends.0.as_raw_fd()
        } else {
            ends.1.as_raw_fd()
        }),
        (StdioRedirect::Pipe, None) => ChildFd::Inherit,
    }
}

fn set_cloexec(fd: RawFd) {
    unsafe {
        libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
    }
}

/// Child-side stdio plumbing. Errors are ignored, as there is nowhere
/// left to report them.
fn apply_redirects(stdin: ChildFd, stdout: ChildFd, stderr: ChildFd) {
    let mut devnull: RawFd = -1;

    for (action, target) in [
        (stdin, libc::STDIN_FILENO),
        (stdout, libc::STDOUT_FILENO),
        (stderr, libc::STDERR_FILENO),
    ] {
        match action {
            ChildFd::Inherit => {}
            ChildFd::Dup(fd) => {
                unsafe { libc::dup2(fd, target) };
            }
            ChildFd::DevNull => {
                if devnull < 0 {
                    devnull = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR) };
                }
                if devnull >= 0 {
                    unsafe { libc::dup2(devnull, target) };
                }
            }
        }
    }
}

/// Close every descriptor that is not stdio or the status pipe, bounding
/// the scan with `RLIMIT_NOFILE`.
fn close_extra_fds(status_fd: RawFd) {
    let mut limit = std::mem::MaybeUninit::<libc::rlimit>::uninit();
    let maxfd = if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, limit.as_mut_ptr()) } == 0 {
        let limit = unsafe { limit.assume_init() };
        RawFd::try_from(limit.rlim_cur).unwrap_or(FALLBACK_MAXFD)
    } else {
        FALLBACK_MAXFD
    };

    for fd in 0..maxfd {
        if fd != libc::STDIN_FILENO
            && fd != libc::STDOUT_FILENO
            && fd != libc::STDERR_FILENO
            && fd != status_fd
        {
            unsafe { libc::close(fd) };
        }
    }
}

extern "C" fn ignore_sigalrm(_: libc::c_int) {
    // A real function, not SIG_IGN: waitpid must be interrupted.
}

/// Wait up to `timeout` for the death of the given child process.
///
/// Returns true if the child died within the interval or was already
/// dead. The previous `SIGALRM` disposition and interval timer are
/// restored before returning.
pub fn wait_for_death(pid: Pid, timeout: Duration) -> bool {
    let action = SigAction::new(
        SigHandler::Handler(ignore_sigalrm),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let previous = unsafe { sigaction(Signal::SIGALRM, &action) }.ok();

    let timer = libc::itimerval {
        it_value: libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        },
        it_interval: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
    };
    let mut previous_timer = libc::itimerval {
        it_value: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        it_interval: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
    };
    unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, &mut previous_timer) };

    let reaped = matches!(waitpid(pid, None), Ok(status) if status.pid() == Some(pid));

    unsafe { libc::setitimer(libc::ITIMER_REAL, &previous_timer, std::ptr::null_mut()) };
    if let Some(previous) = previous {
        let _ = unsafe { sigaction(Signal::SIGALRM, &previous) };
    }

    reaped
}

/// Try hard to kill the given child process.
pub fn ensure_death(pid: Pid) {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        // Not our child?
        Err(_) => return,
        // Not dead yet, keep going.
        Ok(WaitStatus::StillAlive) => {}
        // Already dead.
        Ok(_) => return,
    }

    let _ = kill(pid, Signal::SIGTERM);

    // A SIGTERM handler, if any, gets half a second.
    if wait_for_death(pid, Duration::from_millis(500)) {
        return;
    }

    let _ = kill(pid, Signal::SIGKILL);
    // The child may be stopped; SIGKILL only acts once it runs again.
    let _ = kill(pid, Signal::SIGCONT);

    let _ = waitpid(pid, None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use std::thread;

    fn reaped(pid: Pid) -> bool {
        matches!(waitpid(pid, None), Ok(status) if status.pid() == Some(pid))
    }

    #[test]
    #[serial]
    fn spawned_command_round_trips_stdio() {
        let child = Child::spawn(ChildSpec {
            target: ChildTarget::Exec {
                path: PathBuf::from("/bin/sh"),
                argv: vec!["sh".into(), "-c".into(), "rev".into()],
            },
            stdin: StdioRedirect::Pipe,
            stdout: StdioRedirect::Pipe,
            stderr: StdioRedirect::DevNull,
        })
        .unwrap();

        let mut stdin = std::fs::File::from(child.stdin.unwrap());
        stdin.write_all(b"hello\n").unwrap();
        drop(stdin);

        let mut output = String::new();
        std::fs::File::from(child.stdout.unwrap())
            .read_to_string(&mut output)
            .unwrap();
        assert_eq!(output, "olleh\n");

        assert!(wait_for_death(child.pid, Duration::from_secs(5)));
    }

    #[test]
    #[serial]
    fn spawned_function_round_trips_stdio() {
        let child = Child::spawn(ChildSpec {
            target: ChildTarget::Call(Box::new(|| {
                let mut buffer = [0u8; 64];
                let n = unsafe {
                    libc::read(libc::STDIN_FILENO, buffer.as_mut_ptr().cast(), buffer.len())
                };
                if n <= 0 {
                    return 1;
                }
                let written = unsafe {
                    libc::write(libc::STDOUT_FILENO, buffer.as_ptr().cast(), n as usize)
                };
                i32::from(written != n as isize)
            })),
            stdin: StdioRedirect::Pipe,
            stdout: StdioRedirect::Pipe,
            stderr: StdioRedirect::DevNull,
        })
        .unwrap();

        // The child blocks on its read; it must not have been reaped yet.
        assert_eq!(
            waitpid(child.pid, Some(WaitPidFlag::WNOHANG)),
            Ok(WaitStatus::StillAlive)
        );

        let mut stdin = std::fs::File::from(child.stdin.unwrap());
        stdin.write_all(b"world").unwrap();
        drop(stdin);

        let mut output = String::new();
        std::fs::File::from(child.stdout.unwrap())
            .read_to_string(&mut output)
            .unwrap();
        assert_eq!(output, "world");

        match waitpid(child.pid, None) {
            Ok(WaitStatus::Exited(pid, code)) => {
                assert_eq!(pid, child.pid);
                assert_eq!(code, 0);
            }
            other => panic!("unexpected wait status: {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn exec_failure_reports_the_childs_errno() {
        let result = Child::spawn(ChildSpec {
            target: ChildTarget::Exec {
                path: PathBuf::from("/nonexistent/program"),
                argv: vec!["program".into()],
            },
            stdin: StdioRedirect::DevNull,
            stdout: StdioRedirect::DevNull,
            stderr: StdioRedirect::DevNull,
        });

        match result {
            Err(ProcessError::ChildFailed(errno)) => assert_eq!(errno, Errno::ENOENT),
            other => panic!("expected ChildFailed, got {:?}", other.map(|c| c.pid)),
        }
    }

    #[test]
    #[serial]
    fn wait_for_death_observes_the_timeout() {
        let child = Child::spawn(ChildSpec {
            target: ChildTarget::Call(Box::new(|| {
                thread::sleep(Duration::from_millis(100));
                0
            })),
            stdin: StdioRedirect::DevNull,
            stdout: StdioRedirect::DevNull,
            stderr: StdioRedirect::DevNull,
        })
        .unwrap();

        assert!(!wait_for_death(child.pid, Duration::from_millis(5)));
        assert!(wait_for_death(child.pid, Duration::from_secs(5)));
    }

    #[test]
    #[serial]
    fn wait_for_death_restores_the_sigalrm_handler() {
        let marker = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        let original = unsafe { sigaction(Signal::SIGALRM, &marker) }.unwrap();

        let child = Child::spawn(ChildSpec {
            target: ChildTarget::Call(Box::new(|| 0)),
            stdin: StdioRedirect::DevNull,
            stdout: StdioRedirect::DevNull,
            stderr: StdioRedirect::DevNull,
        })
        .unwrap();
        assert!(wait_for_death(child.pid, Duration::from_secs(5)));

        let current = unsafe { sigaction(Signal::SIGALRM, &original) }.unwrap();
        assert_eq!(current.handler(), SigHandler::SigIgn);
    }

    #[test]
    #[serial]
    fn ensure_death_defeats_signal_ignoring_children() {
        let child = Child::spawn(ChildSpec {
            target: ChildTarget::Call(Box::new(|| {
                unsafe {
                    libc::signal(libc::SIGTERM, libc::SIG_IGN);
                    libc::signal(libc::SIGHUP, libc::SIG_IGN);
                }
                thread::sleep(Duration::from_secs(60));
                0
            })),
            stdin: StdioRedirect::DevNull,
            stdout: StdioRedirect::DevNull,
            stderr: StdioRedirect::DevNull,
        })
        .unwrap();

        ensure_death(child.pid);

        assert_eq!(
            waitpid(child.pid, Some(WaitPidFlag::WNOHANG)),
            Err(Errno::ECHILD)
        );
    }

    #[test]
    #[serial]
    fn ensure_death_tolerates_already_dead_children() {
        let child = Child::spawn(ChildSpec {
            target: ChildTarget::Call(Box::new(|| 0)),
            stdin: StdioRedirect::DevNull,
            stdout: StdioRedirect::DevNull,
            stderr: StdioRedirect::DevNull,
        })
        .unwrap();

        assert!(reaped(child.pid));
        // Reaping twice must not blow up.
        ensure_death(child.pid);
    }
}
