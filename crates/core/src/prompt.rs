//! Prompt routines.
//!
//! All reads run on the locked terminal with hand-managed termios state:
//! the prompt wants canonical mode without terminal signals, the
//! single-character waits want canonical mode off. Every function
//! restores what it changed.

use std::io::{self, Write};
use std::time::Duration;

use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};

use crate::signals;

const PROMPT_BUFFER_SIZE: usize = 512;

enum PollOutcome {
    Ready,
    TimedOut,
    Interrupted,
    Failed,
}

fn poll_stdin(timeout: Option<Duration>) -> PollOutcome {
    let mut poll_fd = libc::pollfd {
        fd: libc::STDIN_FILENO,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout
        .map(|t| t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int)
        .unwrap_or(-1);

    match unsafe { libc::poll(&mut poll_fd, 1, timeout_ms) } {
        1 => PollOutcome::Ready,
        0 => PollOutcome::TimedOut,
        _ if nix::errno::Errno::last() == nix::errno::Errno::EINTR => PollOutcome::Interrupted,
        _ => PollOutcome::Failed,
    }
}

/// Prompt for a single line of input.
///
/// Returns `None` if reading fails or the timeout expires. A signal
/// interrupting the wait restarts it with a fresh copy of the timeout,
/// unless termination was requested.
pub fn prompt(message: &str, timeout: Option<Duration>) -> Option<String> {
    let stdin = io::stdin();

    if !message.is_empty() {
        eprint!("{message}");
        let _ = io::stderr().flush();
    }

    let saved = tcgetattr(&stdin).ok()?;
    // Line buffering without terminal signals.
    let mut term = saved.clone();
    term.local_flags |= LocalFlags::ICANON;
    term.local_flags &= !LocalFlags::ISIG;
    let _ = tcsetattr(&stdin, SetArg::TCSAFLUSH, &term);
    // Discard anything typed before the prompt.
    unsafe { libc::tcflush(libc::STDIN_FILENO, libc::TCIFLUSH) };

    let result = loop {
        match poll_stdin(timeout) {
            PollOutcome::Ready => {}
            PollOutcome::TimedOut => {
                eprintln!("timeout!");
                break None;
            }
            PollOutcome::Interrupted if signals::terminate_requested() => break None,
            PollOutcome::Interrupted => continue,
            PollOutcome::Failed => {
                eprintln!("vlock: waiting on stdin failed: {}", nix::errno::Errno::last());
                break None;
            }
        }

        let mut buffer = [0u8; PROMPT_BUFFER_SIZE];
        let length = unsafe {
            libc::read(
                libc::STDIN_FILENO,
                buffer.as_mut_ptr().cast(),
                buffer.len() - 1,
            )
        };
        if length < 0 {
            break None;
        }

        let mut length = length as usize;
        // Strip trailing newline characters.
        while length > 0 && matches!(buffer[length - 1], b'\n' | b'\r') {
            length -= 1;
        }

        let line = String::from_utf8_lossy(&buffer[..length]).into_owned();
        // The buffer may have held a password.
        buffer.fill(0);
        break Some(line);
    };

    let _ = tcsetattr(&stdin, SetArg::TCSAFLUSH, &saved);
    result
}

/// Same as [`prompt`] except that the characters entered are not echoed.
pub fn prompt_echo_off(message: &str, timeout: Option<Duration>) -> Option<String> {
    let stdin = io::stdin();

    let saved = tcgetattr(&stdin).ok()?;
    let mut term = saved.clone();
    term.local_flags &= !LocalFlags::ECHO;
    let _ = tcsetattr(&stdin, SetArg::TCSAFLUSH, &term);

    let result = prompt(message, timeout);

    let _ = tcsetattr(&stdin, SetArg::TCSAFLUSH, &saved);
    if result.is_some() {
        eprintln!();
    }
    result
}

/// Read a single byte from stdin. Returns `None` when the timeout is
/// reached.
pub fn read_character(timeout: Option<Duration>) -> Option<u8> {
    match poll_stdin(timeout) {
        PollOutcome::Ready => {}
        _ => return None,
    }

    let mut byte = 0u8;
    let length = unsafe {
        libc::read(
            libc::STDIN_FILENO,
            std::ptr::addr_of_mut!(byte).cast(),
            1,
        )
    };
    (length == 1).then_some(byte)
}

/// Wait for one of the bytes in `charset` to be typed; `None` accepts any
/// byte. Returns `None` on timeout.
pub fn wait_for_character(charset: Option<&[u8]>, timeout: Option<Duration>) -> Option<u8> {
    let stdin = io::stdin();

    // Single characters, not lines.
    let saved = tcgetattr(&stdin).ok()?;
    let mut term = saved.clone();
    term.local_flags &= !LocalFlags::ICANON;
    let _ = tcsetattr(&stdin, SetArg::TCSANOW, &term);

    let result = loop {
        match read_character(timeout) {
            None => break None,
            Some(byte) => match charset {
                None => break Some(byte),
                Some(set) if set.contains(&byte) => break Some(byte),
                Some(_) => continue,
            },
        }
    };

    let _ = tcsetattr(&stdin, SetArg::TCSANOW, &saved);
    result
}
