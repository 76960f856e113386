//! vlock — lock one or all virtual consoles until the invoking user
//! authenticates again.
//!
//! This binary is thin glue: it loads and resolves the requested plugins,
//! drives their lifecycle hooks around the authentication loop and makes
//! sure every piece of global state it touched (terminal modes, console
//! switching, child processes) is restored on every exit path. The
//! cleanup actions are RAII guards declared in reverse order of their
//! desired teardown.

use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use nix::sys::termios::{tcgetattr, tcsetattr, InputFlags, LocalFlags, SetArg, Termios};

use vlock_core::auth::{Authenticator, ShadowAuth};
use vlock_core::console_switch;
use vlock_core::prompt;
use vlock_core::signals;
use vlock_core::util::parse_seconds;

#[cfg(feature = "plugins")]
use vlock_core::plugin::{Hook, PluginDirs};
#[cfg(feature = "plugins")]
use vlock_core::registry::PluginRegistry;

mod cli;

/// Failed authentication attempts, reported when the lock ends.
static AUTH_TRIES: AtomicU32 = AtomicU32::new(0);

fn main() -> ExitCode {
    vlock_core::logging::init();

    let args = cli::Cli::parse();

    signals::setup();

    let result = run(args);
    // Runs after every guard inside run() has been dropped, like the
    // first-registered exit handler it replaces.
    report_auth_tries();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("vlock: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: cli::Cli) -> Result<()> {
    let username = current_username()?;

    let mut session = Session::start(&args.plugins)?;

    if unsafe { libc::isatty(libc::STDIN_FILENO) } != 1 {
        bail!("stdin is not a terminal");
    }

    let _terminal = TerminalGuard::new()?;

    auth_loop(&mut session, &username)
}

/// Root may lock on behalf of the account named in the environment.
fn current_username() -> Result<String> {
    let uid = nix::unistd::getuid();

    if uid.is_root() {
        if let Ok(user) = std::env::var("USER") {
            if !user.is_empty() {
                return Ok(user);
            }
        }
    }

    let entry = nix::unistd::User::from_uid(uid)
        .context("could not get username")?
        .ok_or_else(|| anyhow!("could not get username"))?;
    Ok(entry.name)
}

/// The lock session around the authentication loop.
///
/// With plugin support this owns the registry; dropping it fires
/// `vlock_end` (only once `vlock_start` succeeded) and then unloads every
/// plugin, in that order.
#[cfg(feature = "plugins")]
struct Session {
    registry: PluginRegistry,
    started: bool,
}

#[cfg(feature = "plugins")]
impl Session {
    fn start(plugins: &[String]) -> Result<Self> {
        let mut registry = PluginRegistry::new(PluginDirs::default());

        for name in plugins {
            registry
                .load(name)
                .map_err(|error| anyhow!("loading plugin '{name}' failed: {error}"))?;
        }

        registry
            .resolve()
            .map_err(|error| anyhow!("error resolving plugin dependencies: {error}"))?;

        let mut session = Session {
            registry,
            started: false,
        };
        session.registry.call_hook(Hook::Start)?;
        session.started = true;
        Ok(session)
    }

    fn save(&mut self) {
        let _ = self.registry.call_hook(Hook::Save);
    }

    fn save_abort(&mut self) {
        let _ = self.registry.call_hook(Hook::SaveAbort);
    }
}

#[cfg(feature = "plugins")]
impl Drop for Session {
    fn drop(&mut self) {
        if self.started {
            let _ = self.registry.call_hook(Hook::End);
        }
    }
}

/// Without plugin support a single literal `all` drives the console
/// switch lock directly; anything else is refused.
#[cfg(not(feature = "plugins"))]
struct Session {
    _lock: Option<console_switch::ConsoleSwitchLock>,
}

#[cfg(not(feature = "plugins"))]
impl Session {
    fn start(plugins: &[String]) -> Result<Self> {
        match plugins {
            [] => Ok(Session { _lock: None }),
            [only] if only == "all" => {
                let lock = console_switch::lock()
                    .map_err(|error| anyhow!("could not disable console switching: {error}"))?;
                Ok(Session { _lock: Some(lock) })
            }
            _ => bail!("plugin support disabled"),
        }
    }

    fn save(&mut self) {}

    fn save_abort(&mut self) {}
}

/// Echo off, no terminal signals, carriage return mapped to newline for
/// the duration of the lock.
struct TerminalGuard {
    saved: Termios,
}

impl TerminalGuard {
    fn new() -> Result<Self> {
        let stdin = io::stdin();
        let saved = tcgetattr(&stdin).context("could not read terminal attributes")?;

        let mut term = saved.clone();
        // Pressing enter must yield line feed.
        term.input_flags &= !InputFlags::INLCR;
        term.input_flags |= InputFlags::ICRNL;
        term.local_flags &= !(LocalFlags::ECHO | LocalFlags::ISIG);
        let _ = tcsetattr(&stdin, SetArg::TCSANOW, &term);

        Ok(Self { saved })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = tcsetattr(&io::stdin(), SetArg::TCSANOW, &self.saved);
    }
}

fn banner_message() -> Option<String> {
    std::env::var("VLOCK_MESSAGE").ok().or_else(|| {
        if console_switch::is_locked() {
            std::env::var("VLOCK_ALL_MESSAGE").ok()
        } else {
            std::env::var("VLOCK_CURRENT_MESSAGE").ok()
        }
    })
}

fn check_terminated() -> Result<()> {
    if signals::terminate_requested() {
        bail!("Terminated!");
    }
    Ok(())
}

fn auth_loop(session: &mut Session, username: &str) -> Result<()> {
    let banner = banner_message();
    let prompt_timeout = parse_seconds(std::env::var("VLOCK_PROMPT_TIMEOUT").ok().as_deref());
    #[cfg(feature = "plugins")]
    let wait_timeout = parse_seconds(std::env::var("VLOCK_TIMEOUT").ok().as_deref());
    #[cfg(not(feature = "plugins"))]
    let wait_timeout: Option<Duration> = None;

    let auth = ShadowAuth;

    loop {
        if let Some(message) = banner.as_deref() {
            if !message.is_empty() {
                eprintln!("{message}");
            }
        }

        // Wait for enter or escape; the idle timeout starts the
        // screensaver hooks.
        let key = prompt::wait_for_character(Some(b"\n\x1b".as_slice()), wait_timeout);
        check_terminated()?;

        if key != Some(b'\n') {
            session.save();
            let key = prompt::wait_for_character(None, None);
            session.save_abort();
            check_terminated()?;

            // Do not require enter to be pressed twice.
            if key != Some(b'\n') {
                continue;
            }
        }

        if try_auth(&auth, username, prompt_timeout)? {
            break;
        }
        check_terminated()?;

        // A second chance as root, unless that is who is locked out.
        if username != "root" && try_auth(&auth, "root", prompt_timeout)? {
            break;
        }
        check_terminated()?;

        AUTH_TRIES.fetch_add(1, Ordering::Relaxed);
    }

    Ok(())
}

fn try_auth(auth: &impl Authenticator, username: &str, timeout: Option<Duration>) -> Result<bool> {
    match auth.authenticate(username, timeout) {
        Ok(true) => Ok(true),
        Ok(false) => {
            thread::sleep(Duration::from_secs(1));
            Ok(false)
        }
        Err(error) => {
            tracing::debug!(%error, user = username, "authentication not possible");
            thread::sleep(Duration::from_secs(1));
            Ok(false)
        }
    }
}

fn report_auth_tries() {
    let tries = AUTH_TRIES.load(Ordering::Relaxed);
    if tries > 0 {
        eprintln!(
            "{tries} failed authentication {}.",
            if tries > 1 { "tries" } else { "try" }
        );
    }
}
