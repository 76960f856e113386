//! Error types and handling
//!
//! Every subsystem has its own error enum; `VlockError` aggregates them for
//! callers that cross subsystem lines. Where a system call is the root
//! cause the original `Errno` travels inside the error value, so cleanup
//! code running on the failure path cannot clobber it.

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Domain errors for the console locking core
#[derive(Error, Debug)]
pub enum VlockError {
    /// Locating or initializing a plugin failed
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// The plugin set cannot be completed or ordered
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A child process could not be managed
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A virtual console operation failed
    #[error(transparent)]
    Console(#[from] ConsoleError),

    /// Authentication cannot proceed
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Errors locating or driving a single plugin
#[derive(Error, Debug)]
pub enum PluginError {
    /// Neither backend could locate the named plugin
    #[error("plugin '{name}' not found")]
    NotFound { name: String },

    /// The module file exists but is not readable
    #[error("cannot access module '{}': {}", .path.display(), .source)]
    Access { path: PathBuf, source: Errno },

    /// The dynamic loader rejected the module
    #[error("cannot load module '{}': {}", .path.display(), .message)]
    Load { path: PathBuf, message: String },

    /// A script dependency query failed
    #[error("dependency query '{}' on '{}' failed: {}", .kind, .path.display(), .source)]
    Query {
        path: PathBuf,
        kind: &'static str,
        source: ProcessError,
    },

    /// A hook reported failure
    #[error("plugin '{plugin}' failed")]
    HookFailed {
        plugin: String,
        hook: &'static str,
    },
}

/// Errors completing or ordering the plugin set
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("'{plugin}' requires '{dependency}' which could not be loaded: {source}")]
    RequiresFailed {
        plugin: String,
        dependency: String,
        source: Box<PluginError>,
    },

    #[error("'{plugin}' needs '{dependency}' which is not loaded")]
    NeedsMissing { plugin: String, dependency: String },

    #[error("'{plugin}' is required by some other plugin but depends on '{dependency}' which is not loaded")]
    DependsMissing { plugin: String, dependency: String },

    #[error("'{plugin}' and '{conflict}' cannot be loaded at the same time")]
    Conflict { plugin: String, conflict: String },

    #[error("circular dependencies detected{}", render_edges(.edges))]
    Cycle { edges: Vec<(String, String)> },
}

fn render_edges(edges: &[(String, String)]) -> String {
    let mut out = String::new();
    for (predecessor, successor) in edges {
        out.push_str(&format!(
            "\n\t{predecessor}\tmust come before\t{successor}"
        ));
    }
    out
}

/// Errors from the child-process primitive
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The child's exec failed; its errno arrived over the status pipe
    #[error("child failed to start: {0}")]
    ChildFailed(Errno),

    /// A read did not complete within its time budget
    #[error("timed out")]
    Timeout,

    /// A dependency query produced more output than allowed
    #[error("output too large")]
    OutputTooLarge,

    /// A system call failed
    #[error(transparent)]
    Sys(#[from] Errno),
}

/// Errors from the virtual console components
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("this terminal is not a virtual console")]
    NotAConsole,

    #[error("could not {action}: {source}")]
    Ioctl {
        action: &'static str,
        source: Errno,
    },

    #[error("cannot open console '{}': {}", .path.display(), .source)]
    OpenConsole {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("virtual terminal number {0} out of range")]
    BadVtNumber(i32),
}

/// Errors from the authentication collaborator
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("could not get username")]
    UnknownUser,

    #[error("no shadow entry for the user")]
    NoShadowEntry,

    #[error("crypt() failed: {0}")]
    Crypt(Errno),
}

/// Convenience type alias for Results with VlockError
pub type Result<T> = std::result::Result<T, VlockError>;
