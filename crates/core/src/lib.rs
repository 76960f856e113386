//! Core library for vlock, the virtual console locking program.
//!
//! This crate contains the plugin orchestration core: the plugin registry
//! with its dependency resolver and lifecycle driver, the two plugin
//! backends (in-process modules and external scripts), the child-process
//! primitive the script backend is built on, and the virtual-terminal
//! components (console-switch lock, new-VT allocator) that the built-in
//! modules wrap. The prompt and authentication collaborators live here as
//! well so the binary crate stays thin glue.

pub mod auth;
pub mod console_switch;
pub mod errors;
pub mod logging;
pub mod module;
pub mod new_vt;
pub mod plugin;
pub mod plugin_abi;
pub mod process;
pub mod prompt;
pub mod registry;
pub mod script;
pub mod signals;
pub mod tsort;
pub mod util;

mod vt;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
