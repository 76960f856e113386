use clap::Parser;

/// Command line of the locking binary.
///
/// Every positional argument names a plugin to load; the plugins may pull
/// in further ones through their `requires` declarations.
#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version,
    about = "Lock virtual consoles until the user authenticates"
)]
pub struct Cli {
    /// Plugins to load
    #[arg(value_name = "PLUGIN")]
    pub plugins: Vec<String>,
}
