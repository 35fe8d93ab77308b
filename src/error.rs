use std::path::PathBuf;

/// Result type for vstkeep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading plugins or driving the idle machinery.
///
/// Lookups of unknown handles are not errors: they return `None`/`false`
/// because an instance that is already gone is an expected race.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// dlopen failed
    #[error("cannot load library {path}: {reason}")]
    Library { path: PathBuf, reason: String },

    /// None of the known entry points is exported
    #[error("no entry point {symbol} in {path}")]
    MissingEntryPoint { path: PathBuf, symbol: String },

    /// The entry point returned something that is not a VST2 effect
    #[error("{0} is not a VST plugin")]
    NotAPlugin(PathBuf),

    /// The plugin refused to initialise
    #[error("plugin initialisation failed: {0}")]
    PluginInit(String),

    /// The handle table is full, or the requested handle is still in use
    #[error("handle {0:#010x} is not available")]
    HandleUnavailable(u32),

    /// The platform timer could not be armed
    #[error("idle timer error: {0}")]
    Timer(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}
