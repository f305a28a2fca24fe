//! ptykit: pseudoterminals over prebuilt native backends
//!
//! Spawns processes attached to a pseudoterminal: a Unix pty, a Windows
//! ConPTY pseudo console, or a WinPTY agent console on Windows versions
//! without ConPTY. The native layer ships as a prebuilt extension library
//! found under a per-target binary directory (see [`resolver`]).
//!
//! The free functions use a process-wide [`Ptykit`] initialized from the
//! configuration file on first use. Build a [`Ptykit`] directly to control
//! configuration or the native source.

pub mod backend;
pub mod config;
pub mod console_list;
pub mod facade;
pub mod host;
pub mod native;
pub mod options;
pub mod resolver;
pub mod signal;
pub mod terminal;

pub use backend::BackendKind;
pub use config::{ConfigLoader, PtykitConfig};
pub use facade::Ptykit;
pub use host::{HostInfo, Platform, PlatformFamily};
pub use native::{NativeCapability, NativeLoad, NativeSource};
#[cfg(unix)]
pub use options::ExistingPty;
pub use options::{CommandArgs, OpenOptions, SpawnOptions};
pub use resolver::{BinaryResolver, NotFound, PlatformBinaryDescriptor};
pub use signal::Signal;
pub use terminal::{ExitStatus, Terminal, TerminalEvent};

pub use ptykit_utils::{PtykitError, Result};

/// Spawn `file` with `args` on a new terminal
pub fn spawn(file: &str, args: impl Into<CommandArgs>, options: SpawnOptions) -> Result<Terminal> {
    Ptykit::shared()?.spawn(file, args, options)
}

/// Same as [`spawn`]
pub fn fork(file: &str, args: impl Into<CommandArgs>, options: SpawnOptions) -> Result<Terminal> {
    Ptykit::shared()?.fork(file, args, options)
}

/// Same as [`spawn`]
pub fn create_terminal(
    file: &str,
    args: impl Into<CommandArgs>,
    options: SpawnOptions,
) -> Result<Terminal> {
    Ptykit::shared()?.create_terminal(file, args, options)
}

/// Open a terminal without spawning a process
pub fn open(options: OpenOptions) -> Result<Terminal> {
    Ptykit::shared()?.open(options)
}
