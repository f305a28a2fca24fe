//! Platform backends
//!
//! The set of backends is closed: Unix ptys everywhere but Windows, and on
//! Windows either ConPTY or the WinPTY agent. Which one a terminal uses is
//! decided by [`BackendKind::select`] from an explicit probe.

pub mod command_line;
#[cfg(windows)]
mod conpty;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod winpty;

use std::fmt;
use std::path::PathBuf;

use ptykit_utils::{PtykitError, Result};

use crate::host::{Platform, PlatformFamily};
use crate::native::NativeCapability;
use crate::options::{CommandArgs, OpenOptions, SpawnOptions};
use crate::resolver::PlatformBinaryDescriptor;
use crate::signal::Signal;
use crate::terminal::Spawned;

#[cfg(unix)]
pub use self::unix::resolve_executable;

/// Which backend a terminal runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Unix,
    ConPty,
    WinPty,
}

impl BackendKind {
    /// Pick the backend for `platform`
    ///
    /// On Windows ConPTY is used when the OS provides it unless the caller
    /// opted out; asking for ConPTY where it is missing falls back to WinPTY.
    pub fn select(platform: Platform, conpty_available: bool, use_conpty: Option<bool>) -> Self {
        match platform.family() {
            PlatformFamily::Unix => Self::Unix,
            PlatformFamily::Windows => {
                if use_conpty != Some(false) && conpty_available {
                    Self::ConPty
                } else {
                    Self::WinPty
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unix => "unix",
            Self::ConPty => "conpty",
            Self::WinPty => "winpty",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A program to launch, with defaults already applied
#[derive(Debug)]
pub(crate) struct Launch<'a> {
    pub file: &'a str,
    pub args: &'a CommandArgs,
    pub options: &'a SpawnOptions,
    pub cols: u16,
    pub rows: u16,
    pub term_name: &'a str,
}

/// Everything a backend needs from the facade
#[derive(Debug, Clone)]
pub(crate) struct BackendContext {
    pub native: NativeCapability,
    #[cfg_attr(unix, allow(dead_code))]
    pub descriptor: PlatformBinaryDescriptor,
    /// Console-list helper used for Windows process names
    #[cfg_attr(unix, allow(dead_code))]
    pub console_list_helper: Option<PathBuf>,
}

impl BackendContext {
    pub fn spawn(&self, kind: BackendKind, launch: &Launch<'_>) -> Result<Spawned> {
        match kind {
            #[cfg(unix)]
            BackendKind::Unix => unix::spawn(&self.native, launch),
            #[cfg(windows)]
            BackendKind::ConPty => conpty::spawn(
                &self.native,
                &self.descriptor,
                self.console_list_helper.clone(),
                launch,
            ),
            #[cfg(windows)]
            BackendKind::WinPty => winpty::spawn(
                &self.native,
                &self.descriptor,
                self.console_list_helper.clone(),
                launch,
            ),
            #[allow(unreachable_patterns)]
            other => Err(unsupported(other)),
        }
    }

    #[cfg_attr(windows, allow(unused_variables))]
    pub fn open(&self, kind: BackendKind, options: OpenOptions, cols: u16, rows: u16) -> Result<Spawned> {
        match kind {
            #[cfg(unix)]
            BackendKind::Unix => unix::open(&self.native, options, cols, rows),
            _ => Err(PtykitError::attach_failed(format!(
                "the {} backend cannot open a terminal without a process",
                kind
            ))),
        }
    }
}

/// Working directory for a new process: the configured one, else ours
pub(crate) fn spawn_cwd(configured: Option<&PathBuf>) -> Result<PathBuf> {
    resolve_cwd(configured, std::env::current_dir)
}

fn resolve_cwd(
    configured: Option<&PathBuf>,
    current: impl FnOnce() -> std::io::Result<PathBuf>,
) -> Result<PathBuf> {
    match configured {
        Some(cwd) => Ok(cwd.clone()),
        None => current().map_err(|e| {
            PtykitError::spawn_failed(format!("cannot determine working directory: {}", e))
        }),
    }
}

fn unsupported(kind: BackendKind) -> PtykitError {
    PtykitError::backend_unavailable(format!(
        "the {} backend is not available on this platform",
        kind
    ))
}

/// A live backend session behind a terminal
pub(crate) enum Backend {
    #[cfg(unix)]
    Unix(unix::UnixPty),
    #[cfg(windows)]
    ConPty(conpty::ConPty),
    #[cfg(windows)]
    WinPty(winpty::WinPty),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            #[cfg(unix)]
            Self::Unix(_) => BackendKind::Unix,
            #[cfg(windows)]
            Self::ConPty(_) => BackendKind::ConPty,
            #[cfg(windows)]
            Self::WinPty(_) => BackendKind::WinPty,
        }
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        match self {
            #[cfg(unix)]
            Self::Unix(pty) => pty.resize(cols, rows),
            #[cfg(windows)]
            Self::ConPty(pty) => pty.resize(cols, rows),
            #[cfg(windows)]
            Self::WinPty(pty) => pty.resize(cols, rows),
        }
    }

    pub fn kill(&self, signal: Option<Signal>) -> Result<()> {
        match self {
            #[cfg(unix)]
            Self::Unix(pty) => pty.kill(signal),
            #[cfg(windows)]
            Self::ConPty(pty) => pty.kill(signal),
            #[cfg(windows)]
            Self::WinPty(pty) => pty.kill(signal),
        }
    }

    /// Foreground process name; `None` when it cannot be determined
    pub async fn process_name(&self) -> Option<String> {
        match self {
            #[cfg(unix)]
            Self::Unix(pty) => pty.process_name(),
            #[cfg(windows)]
            Self::ConPty(pty) => pty.process_name().await,
            #[cfg(windows)]
            Self::WinPty(pty) => pty.process_name().await,
        }
    }
}

/// Windows backends take no signals
#[cfg(windows)]
fn reject_signal(signal: Option<Signal>) -> Result<()> {
    match signal {
        Some(sig) => Err(PtykitError::invalid_options(format!(
            "signals are not supported on Windows (got {})",
            sig
        ))),
        None => Ok(()),
    }
}
