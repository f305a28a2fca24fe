//! Spawn and open options

use std::collections::HashMap;
use std::path::PathBuf;

use ptykit_utils::{PtykitError, Result};

/// Terminal name exported as `TERM` when none is configured
pub const DEFAULT_TERM_NAME: &str = "xterm-256color";

/// Arguments for the spawned program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArgs {
    /// Argument vector, escaped per platform as needed
    Argv(Vec<String>),
    /// Pre-escaped command line, passed through verbatim (Windows only)
    CommandLine(String),
}

impl Default for CommandArgs {
    fn default() -> Self {
        Self::Argv(Vec::new())
    }
}

impl From<Vec<String>> for CommandArgs {
    fn from(args: Vec<String>) -> Self {
        Self::Argv(args)
    }
}

impl From<&[&str]> for CommandArgs {
    fn from(args: &[&str]) -> Self {
        Self::Argv(args.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CommandArgs {
    fn from(args: [&str; N]) -> Self {
        Self::Argv(args.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&str> for CommandArgs {
    fn from(line: &str) -> Self {
        Self::CommandLine(line.to_string())
    }
}

impl From<String> for CommandArgs {
    fn from(line: String) -> Self {
        Self::CommandLine(line)
    }
}

/// Options for spawning a process on a new terminal
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Working directory; must exist. Defaults to the current directory.
    pub cwd: Option<PathBuf>,
    /// Variables layered over the inherited environment
    pub env: HashMap<String, String>,
    /// Initial columns; the configured default when unset
    pub cols: Option<u16>,
    /// Initial rows; the configured default when unset
    pub rows: Option<u16>,
    /// Queue writes on a writer task and expose [`Terminal::drain`]
    ///
    /// [`Terminal::drain`]: crate::Terminal::drain
    pub flow_control: bool,
    /// User to run as (Unix only, needs privilege)
    pub uid: Option<u32>,
    /// Group to run as (Unix only, needs privilege)
    pub gid: Option<u32>,
    /// Terminal name exported as `TERM`; the configured default when unset
    pub name: Option<String>,
    /// Mark the tty as UTF-8 (Unix); defaults to on
    pub encoding_utf8: Option<bool>,
    /// Force (`Some(true)`) or forbid (`Some(false)`) ConPTY on Windows
    pub use_conpty: Option<bool>,
    /// Let ConPTY inherit the caller's cursor position
    pub conpty_inherit_cursor: bool,
    /// Enable WinPTY agent debug output
    pub debug: bool,
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set initial size
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = Some(cols);
        self.rows = Some(rows);
        self
    }

    pub fn with_flow_control(mut self, enabled: bool) -> Self {
        self.flow_control = enabled;
        self
    }

    /// Run as another user and group (Unix)
    pub fn with_identity(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    /// Set the terminal name exported as `TERM`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_conpty(mut self, use_conpty: bool) -> Self {
        self.use_conpty = Some(use_conpty);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Checks that hold on every backend
    pub(crate) fn validate(&self) -> Result<()> {
        if self.cols == Some(0) || self.rows == Some(0) {
            return Err(PtykitError::invalid_options(
                "cols and rows must be positive",
            ));
        }
        if let Some(cwd) = &self.cwd {
            if !cwd.is_dir() {
                return Err(PtykitError::invalid_options(format!(
                    "working directory does not exist: {}",
                    cwd.display()
                )));
            }
        }
        if self.uid.is_some() != self.gid.is_some() {
            return Err(PtykitError::invalid_options(
                "uid and gid must be set together",
            ));
        }
        Ok(())
    }
}

/// An existing pty to attach to instead of creating one
#[cfg(unix)]
#[derive(Debug)]
pub struct ExistingPty {
    pub master: std::os::fd::OwnedFd,
    /// Slave end to hand back through [`Terminal::slave`]
    ///
    /// [`Terminal::slave`]: crate::Terminal::slave
    pub slave: Option<std::os::fd::OwnedFd>,
}

/// Options for opening a terminal without spawning a process
#[derive(Debug, Default)]
pub struct OpenOptions {
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub flow_control: bool,
    /// Mark the tty as UTF-8; defaults to on
    pub encoding_utf8: Option<bool>,
    /// Attach to this pty rather than creating a fresh pair
    #[cfg(unix)]
    pub existing: Option<ExistingPty>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = Some(cols);
        self.rows = Some(rows);
        self
    }

    pub fn with_flow_control(mut self, enabled: bool) -> Self {
        self.flow_control = enabled;
        self
    }

    #[cfg(unix)]
    pub fn with_existing(mut self, existing: ExistingPty) -> Self {
        self.existing = Some(existing);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.cols == Some(0) || self.rows == Some(0) {
            return Err(PtykitError::invalid_options(
                "cols and rows must be positive",
            ));
        }
        Ok(())
    }
}
