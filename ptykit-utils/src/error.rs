//! Error types for ptykit
//!
//! Provides a unified error type used across all ptykit crates.

use std::path::PathBuf;

/// Main error type for ptykit operations
#[derive(Debug, thiserror::Error)]
pub enum PtykitError {
    // === Backend Errors ===

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Failed to attach to pty: {0}")]
    AttachFailed(String),

    #[error("Native I/O error: {0}")]
    NativeIo(String),

    // === Console List Errors ===

    #[error("Console process list unavailable: {0}")]
    ConsoleListUnavailable(String),

    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PtykitError {
    /// Create a backend-unavailable error
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create an invalid-options error
    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Self::InvalidOptions(msg.into())
    }

    /// Create a spawn error
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create an attach error
    pub fn attach_failed(msg: impl Into<String>) -> Self {
        Self::AttachFailed(msg.into())
    }

    /// Create a native I/O error
    pub fn native_io(msg: impl Into<String>) -> Self {
        Self::NativeIo(msg.into())
    }

    /// Create a console-list error
    pub fn console_list(msg: impl Into<String>) -> Self {
        Self::ConsoleListUnavailable(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is retryable
    ///
    /// Only console list queries are worth retrying: the target process
    /// often exits mid-query. Everything else indicates a broken install,
    /// bad input, or a dead process.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConsoleListUnavailable(_))
    }

    /// Whether the terminal that produced this error should be treated as gone
    pub fn implies_terminated(&self) -> bool {
        matches!(self, Self::NativeIo(_))
    }
}

/// Result type alias using PtykitError
pub type Result<T> = std::result::Result<T, PtykitError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Display Tests ====================

    #[test]
    fn test_error_display_backend_unavailable() {
        let err = PtykitError::BackendUnavailable("no native extension".into());
        assert_eq!(err.to_string(), "Backend unavailable: no native extension");
    }

    #[test]
    fn test_error_display_invalid_options() {
        let err = PtykitError::invalid_options("cols must be positive");
        assert_eq!(err.to_string(), "Invalid options: cols must be positive");
    }

    #[test]
    fn test_error_display_spawn_failed() {
        let err = PtykitError::spawn_failed("No such file or directory (os error 2)");
        assert!(err.to_string().starts_with("Failed to spawn process"));
    }

    #[test]
    fn test_error_display_attach_failed() {
        let err = PtykitError::attach_failed("bad fd");
        assert_eq!(err.to_string(), "Failed to attach to pty: bad fd");
    }

    #[test]
    fn test_error_display_console_list() {
        let err = PtykitError::console_list("helper exited with status 1");
        assert_eq!(
            err.to_string(),
            "Console process list unavailable: helper exited with status 1"
        );
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = PtykitError::Io(io_err);
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_display_file_read() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        let err = PtykitError::FileRead {
            path: PathBuf::from("/etc/ptykit/config.toml"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to read file"));
        assert!(msg.contains("/etc/ptykit/config.toml"));
    }

    #[test]
    fn test_error_display_config_invalid() {
        let err = PtykitError::ConfigInvalid {
            path: PathBuf::from("config.toml"),
            message: "expected table".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration at config.toml: expected table"
        );
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_retryable_console_list() {
        assert!(PtykitError::console_list("target exited").is_retryable());
    }

    #[test]
    fn test_not_retryable_errors() {
        let errors = vec![
            PtykitError::backend_unavailable("missing"),
            PtykitError::invalid_options("rows = 0"),
            PtykitError::spawn_failed("ENOENT"),
            PtykitError::attach_failed("bad handle"),
            PtykitError::native_io("EIO"),
            PtykitError::internal("oops"),
        ];

        for err in errors {
            assert!(!err.is_retryable(), "{err} should not be retryable");
        }
    }

    #[test]
    fn test_native_io_implies_terminated() {
        assert!(PtykitError::native_io("write failed").implies_terminated());
        assert!(!PtykitError::spawn_failed("nope").implies_terminated());
    }

    #[test]
    fn test_from_io_error_preserves_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: PtykitError = io_err.into();
        match err {
            PtykitError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
