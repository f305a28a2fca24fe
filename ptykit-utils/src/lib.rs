//! ptykit-utils: Common utilities shared across ptykit crates
//!
//! This crate provides:
//! - Unified error types ([`PtykitError`], [`Result`])
//! - Logging infrastructure ([`init_logging_with_config`], [`LogConfig`])
//! - Path utilities ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

// Re-export main types at crate root for convenience
pub use error::{PtykitError, Result};
pub use logging::{init_logging_with_config, LogConfig, LogOutput, LOG_ENV};

// Re-export commonly used path functions
pub use paths::{bin_root, bin_root_of, config_dir, config_file, debug_build_dir, log_dir, state_dir};
