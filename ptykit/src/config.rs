//! Configuration schema and loader
//!
//! Read from `$XDG_CONFIG_HOME/ptykit/config.toml` when present. Every
//! table and field is optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ptykit_utils::{config_file, PtykitError, Result};

use crate::options::DEFAULT_TERM_NAME;
use crate::resolver::AbiPolicy;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtykitConfig {
    /// Binary root; falls back to `$PTYKIT_BIN_DIR`, then `bin/` next to
    /// the executable
    pub bin_dir: Option<PathBuf>,
    pub abi: AbiPolicy,
    pub terminal: TerminalConfig,
    pub windows: WindowsConfig,
}

impl PtykitConfig {
    /// Root directory holding per-target binary directories
    pub fn bin_root(&self) -> PathBuf {
        self.bin_dir.clone().unwrap_or_else(ptykit_utils::bin_root)
    }
}

/// Defaults applied to new terminals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Initial columns (default: 80)
    pub cols: u16,
    /// Initial rows (default: 24)
    pub rows: u16,
    /// Exported as `TERM` (default: xterm-256color)
    pub name: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            name: DEFAULT_TERM_NAME.into(),
        }
    }
}

/// Windows backend settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    /// Force (`true`) or forbid (`false`) ConPTY; probe when unset
    pub use_conpty: Option<bool>,
    /// Override the console-list helper location
    pub console_list_helper: Option<PathBuf>,
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<PtykitConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(PtykitConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<PtykitConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| PtykitError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<PtykitConfig> {
        toml::from_str(content).map_err(|e| PtykitError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &PtykitConfig) -> Result<()> {
        if config.terminal.cols == 0 || config.terminal.rows == 0 {
            return Err(PtykitError::config(
                "terminal cols and rows must be positive",
            ));
        }

        if config.terminal.name.is_empty() {
            return Err(PtykitError::config("terminal name must not be empty"));
        }

        if config.abi.versioned_below == 0 {
            return Err(PtykitError::config("abi.versioned_below must be at least 1"));
        }

        Ok(())
    }

    /// Load and validate
    pub fn load_and_validate() -> Result<PtykitConfig> {
        let config = Self::load()?;
        Self::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file() {
        let config = ConfigLoader::load();
        assert!(config.is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = PtykitConfig::default();
        assert_eq!(config.terminal.cols, 80);
        assert_eq!(config.terminal.rows, 24);
        assert_eq!(config.terminal.name, "xterm-256color");
        assert_eq!(config.abi, AbiPolicy::default());
        assert!(config.windows.use_conpty.is_none());
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(
            &path,
            r#"
            bin_dir = "/opt/ptykit/bin"

            [abi]
            versioned_below = 3
            stable_targets = ["linux-x86_64"]

            [terminal]
            cols = 132
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(config.bin_root(), PathBuf::from("/opt/ptykit/bin"));
        assert_eq!(config.abi.versioned_below, 3);
        assert_eq!(config.abi.stable_targets, vec!["linux-x86_64"]);
        assert_eq!(config.terminal.cols, 132);
        assert_eq!(config.terminal.rows, 24);
    }

    #[test]
    fn test_windows_table() {
        let config = ConfigLoader::parse(
            r#"
            [windows]
            use_conpty = false
            console_list_helper = 'C:\tools\ptykit-console-list.exe'
            "#,
            Path::new("test.toml"),
        )
        .unwrap();
        assert_eq!(config.windows.use_conpty, Some(false));
        assert!(config.windows.console_list_helper.is_some());
    }

    #[test]
    fn test_validate_zero_size() {
        let mut config = PtykitConfig::default();
        config.terminal.rows = 0;

        let result = ConfigLoader::validate(&config);
        assert!(matches!(result, Err(PtykitError::Config(_))));
    }

    #[test]
    fn test_validate_zero_threshold() {
        let mut config = PtykitConfig::default();
        config.abi.versioned_below = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = ConfigLoader::parse("invalid { toml", Path::new("test.toml"));
        assert!(matches!(result, Err(PtykitError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_missing_file_read_error() {
        let dir = tempdir().unwrap();
        let result = ConfigLoader::load_from_path(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(PtykitError::FileRead { .. })));
    }
}
