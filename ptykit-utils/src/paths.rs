//! Path utilities for ptykit
//!
//! Locates the prebuilt native binaries, the configuration file, and the
//! log directory.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "ptykit";

/// Environment variable overriding the prebuilt binary root
pub const BIN_DIR_ENV: &str = "PTYKIT_BIN_DIR";

/// Name of the binary root directory when derived from the executable
const BIN_DIR_NAME: &str = "bin";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the root directory holding per-platform native binary directories
///
/// Resolution order: `$PTYKIT_BIN_DIR`, then `bin/` next to the running
/// executable, then `bin/` in the current directory.
pub fn bin_root() -> PathBuf {
    if let Ok(dir) = std::env::var(BIN_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join(BIN_DIR_NAME)))
        .unwrap_or_else(|| PathBuf::from(BIN_DIR_NAME))
}

/// Get the binary root that contains `binary_dir`
///
/// The helper executable lives inside `<root>/<key>/`, so its root is
/// two levels up from the executable itself.
pub fn bin_root_of(binary_dir: &Path) -> Option<PathBuf> {
    binary_dir.parent().map(Path::to_path_buf)
}

/// Get the directory a debug build of the native extension is written to
///
/// Location: `<workspace>/target/debug`
pub fn debug_build_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(|workspace| workspace.join("target").join("debug"))
        .unwrap_or_else(|| PathBuf::from("target").join("debug"))
}

/// Get the configuration directory
///
/// Location: `$XDG_CONFIG_HOME/ptykit` or `~/.config/ptykit`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(fallback_config_dir)
}

/// Get the main configuration file path
///
/// Location: `$XDG_CONFIG_HOME/ptykit/config.toml`
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the state directory
///
/// Location: `$XDG_STATE_HOME/ptykit` or `~/.local/state/ptykit`
pub fn state_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(fallback_state_dir)
}

/// Get the log directory
///
/// Location: `$XDG_STATE_HOME/ptykit/log`
pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

fn fallback_config_dir() -> PathBuf {
    home_dir().join(".config").join(APP_NAME)
}

fn fallback_state_dir() -> PathBuf {
    home_dir().join(".local").join("state").join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_name() {
        let path = config_file();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "config.toml");
        assert!(path.starts_with(config_dir()));
    }

    #[test]
    fn test_log_dir_in_state_dir() {
        assert!(log_dir().starts_with(state_dir()));
        assert!(log_dir().ends_with("log"));
    }

    #[test]
    fn test_config_dir_contains_app_name() {
        assert!(config_dir().to_string_lossy().contains(APP_NAME));
    }

    #[test]
    fn test_bin_root_ends_with_bin_without_override() {
        if std::env::var(BIN_DIR_ENV).is_ok() {
            return;
        }
        assert!(bin_root().ends_with(BIN_DIR_NAME));
    }

    #[test]
    fn test_bin_root_of_binary_dir() {
        let dir = PathBuf::from("/opt/app/bin/linux-x86_64");
        assert_eq!(bin_root_of(&dir), Some(PathBuf::from("/opt/app/bin")));
    }

    #[test]
    fn test_debug_build_dir() {
        let dir = debug_build_dir();
        assert!(dir.ends_with(Path::new("target").join("debug")));
    }
}
