//! Prebuilt native binary resolution
//!
//! Prebuilt binaries live under a root directory, one subdirectory per
//! target: `<root>/<platform>-<arch>[-<abi>]/`. Widely used targets on a
//! recent native ABI share one unversioned directory; everything else is
//! pinned to the exact ABI it was built against.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use ptykit_utils::PtykitError;

use crate::host::{HostInfo, Platform};

/// Console-list helper executable (Windows)
pub const CONSOLE_LIST_HELPER: &str = "ptykit-console-list.exe";
/// WinPTY support library (Windows)
pub const WINPTY_LIBRARY: &str = "winpty.dll";
/// WinPTY agent executable (Windows)
pub const WINPTY_AGENT: &str = "winpty-agent.exe";

/// Which targets may share an unversioned binary directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbiPolicy {
    /// ABI versions below this are always versioned
    pub versioned_below: u32,
    /// `<platform>-<arch>` pairs with a stable native ABI
    pub stable_targets: Vec<String>,
}

impl Default for AbiPolicy {
    fn default() -> Self {
        Self {
            versioned_below: 2,
            stable_targets: [
                "linux-x86_64",
                "linux-aarch64",
                "macos-x86_64",
                "macos-aarch64",
                "windows-x86_64",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl AbiPolicy {
    pub fn is_stable_target(&self, target: &str) -> bool {
        self.stable_targets.iter().any(|t| t == target)
    }
}

/// Directory key for a (platform, arch, ABI) triple
pub fn directory_key(platform: Platform, arch: &str, abi_version: u32, policy: &AbiPolicy) -> String {
    let target = format!("{}-{}", platform.key(), arch);
    if abi_version < policy.versioned_below || !policy.is_stable_target(&target) {
        format!("{}-{}", target, abi_version)
    } else {
        target
    }
}

/// File name of the native extension library on `platform`
pub fn native_library_file(platform: Platform) -> String {
    let stem = ptykit_native::LIBRARY_NAME;
    match platform {
        Platform::Linux | Platform::FreeBsd => format!("lib{}.so", stem),
        Platform::MacOs => format!("lib{}.dylib", stem),
        Platform::Windows => format!("{}.dll", stem),
    }
}

/// Files that must all be present for `platform`, primary extension first
pub fn required_files(platform: Platform) -> Vec<String> {
    let mut files = vec![native_library_file(platform)];
    if platform.is_windows() {
        files.extend(
            [WINPTY_LIBRARY, WINPTY_AGENT, CONSOLE_LIST_HELPER]
                .iter()
                .map(|s| s.to_string()),
        );
    }
    files
}

/// A complete prebuilt install for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformBinaryDescriptor {
    pub platform: Platform,
    pub arch: String,
    pub abi_version: u32,
    pub directory: PathBuf,
    /// Required files, primary extension first; every one exists on disk
    pub files: Vec<String>,
}

impl PlatformBinaryDescriptor {
    /// Path to the primary native extension
    pub fn native_library(&self) -> PathBuf {
        self.directory.join(native_library_file(self.platform))
    }

    /// Path to the console-list helper, if this platform has one
    pub fn console_list_helper(&self) -> Option<PathBuf> {
        self.platform
            .is_windows()
            .then(|| self.directory.join(CONSOLE_LIST_HELPER))
    }
}

/// Some required binaries are missing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("native binaries not found in {}: missing {}", directory.display(), missing.join(", "))]
pub struct NotFound {
    pub directory: PathBuf,
    pub missing: Vec<String>,
}

impl From<NotFound> for PtykitError {
    fn from(err: NotFound) -> Self {
        PtykitError::backend_unavailable(err.to_string())
    }
}

/// Locates prebuilt binaries for a host
#[derive(Debug, Clone)]
pub struct BinaryResolver {
    root: PathBuf,
    policy: AbiPolicy,
}

impl BinaryResolver {
    pub fn new(root: impl Into<PathBuf>, policy: AbiPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &AbiPolicy {
        &self.policy
    }

    /// Directory that should hold the binaries for `host`
    pub fn directory_for(&self, host: &HostInfo) -> PathBuf {
        self.root.join(directory_key(
            host.platform,
            &host.arch,
            host.abi_version,
            &self.policy,
        ))
    }

    /// Probe for a complete install
    ///
    /// Read-only; safe to call repeatedly.
    pub fn resolve(&self, host: &HostInfo) -> Result<PlatformBinaryDescriptor, NotFound> {
        let directory = self.directory_for(host);
        let files = required_files(host.platform);

        let missing: Vec<String> = files
            .iter()
            .filter(|f| !directory.join(f).is_file())
            .cloned()
            .collect();

        if !missing.is_empty() {
            debug!(directory = %directory.display(), ?missing, "Native binaries incomplete");
            return Err(NotFound { directory, missing });
        }

        debug!(directory = %directory.display(), "Resolved native binaries");
        Ok(PlatformBinaryDescriptor {
            platform: host.platform,
            arch: host.arch.clone(),
            abi_version: host.abi_version,
            directory,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn install(dir: &Path, files: &[String]) {
        std::fs::create_dir_all(dir).unwrap();
        for f in files {
            std::fs::write(dir.join(f), b"").unwrap();
        }
    }

    #[test]
    fn test_stable_target_is_unversioned() {
        let policy = AbiPolicy::default();
        assert_eq!(
            directory_key(Platform::Linux, "x86_64", 3, &policy),
            "linux-x86_64"
        );
        assert_eq!(
            directory_key(Platform::Windows, "x86_64", 2, &policy),
            "windows-x86_64"
        );
    }

    #[test]
    fn test_old_abi_is_versioned() {
        let policy = AbiPolicy::default();
        assert_eq!(
            directory_key(Platform::Linux, "x86_64", 1, &policy),
            "linux-x86_64-1"
        );
    }

    #[test]
    fn test_unlisted_target_is_versioned() {
        let policy = AbiPolicy::default();
        assert_eq!(
            directory_key(Platform::FreeBsd, "x86_64", 3, &policy),
            "freebsd-x86_64-3"
        );
        assert_eq!(
            directory_key(Platform::Windows, "x86", 3, &policy),
            "windows-x86-3"
        );
    }

    #[test]
    fn test_policy_from_config_values() {
        let policy = AbiPolicy {
            versioned_below: 5,
            stable_targets: vec!["freebsd-x86_64".into()],
        };
        assert_eq!(
            directory_key(Platform::FreeBsd, "x86_64", 5, &policy),
            "freebsd-x86_64"
        );
        assert_eq!(
            directory_key(Platform::FreeBsd, "x86_64", 4, &policy),
            "freebsd-x86_64-4"
        );
        assert_eq!(
            directory_key(Platform::Linux, "x86_64", 5, &policy),
            "linux-x86_64-5"
        );
    }

    #[test]
    fn test_required_files_unix() {
        assert_eq!(required_files(Platform::Linux), vec!["libptykit_native.so"]);
        assert_eq!(
            required_files(Platform::MacOs),
            vec!["libptykit_native.dylib"]
        );
    }

    #[test]
    fn test_required_files_windows() {
        assert_eq!(
            required_files(Platform::Windows),
            vec![
                "ptykit_native.dll",
                "winpty.dll",
                "winpty-agent.exe",
                "ptykit-console-list.exe"
            ]
        );
    }

    #[test]
    fn test_resolve_complete_install() {
        let root = tempdir().unwrap();
        let host = HostInfo::new(Platform::Windows, "x86_64", 3);
        let resolver = BinaryResolver::new(root.path(), AbiPolicy::default());

        let dir = resolver.directory_for(&host);
        install(&dir, &required_files(Platform::Windows));

        let desc = resolver.resolve(&host).unwrap();
        assert_eq!(desc.directory, root.path().join("windows-x86_64"));
        assert_eq!(desc.native_library(), dir.join("ptykit_native.dll"));
        assert_eq!(
            desc.console_list_helper(),
            Some(dir.join("ptykit-console-list.exe"))
        );
        for f in &desc.files {
            assert!(desc.directory.join(f).is_file());
        }
    }

    #[test]
    fn test_resolve_partial_install_is_not_found() {
        let root = tempdir().unwrap();
        let host = HostInfo::new(Platform::Windows, "x86_64", 3);
        let resolver = BinaryResolver::new(root.path(), AbiPolicy::default());

        let dir = resolver.directory_for(&host);
        install(&dir, &["ptykit_native.dll".to_string(), "winpty.dll".to_string()]);

        let err = resolver.resolve(&host).unwrap_err();
        assert_eq!(err.directory, dir);
        assert_eq!(err.missing, vec!["winpty-agent.exe", "ptykit-console-list.exe"]);
    }

    #[test]
    fn test_resolve_missing_directory() {
        let root = tempdir().unwrap();
        let host = HostInfo::new(Platform::Linux, "riscv64", 3);
        let resolver = BinaryResolver::new(root.path(), AbiPolicy::default());

        let err = resolver.resolve(&host).unwrap_err();
        assert!(err.directory.ends_with("linux-riscv64-3"));
        assert_eq!(err.missing, vec!["libptykit_native.so"]);
    }

    #[test]
    fn test_resolve_is_repeatable() {
        let root = tempdir().unwrap();
        let host = HostInfo::new(Platform::Linux, "x86_64", 3);
        let resolver = BinaryResolver::new(root.path(), AbiPolicy::default());
        install(&resolver.directory_for(&host), &required_files(Platform::Linux));

        assert_eq!(resolver.resolve(&host), resolver.resolve(&host));
    }

    #[test]
    fn test_directory_instead_of_file_is_missing() {
        let root = tempdir().unwrap();
        let host = HostInfo::new(Platform::Linux, "x86_64", 3);
        let resolver = BinaryResolver::new(root.path(), AbiPolicy::default());
        let dir = resolver.directory_for(&host);
        std::fs::create_dir_all(dir.join("libptykit_native.so")).unwrap();

        assert!(resolver.resolve(&host).is_err());
    }

    #[test]
    fn test_not_found_maps_to_backend_unavailable() {
        let err: PtykitError = NotFound {
            directory: PathBuf::from("/x"),
            missing: vec!["a".into()],
        }
        .into();
        assert!(matches!(err, PtykitError::BackendUnavailable(_)));
    }
}
