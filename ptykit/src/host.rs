//! Host introspection

use std::fmt;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformFamily {
    Unix,
    Windows,
}

/// Supported host platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    MacOs,
    FreeBsd,
    Windows,
}

impl Platform {
    /// Platform of the running process, if supported
    pub fn current() -> Option<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// Parse an `std::env::consts::OS` value
    pub fn from_os(os: &str) -> Option<Self> {
        match os {
            "linux" => Some(Self::Linux),
            "macos" => Some(Self::MacOs),
            "freebsd" => Some(Self::FreeBsd),
            "windows" => Some(Self::Windows),
            _ => None,
        }
    }

    /// Canonical key used in binary directory names
    pub fn key(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "macos",
            Self::FreeBsd => "freebsd",
            Self::Windows => "windows",
        }
    }

    pub fn family(&self) -> PlatformFamily {
        match self {
            Self::Windows => PlatformFamily::Windows,
            Self::Linux | Self::MacOs | Self::FreeBsd => PlatformFamily::Unix,
        }
    }

    pub fn is_windows(&self) -> bool {
        self.family() == PlatformFamily::Windows
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The (platform, architecture, native ABI) triple of the running host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub platform: Platform,
    pub arch: String,
    pub abi_version: u32,
}

impl HostInfo {
    pub fn new(platform: Platform, arch: impl Into<String>, abi_version: u32) -> Self {
        Self {
            platform,
            arch: arch.into(),
            abi_version,
        }
    }

    /// Detect the running host
    ///
    /// Returns `None` on platforms without a pty backend.
    pub fn detect() -> Option<Self> {
        Platform::current().map(|platform| {
            Self::new(
                platform,
                std::env::consts::ARCH,
                ptykit_native::NATIVE_ABI_VERSION,
            )
        })
    }
}
