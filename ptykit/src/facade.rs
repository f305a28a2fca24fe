//! Terminal facade
//!
//! [`Ptykit`] ties host detection, binary resolution, native loading and
//! backend selection together. All of that happens once, in
//! [`Ptykit::init`]; spawning afterwards only reads the result.

use std::sync::OnceLock;

use tokio::runtime::Handle;
use tracing::{debug, info};

use ptykit_utils::{PtykitError, Result};

use crate::backend::{BackendContext, BackendKind, Launch};
use crate::config::{ConfigLoader, PtykitConfig};
use crate::host::HostInfo;
use crate::native::{NativeLoad, NativeSource};
use crate::options::{CommandArgs, OpenOptions, SpawnOptions};
use crate::resolver::{BinaryResolver, PlatformBinaryDescriptor};
use crate::terminal::Terminal;

/// Program run when `spawn` is given an empty file name
#[cfg(unix)]
const DEFAULT_SHELL: &str = "sh";
#[cfg(windows)]
const DEFAULT_SHELL: &str = "cmd.exe";

static SHARED: OnceLock<std::result::Result<Ptykit, String>> = OnceLock::new();

/// An initialized pty library
#[derive(Debug)]
pub struct Ptykit {
    config: PtykitConfig,
    host: HostInfo,
    conpty_available: bool,
    kind: BackendKind,
    context: BackendContext,
}

impl Ptykit {
    /// Initialize with the prebuilt native extension
    pub fn init(config: PtykitConfig) -> Result<Self> {
        Self::with_source(config, NativeSource::default())
    }

    /// Initialize, choosing where the native table comes from
    pub fn with_source(config: PtykitConfig, source: NativeSource) -> Result<Self> {
        ConfigLoader::validate(&config)?;

        let host = HostInfo::detect().ok_or_else(|| {
            PtykitError::backend_unavailable(format!(
                "no pty backend for platform {}",
                std::env::consts::OS
            ))
        })?;

        let resolver = BinaryResolver::new(config.bin_root(), config.abi.clone());
        let descriptor = resolver.resolve(&host)?;
        let native = NativeLoad::from_descriptor(source, &descriptor).into_result()?;

        let conpty_available = probe_conpty(&native);
        let kind = BackendKind::select(host.platform, conpty_available, config.windows.use_conpty);
        let console_list_helper = config
            .windows
            .console_list_helper
            .clone()
            .or_else(|| descriptor.console_list_helper());

        info!(
            platform = %host.platform,
            arch = %host.arch,
            backend = %kind,
            directory = %descriptor.directory.display(),
            "ptykit initialized"
        );

        Ok(Self {
            config,
            host,
            conpty_available,
            kind,
            context: BackendContext {
                native,
                descriptor,
                console_list_helper,
            },
        })
    }

    /// The process-wide instance behind the free functions
    ///
    /// Initialized on first use from the configuration file. A failed
    /// initialization is remembered and reported on every call.
    pub fn shared() -> Result<&'static Ptykit> {
        SHARED
            .get_or_init(|| {
                ConfigLoader::load_and_validate()
                    .and_then(Ptykit::init)
                    .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|reason| PtykitError::backend_unavailable(reason.clone()))
    }

    pub fn config(&self) -> &PtykitConfig {
        &self.config
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    /// The backend new terminals use unless their options pick another
    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    pub fn descriptor(&self) -> &PlatformBinaryDescriptor {
        &self.context.descriptor
    }

    /// Spawn `file` with `args` on a new terminal
    ///
    /// An empty `file` runs the platform's default shell.
    pub fn spawn(
        &self,
        file: &str,
        args: impl Into<CommandArgs>,
        options: SpawnOptions,
    ) -> Result<Terminal> {
        let runtime = runtime()?;
        options.validate()?;

        let file = if file.is_empty() { DEFAULT_SHELL } else { file };
        let args = args.into();
        let kind = match options.use_conpty {
            Some(_) => BackendKind::select(self.host.platform, self.conpty_available, options.use_conpty),
            None => self.kind,
        };
        let term_name = options
            .name
            .clone()
            .unwrap_or_else(|| self.config.terminal.name.clone());

        let launch = Launch {
            file,
            args: &args,
            options: &options,
            cols: options.cols.unwrap_or(self.config.terminal.cols),
            rows: options.rows.unwrap_or(self.config.terminal.rows),
            term_name: &term_name,
        };
        debug!(file, backend = %kind, cols = launch.cols, rows = launch.rows, "Spawning terminal");

        let spawned = self.context.spawn(kind, &launch)?;
        Terminal::start(
            &runtime,
            spawned,
            file,
            launch.cols,
            launch.rows,
            options.flow_control,
        )
    }

    /// Same as [`spawn`](Self::spawn)
    pub fn fork(
        &self,
        file: &str,
        args: impl Into<CommandArgs>,
        options: SpawnOptions,
    ) -> Result<Terminal> {
        self.spawn(file, args, options)
    }

    /// Same as [`spawn`](Self::spawn)
    pub fn create_terminal(
        &self,
        file: &str,
        args: impl Into<CommandArgs>,
        options: SpawnOptions,
    ) -> Result<Terminal> {
        self.spawn(file, args, options)
    }

    /// Open a terminal without spawning a process
    ///
    /// Only the Unix backend can do this.
    pub fn open(&self, options: OpenOptions) -> Result<Terminal> {
        let runtime = runtime()?;
        options.validate()?;

        let cols = options.cols.unwrap_or(self.config.terminal.cols);
        let rows = options.rows.unwrap_or(self.config.terminal.rows);
        let flow_control = options.flow_control;

        let spawned = self.context.open(self.kind, options, cols, rows)?;
        let file = spawned.pty_name.clone().unwrap_or_default();
        Terminal::start(&runtime, spawned, file, cols, rows, flow_control)
    }
}

fn runtime() -> Result<Handle> {
    Handle::try_current()
        .map_err(|_| PtykitError::internal("terminals must be created inside a tokio runtime"))
}

#[cfg(windows)]
fn probe_conpty(native: &crate::native::NativeCapability) -> bool {
    native.conpty_available()
}

#[cfg(not(windows))]
fn probe_conpty(_native: &crate::native::NativeCapability) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::required_files;
    use tempfile::{tempdir, TempDir};

    fn install(config: &mut PtykitConfig) -> TempDir {
        let root = tempdir().unwrap();
        let host = HostInfo::detect().unwrap();
        let dir = BinaryResolver::new(root.path(), config.abi.clone()).directory_for(&host);
        std::fs::create_dir_all(&dir).unwrap();
        for file in required_files(host.platform) {
            std::fs::write(dir.join(file), b"").unwrap();
        }
        config.bin_dir = Some(root.path().to_path_buf());
        root
    }

    #[test]
    fn test_missing_binaries_unavailable() {
        let root = tempdir().unwrap();
        let config = PtykitConfig {
            bin_dir: Some(root.path().to_path_buf()),
            ..Default::default()
        };
        let result = Ptykit::with_source(config, NativeSource::Bundled);
        assert!(matches!(result, Err(PtykitError::BackendUnavailable(_))));
    }

    #[test]
    fn test_bundled_init() {
        let mut config = PtykitConfig::default();
        let _root = install(&mut config);

        let ptykit = Ptykit::with_source(config, NativeSource::Bundled).unwrap();
        assert_eq!(ptykit.host(), &HostInfo::detect().unwrap());
        assert!(ptykit.descriptor().native_library().exists());
        #[cfg(unix)]
        assert_eq!(ptykit.backend_kind(), BackendKind::Unix);
    }

    #[test]
    fn test_empty_prebuilt_library_unavailable() {
        let mut config = PtykitConfig::default();
        let _root = install(&mut config);

        // The installed extension is an empty file
        let result = Ptykit::init(config);
        assert!(matches!(result, Err(PtykitError::BackendUnavailable(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PtykitConfig::default();
        let _root = install(&mut config);
        config.terminal.cols = 0;

        let result = Ptykit::with_source(config, NativeSource::Bundled);
        assert!(matches!(result, Err(PtykitError::Config(_))));
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let mut config = PtykitConfig::default();
        let _root = install(&mut config);
        let ptykit = Ptykit::with_source(config, NativeSource::Bundled).unwrap();

        let result = ptykit.spawn("true", Vec::<String>::new(), SpawnOptions::new());
        assert!(matches!(result, Err(PtykitError::Internal(_))));
    }
}
