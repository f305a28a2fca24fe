//! Native capability loading
//!
//! The native extension is loaded once per facade and threaded through
//! explicitly as a [`NativeLoad`]; there is no ambient global handle.

use std::fmt;
use std::io;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use libloading::Library;
use tracing::{debug, warn};

use ptykit_native::{EntryFn, NativeApi, ENTRY_SYMBOL, FAMILY, NATIVE_ABI_VERSION};
use ptykit_utils::{PtykitError, Result};

use crate::resolver::PlatformBinaryDescriptor;

/// Where the native function table comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NativeSource {
    /// Load the prebuilt extension from the resolved binary directory
    #[default]
    Prebuilt,
    /// Use the table linked into this build
    ///
    /// The binary directory must still resolve.
    Bundled,
}

/// Outcome of loading the native capability
pub enum NativeLoad {
    Loaded(NativeCapability),
    Failed(String),
}

impl NativeLoad {
    /// Load according to `source` for a resolved install
    pub fn from_descriptor(source: NativeSource, descriptor: &PlatformBinaryDescriptor) -> Self {
        match source {
            NativeSource::Prebuilt => Self::from_library(&descriptor.native_library()),
            NativeSource::Bundled => Self::Loaded(NativeCapability::bundled()),
        }
    }

    /// Load the extension at `path`
    pub fn from_library(path: &Path) -> Self {
        match NativeCapability::load(path) {
            Ok(cap) => Self::Loaded(cap),
            Err(reason) => {
                warn!(path = %path.display(), %reason, "Failed to load native extension");
                Self::Failed(reason)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// Convert to a result, failures becoming `BackendUnavailable`
    pub fn into_result(self) -> Result<NativeCapability> {
        match self {
            Self::Loaded(cap) => Ok(cap),
            Self::Failed(reason) => Err(PtykitError::backend_unavailable(reason)),
        }
    }
}

impl fmt::Debug for NativeLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded(cap) => f.debug_tuple("Loaded").field(cap).finish(),
            Self::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
        }
    }
}

struct Loaded {
    api: NonNull<NativeApi>,
    // Keeps `api` valid; `None` for the bundled table
    _library: Option<Library>,
}

// The table is immutable static data for as long as the library is loaded
unsafe impl Send for Loaded {}
unsafe impl Sync for Loaded {}

/// A loaded, version-checked native function table
#[derive(Clone)]
pub struct NativeCapability {
    inner: Arc<Loaded>,
}

impl fmt::Debug for NativeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCapability")
            .field("abi_version", &self.api().abi_version)
            .field("bundled", &self.is_bundled())
            .finish()
    }
}

impl NativeCapability {
    /// The table linked into this build
    pub fn bundled() -> Self {
        Self {
            inner: Arc::new(Loaded {
                api: NonNull::from(ptykit_native::native_api()),
                _library: None,
            }),
        }
    }

    /// Dynamically load the extension at `path` and check its table
    pub fn load(path: &Path) -> std::result::Result<Self, String> {
        let library = unsafe { Library::new(path) }
            .map_err(|e| format!("cannot load {}: {}", path.display(), e))?;

        let api = unsafe {
            let entry = library
                .get::<EntryFn>(ENTRY_SYMBOL)
                .map_err(|e| format!("{} has no native entry point: {}", path.display(), e))?;
            entry()
        };
        let api = NonNull::new(api as *mut NativeApi)
            .ok_or_else(|| format!("{} returned a null native table", path.display()))?;

        let header = unsafe { api.as_ref() };
        check_header(header.abi_version, header.family)?;

        debug!(path = %path.display(), abi = header.abi_version, "Loaded native extension");
        Ok(Self {
            inner: Arc::new(Loaded {
                api,
                _library: Some(library),
            }),
        })
    }

    pub fn is_bundled(&self) -> bool {
        self.inner._library.is_none()
    }

    pub fn abi_version(&self) -> u32 {
        self.api().abi_version
    }

    fn api(&self) -> &NativeApi {
        unsafe { self.inner.api.as_ref() }
    }
}

/// Reject tables built for another layout or platform family
fn check_header(abi_version: u32, family: u32) -> std::result::Result<(), String> {
    if abi_version != NATIVE_ABI_VERSION {
        return Err(format!(
            "native ABI mismatch: extension has {}, expected {}",
            abi_version, NATIVE_ABI_VERSION
        ));
    }
    if family != FAMILY {
        return Err(format!(
            "native extension is for platform family {}, expected {}",
            family, FAMILY
        ));
    }
    Ok(())
}

fn os_error(code: i64) -> io::Error {
    io::Error::from_raw_os_error(code as i32)
}

#[cfg(unix)]
pub use self::unix_api::*;

#[cfg(unix)]
mod unix_api {
    use std::ffi::{CStr, CString};
    use std::io;
    use std::mem;
    use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
    use std::os::raw::c_char;
    use std::ptr;

    use ptykit_native::{RawExit, RawForkedPty, RawOpenedPty, RawSpawnRequest, NAME_MAX};

    use super::{os_error, NativeCapability};

    /// Everything a fork needs, already resolved and encoded
    #[derive(Debug)]
    pub struct ForkRequest {
        /// Path to exec; no `PATH` search happens in the child
        pub file: CString,
        pub argv: Vec<CString>,
        pub envp: Vec<CString>,
        pub cwd: Option<CString>,
        pub cols: u16,
        pub rows: u16,
        pub uid: Option<u32>,
        pub gid: Option<u32>,
        pub utf8: bool,
    }

    #[derive(Debug)]
    pub struct ForkedPty {
        pub master: OwnedFd,
        pub pid: i32,
        pub pty_name: String,
    }

    #[derive(Debug)]
    pub struct OpenedPty {
        pub master: OwnedFd,
        pub slave: OwnedFd,
        pub pty_name: String,
    }

    /// How a reaped child ended
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ChildExit {
        Code(i32),
        Signal(i32),
    }

    fn name_from(buf: &[c_char; NAME_MAX]) -> String {
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    fn check(code: i32) -> io::Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(os_error(code as i64))
        }
    }

    impl NativeCapability {
        pub fn fork(&self, req: &ForkRequest) -> io::Result<ForkedPty> {
            let mut argv: Vec<*const c_char> = req.argv.iter().map(|a| a.as_ptr()).collect();
            argv.push(ptr::null());
            let mut envp: Vec<*const c_char> = req.envp.iter().map(|e| e.as_ptr()).collect();
            envp.push(ptr::null());

            let raw = RawSpawnRequest {
                file: req.file.as_ptr(),
                argv: argv.as_ptr(),
                envp: envp.as_ptr(),
                cwd: req.cwd.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
                cols: req.cols,
                rows: req.rows,
                uid: req.uid.map_or(-1, i64::from),
                gid: req.gid.map_or(-1, i64::from),
                utf8: req.utf8,
            };

            let mut out: RawForkedPty = unsafe { mem::zeroed() };
            check(unsafe { (self.api().unix.fork)(&raw, &mut out) })?;

            Ok(ForkedPty {
                master: unsafe { OwnedFd::from_raw_fd(out.master) },
                pid: out.pid,
                pty_name: name_from(&out.pty_name),
            })
        }

        pub fn open(&self, cols: u16, rows: u16, utf8: bool) -> io::Result<OpenedPty> {
            let mut out: RawOpenedPty = unsafe { mem::zeroed() };
            check(unsafe { (self.api().unix.open)(cols, rows, utf8, &mut out) })?;

            Ok(OpenedPty {
                master: unsafe { OwnedFd::from_raw_fd(out.master) },
                slave: unsafe { OwnedFd::from_raw_fd(out.slave) },
                pty_name: name_from(&out.pty_name),
            })
        }

        /// Check that `master` is a terminal and apply a size
        pub fn attach(&self, master: BorrowedFd<'_>, cols: u16, rows: u16) -> io::Result<()> {
            check(unsafe { (self.api().unix.attach)(master.as_raw_fd(), cols, rows) })
        }

        pub fn resize(&self, master: BorrowedFd<'_>, cols: u16, rows: u16) -> io::Result<()> {
            check(unsafe { (self.api().unix.resize)(master.as_raw_fd(), cols, rows) })
        }

        /// Name of the foreground process group, if it can be determined
        pub fn process_name(&self, master: BorrowedFd<'_>) -> Option<String> {
            let mut buf = [0 as c_char; NAME_MAX];
            let len = unsafe {
                (self.api().unix.process_name)(master.as_raw_fd(), buf.as_mut_ptr(), NAME_MAX)
            };
            (len > 0).then(|| name_from(&buf))
        }

        /// Signal the process group led by `pid`
        pub fn kill(&self, pid: i32, signal: i32) -> io::Result<()> {
            check(unsafe { (self.api().unix.kill)(pid, signal) })
        }

        /// Block until `pid` exits
        pub fn wait(&self, pid: i32) -> io::Result<ChildExit> {
            let mut out = RawExit::default();
            check(unsafe { (self.api().unix.wait)(pid, &mut out) })?;
            Ok(if out.signal != 0 {
                ChildExit::Signal(out.signal)
            } else {
                ChildExit::Code(out.code)
            })
        }
    }
}

#[cfg(windows)]
pub use self::windows_api::*;

#[cfg(windows)]
mod windows_api {
    use std::ffi::OsString;
    use std::io;
    use std::mem;
    use std::os::windows::ffi::OsStringExt;
    use std::os::windows::io::{FromRawHandle, IntoRawHandle, OwnedHandle, RawHandle};
    use std::path::{Path, PathBuf};
    use std::ptr;

    use ptykit_native::{RawConPty, RawWinPty, RawWinSpawnRequest, NAME_MAX};

    use super::{os_error, NativeCapability};

    /// Initial console-list buffer; grown when the console has more
    const PROCESS_LIST_CAPACITY: usize = 64;

    /// Everything a Windows spawn needs, as NUL-terminated UTF-16
    #[derive(Debug)]
    pub struct WinSpawnRequest {
        pub file: Vec<u16>,
        pub command_line: Vec<u16>,
        pub cwd: Option<Vec<u16>>,
        pub env_block: Option<Vec<u16>>,
        pub support_dir: Vec<u16>,
        pub cols: i16,
        pub rows: i16,
        pub inherit_cursor: bool,
        pub debug: bool,
    }

    impl WinSpawnRequest {
        fn raw(&self) -> RawWinSpawnRequest {
            RawWinSpawnRequest {
                file: self.file.as_ptr(),
                command_line: self.command_line.as_ptr(),
                cwd: self.cwd.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
                env_block: self.env_block.as_ref().map_or(ptr::null(), |e| e.as_ptr()),
                support_dir: self.support_dir.as_ptr(),
                cols: self.cols,
                rows: self.rows,
                inherit_cursor: self.inherit_cursor,
                debug: self.debug,
            }
        }
    }

    #[derive(Debug)]
    pub struct ConPtySession {
        pub id: u32,
        pub pid: u32,
        pub input: OwnedHandle,
        pub output: OwnedHandle,
        pub process: OwnedHandle,
    }

    #[derive(Debug)]
    pub struct WinPtySession {
        pub agent_pid: u32,
        pub pid: u32,
        pub process: OwnedHandle,
        pub conin: PathBuf,
        pub conout: PathBuf,
    }

    fn check(code: u32) -> io::Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(os_error(code as i32 as i64))
        }
    }

    fn wide_to_path(buf: &[u16]) -> PathBuf {
        let len = buf.iter().position(|c| *c == 0).unwrap_or(buf.len());
        PathBuf::from(OsString::from_wide(&buf[..len]))
    }

    impl NativeCapability {
        pub fn conpty_available(&self) -> bool {
            unsafe { (self.api().windows.conpty_available)() }
        }

        pub fn conpty_spawn(&self, req: &WinSpawnRequest) -> io::Result<ConPtySession> {
            let raw = req.raw();
            let mut out: RawConPty = unsafe { mem::zeroed() };
            check(unsafe { (self.api().windows.conpty_spawn)(&raw, &mut out) })?;

            Ok(unsafe {
                ConPtySession {
                    id: out.id,
                    pid: out.pid,
                    input: OwnedHandle::from_raw_handle(out.input as RawHandle),
                    output: OwnedHandle::from_raw_handle(out.output as RawHandle),
                    process: OwnedHandle::from_raw_handle(out.process as RawHandle),
                }
            })
        }

        pub fn conpty_resize(&self, id: u32, cols: i16, rows: i16) -> io::Result<()> {
            check(unsafe { (self.api().windows.conpty_resize)(id, cols, rows) })
        }

        pub fn conpty_kill(&self, id: u32) -> io::Result<()> {
            check(unsafe { (self.api().windows.conpty_kill)(id) })
        }

        pub fn winpty_spawn(&self, req: &WinSpawnRequest) -> io::Result<WinPtySession> {
            let raw = req.raw();
            let mut out: RawWinPty = unsafe { mem::zeroed() };
            check(unsafe { (self.api().windows.winpty_spawn)(&raw, &mut out) })?;

            Ok(WinPtySession {
                agent_pid: out.agent_pid,
                pid: out.pid,
                process: unsafe { OwnedHandle::from_raw_handle(out.process as RawHandle) },
                conin: wide_to_path(&out.conin),
                conout: wide_to_path(&out.conout),
            })
        }

        pub fn winpty_resize(&self, agent_pid: u32, cols: i32, rows: i32) -> io::Result<()> {
            check(unsafe { (self.api().windows.winpty_resize)(agent_pid, cols, rows) })
        }

        pub fn winpty_kill(&self, agent_pid: u32) -> io::Result<()> {
            check(unsafe { (self.api().windows.winpty_kill)(agent_pid) })
        }

        /// Block until the process exits; consumes its handle
        pub fn wait_process(&self, process: OwnedHandle) -> io::Result<u32> {
            let mut code = 0u32;
            let raw = process.into_raw_handle() as isize;
            check(unsafe { (self.api().windows.wait_process)(raw, &mut code) })?;
            Ok(code)
        }

        /// Pids attached to the console of `pid`, in console order
        pub fn console_process_list(&self, pid: u32) -> io::Result<Vec<u32>> {
            let mut buf = vec![0u32; PROCESS_LIST_CAPACITY];
            loop {
                let mut count = 0usize;
                check(unsafe {
                    (self.api().windows.console_process_list)(
                        pid,
                        buf.as_mut_ptr(),
                        buf.len(),
                        &mut count,
                    )
                })?;
                if count <= buf.len() {
                    buf.truncate(count);
                    return Ok(buf);
                }
                buf.resize(count, 0);
            }
        }

        /// Image file name of `pid` (e.g. `cmd.exe`)
        pub fn process_image_name(&self, pid: u32) -> io::Result<String> {
            let mut buf = vec![0u16; NAME_MAX * 4];
            let mut len = 0usize;
            check(unsafe {
                (self.api().windows.process_image_name)(pid, buf.as_mut_ptr(), buf.len(), &mut len)
            })?;
            let path = PathBuf::from(OsString::from_wide(&buf[..len.min(buf.len())]));
            Ok(Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()))
        }
    }
}
