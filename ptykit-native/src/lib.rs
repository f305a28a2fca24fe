//! ptykit-native: the prebuilt native extension
//!
//! Built as a `cdylib` that is dropped into a per-platform binary directory
//! and loaded at runtime, and as an `rlib` so the same table can be linked
//! statically. Either way callers see one C-ABI function table, returned by
//! the exported [`ptykit_native_api`] symbol.
//!
//! Every entry reports failure as an OS error code (`errno` on Unix,
//! `GetLastError`/`HRESULT` on Windows); `0` means success.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use std::os::raw::c_char;
use std::os::raw::c_int;

/// Version of the function table layout
///
/// Bumped whenever a table field, its signature, or a `Raw*` struct changes.
pub const NATIVE_ABI_VERSION: u32 = 3;

/// Name of the exported entry point, NUL-terminated for symbol lookup
pub const ENTRY_SYMBOL: &[u8] = b"ptykit_native_api\0";

/// Library file stem shared by the cdylib on every platform
pub const LIBRARY_NAME: &str = "ptykit_native";

/// Table family: Unix pty primitives
pub const FAMILY_UNIX: u32 = 1;
/// Table family: Windows console primitives
pub const FAMILY_WINDOWS: u32 = 2;

/// Family compiled into this build
#[cfg(unix)]
pub const FAMILY: u32 = FAMILY_UNIX;
#[cfg(windows)]
pub const FAMILY: u32 = FAMILY_WINDOWS;

/// Capacity of fixed-size name buffers (pty device names, pipe names)
pub const NAME_MAX: usize = 256;

/// Success return code
pub const OK: c_int = 0;

/// Entry point signature
pub type EntryFn = unsafe extern "C" fn() -> *const NativeApi;

/// The function table
#[repr(C)]
pub struct NativeApi {
    pub abi_version: u32,
    pub family: u32,
    #[cfg(unix)]
    pub unix: UnixApi,
    #[cfg(windows)]
    pub windows: WindowsApi,
}

// ==================== Unix ====================

/// Spawn request
///
/// All strings are NUL-terminated. `argv` and `envp` are NULL-terminated
/// arrays. `file` must already be an absolute or cwd-relative path: the
/// child performs no `PATH` search. `uid`/`gid` of `-1` leave the identity
/// unchanged.
#[cfg(unix)]
#[repr(C)]
pub struct RawSpawnRequest {
    pub file: *const c_char,
    pub argv: *const *const c_char,
    pub envp: *const *const c_char,
    pub cwd: *const c_char,
    pub cols: u16,
    pub rows: u16,
    pub uid: i64,
    pub gid: i64,
    pub utf8: bool,
}

/// Result of a successful fork
#[cfg(unix)]
#[repr(C)]
pub struct RawForkedPty {
    pub master: c_int,
    pub pid: c_int,
    pub pty_name: [c_char; NAME_MAX],
}

/// Result of opening a pty pair without a process
#[cfg(unix)]
#[repr(C)]
pub struct RawOpenedPty {
    pub master: c_int,
    pub slave: c_int,
    pub pty_name: [c_char; NAME_MAX],
}

/// Exit status of a reaped child
///
/// Exactly one of `code`/`signal` is meaningful; `signal` is `0` for a
/// normal exit.
#[cfg(unix)]
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawExit {
    pub code: c_int,
    pub signal: c_int,
}

#[cfg(unix)]
#[repr(C)]
pub struct UnixApi {
    /// Create a pty pair and run `file` on its slave side
    ///
    /// Returns only after the child has exec'd (or failed to).
    pub fork: unsafe extern "C" fn(*const RawSpawnRequest, *mut RawForkedPty) -> c_int,
    /// Create a pty pair without a process
    pub open: unsafe extern "C" fn(u16, u16, bool, *mut RawOpenedPty) -> c_int,
    /// Validate an existing master fd and apply a size to it
    pub attach: unsafe extern "C" fn(c_int, u16, u16) -> c_int,
    pub resize: unsafe extern "C" fn(c_int, u16, u16) -> c_int,
    /// Name of the foreground process group on the pty, written NUL-terminated
    ///
    /// Returns the name length, or a negative value if unknown.
    pub process_name: unsafe extern "C" fn(c_int, *mut c_char, usize) -> isize,
    /// Signal the process group led by `pid`
    pub kill: unsafe extern "C" fn(c_int, c_int) -> c_int,
    /// Block until `pid` exits and reap it
    pub wait: unsafe extern "C" fn(c_int, *mut RawExit) -> c_int,
}

// ==================== Windows ====================

/// Windows spawn request
///
/// All strings are NUL-terminated UTF-16. `env_block` is a sorted,
/// double-NUL-terminated block or null to inherit. `support_dir` is the
/// directory holding `winpty.dll` and `winpty-agent.exe`.
#[cfg(windows)]
#[repr(C)]
pub struct RawWinSpawnRequest {
    pub file: *const u16,
    pub command_line: *const u16,
    pub cwd: *const u16,
    pub env_block: *const u16,
    pub support_dir: *const u16,
    pub cols: i16,
    pub rows: i16,
    pub inherit_cursor: bool,
    pub debug: bool,
}

/// A started ConPTY session
///
/// `input`, `output`, and `process` are handles now owned by the caller.
#[cfg(windows)]
#[repr(C)]
pub struct RawConPty {
    pub id: u32,
    pub pid: u32,
    pub input: isize,
    pub output: isize,
    pub process: isize,
}

/// A started WinPTY session
///
/// `process` is a handle to the inner process, owned by the caller.
#[cfg(windows)]
#[repr(C)]
pub struct RawWinPty {
    pub agent_pid: u32,
    pub pid: u32,
    pub process: isize,
    pub conin: [u16; NAME_MAX],
    pub conout: [u16; NAME_MAX],
}

#[cfg(windows)]
#[repr(C)]
pub struct WindowsApi {
    /// Whether the pseudo-console API is present on this host
    pub conpty_available: unsafe extern "C" fn() -> bool,
    pub conpty_spawn: unsafe extern "C" fn(*const RawWinSpawnRequest, *mut RawConPty) -> u32,
    pub conpty_resize: unsafe extern "C" fn(u32, i16, i16) -> u32,
    /// Close the pseudo console, ending its attached processes
    pub conpty_kill: unsafe extern "C" fn(u32) -> u32,
    pub winpty_spawn: unsafe extern "C" fn(*const RawWinSpawnRequest, *mut RawWinPty) -> u32,
    pub winpty_resize: unsafe extern "C" fn(u32, i32, i32) -> u32,
    /// Free the agent, ending its console
    pub winpty_kill: unsafe extern "C" fn(u32) -> u32,
    /// Block on a process handle, then close it and report the exit code
    pub wait_process: unsafe extern "C" fn(isize, *mut u32) -> u32,
    /// Pids attached to the console of `pid`, in console order
    ///
    /// Writes at most `cap` pids and the total count; a count larger than
    /// `cap` means the caller should retry with a larger buffer.
    pub console_process_list: unsafe extern "C" fn(u32, *mut u32, usize, *mut usize) -> u32,
    /// Full image path of `pid`, UTF-16, length written to the last argument
    pub process_image_name: unsafe extern "C" fn(u32, *mut u16, usize, *mut usize) -> u32,
}

// ==================== Export ====================

#[cfg(unix)]
static NATIVE_API: NativeApi = NativeApi {
    abi_version: NATIVE_ABI_VERSION,
    family: FAMILY,
    unix: UnixApi {
        fork: unix::pty_fork,
        open: unix::pty_open,
        attach: unix::pty_attach,
        resize: unix::pty_resize,
        process_name: unix::pty_process_name,
        kill: unix::pty_kill,
        wait: unix::pty_wait,
    },
};

#[cfg(windows)]
static NATIVE_API: NativeApi = NativeApi {
    abi_version: NATIVE_ABI_VERSION,
    family: FAMILY,
    windows: WindowsApi {
        conpty_available: windows::conpty::available,
        conpty_spawn: windows::conpty::spawn,
        conpty_resize: windows::conpty::resize,
        conpty_kill: windows::conpty::kill,
        winpty_spawn: windows::winpty::spawn,
        winpty_resize: windows::winpty::resize,
        winpty_kill: windows::winpty::kill,
        wait_process: windows::wait_process,
        console_process_list: windows::console::process_list,
        process_image_name: windows::console::image_name,
    },
};

/// Exported entry point
#[no_mangle]
pub extern "C" fn ptykit_native_api() -> *const NativeApi {
    &NATIVE_API
}

/// The statically linked table
pub fn native_api() -> &'static NativeApi {
    &NATIVE_API
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_header() {
        let api = native_api();
        assert_eq!(api.abi_version, NATIVE_ABI_VERSION);
        assert_eq!(api.family, FAMILY);
    }

    #[test]
    fn test_entry_point_returns_static_table() {
        let ptr = ptykit_native_api();
        assert!(std::ptr::eq(ptr, native_api()));
    }

    #[test]
    fn test_entry_symbol_is_nul_terminated() {
        assert_eq!(ENTRY_SYMBOL.last(), Some(&0));
        assert_eq!(&ENTRY_SYMBOL[..ENTRY_SYMBOL.len() - 1], b"ptykit_native_api");
    }
}
