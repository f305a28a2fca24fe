//! WinPTY agent sessions
//!
//! `winpty.dll` is loaded from the request's support directory on first use
//! and kept for the life of the process.

use std::collections::HashMap;
use std::ffi::{c_void, OsString};
use std::os::windows::ffi::OsStringExt;
use std::path::PathBuf;
use std::ptr;
use std::sync::OnceLock;

use libloading::Library;
use parking_lot::Mutex;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{BOOL, HANDLE};
use windows::Win32::System::Environment::SetEnvironmentVariableW;
use windows::Win32::System::Threading::GetProcessId;

use super::E_UNKNOWN;
use crate::{RawWinPty, RawWinSpawnRequest, NAME_MAX};

const WINPTY_SPAWN_FLAG_AUTO_SHUTDOWN: u64 = 1;
/// `HRESULT_FROM_WIN32(ERROR_NOT_FOUND)`
const E_NOT_FOUND: u32 = 0x8007_0490;
/// `HRESULT_FROM_WIN32(ERROR_MOD_NOT_FOUND)`
const E_MOD_NOT_FOUND: u32 = 0x8007_007E;
/// Failure codes are reported in a private facility so callers can tell
/// them from OS errors
const E_WINPTY_BASE: u32 = 0xA0AA_0000;

type Handle = *mut c_void;

struct WinPtyLib {
    config_new: unsafe extern "C" fn(u64, *mut Handle) -> Handle,
    config_free: unsafe extern "C" fn(Handle),
    config_set_initial_size: unsafe extern "C" fn(Handle, i32, i32),
    open: unsafe extern "C" fn(Handle, *mut Handle) -> Handle,
    free: unsafe extern "C" fn(Handle),
    agent_process: unsafe extern "C" fn(Handle) -> HANDLE,
    conin_name: unsafe extern "C" fn(Handle) -> *const u16,
    conout_name: unsafe extern "C" fn(Handle) -> *const u16,
    spawn_config_new: unsafe extern "C" fn(
        u64,
        *const u16,
        *const u16,
        *const u16,
        *const u16,
        *mut Handle,
    ) -> Handle,
    spawn_config_free: unsafe extern "C" fn(Handle),
    spawn: unsafe extern "C" fn(Handle, Handle, *mut HANDLE, *mut HANDLE, *mut u32, *mut Handle) -> BOOL,
    set_size: unsafe extern "C" fn(Handle, i32, i32, *mut Handle) -> BOOL,
    error_code: unsafe extern "C" fn(Handle) -> u32,
    error_free: unsafe extern "C" fn(Handle),
    _library: Library,
}

/// An open agent
struct Session(Handle);

// The agent handle is only touched under the session lock
unsafe impl Send for Session {}

static LIBRARY: OnceLock<Result<WinPtyLib, u32>> = OnceLock::new();
static SESSIONS: Mutex<Option<HashMap<u32, Session>>> = parking_lot::const_mutex(None);

unsafe fn wide_path(ptr: *const u16) -> PathBuf {
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    PathBuf::from(OsString::from_wide(std::slice::from_raw_parts(ptr, len)))
}

unsafe fn load(support_dir: *const u16) -> Result<WinPtyLib, u32> {
    if support_dir.is_null() {
        return Err(E_MOD_NOT_FOUND);
    }
    let path = wide_path(support_dir).join("winpty.dll");
    let library = Library::new(path).map_err(|_| E_MOD_NOT_FOUND)?;

    Ok(WinPtyLib {
        config_new: symbol(&library, b"winpty_config_new\0")?,
        config_free: symbol(&library, b"winpty_config_free\0")?,
        config_set_initial_size: symbol(&library, b"winpty_config_set_initial_size\0")?,
        open: symbol(&library, b"winpty_open\0")?,
        free: symbol(&library, b"winpty_free\0")?,
        agent_process: symbol(&library, b"winpty_agent_process\0")?,
        conin_name: symbol(&library, b"winpty_conin_name\0")?,
        conout_name: symbol(&library, b"winpty_conout_name\0")?,
        spawn_config_new: symbol(&library, b"winpty_spawn_config_new\0")?,
        spawn_config_free: symbol(&library, b"winpty_spawn_config_free\0")?,
        spawn: symbol(&library, b"winpty_spawn\0")?,
        set_size: symbol(&library, b"winpty_set_size\0")?,
        error_code: symbol(&library, b"winpty_error_code\0")?,
        error_free: symbol(&library, b"winpty_error_free\0")?,
        _library: library,
    })
}

unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T, u32> {
    library.get::<T>(name).map(|s| *s).map_err(|_| E_MOD_NOT_FOUND)
}

impl WinPtyLib {
    /// Consume a winpty error object, returning its code in our facility
    unsafe fn take_error(&self, err: Handle) -> u32 {
        if err.is_null() {
            return E_UNKNOWN;
        }
        let code = (self.error_code)(err);
        (self.error_free)(err);
        E_WINPTY_BASE | (code & 0xFFFF)
    }
}

fn copy_name(src: *const u16, dst: &mut [u16; NAME_MAX]) {
    dst.fill(0);
    if src.is_null() {
        return;
    }
    let mut i = 0;
    unsafe {
        while i < NAME_MAX - 1 && *src.add(i) != 0 {
            dst[i] = *src.add(i);
            i += 1;
        }
    }
}

pub unsafe extern "C" fn spawn(req: *const RawWinSpawnRequest, out: *mut RawWinPty) -> u32 {
    if req.is_null() || out.is_null() {
        return E_UNKNOWN;
    }
    let req = &*req;

    let lib = match LIBRARY.get_or_init(|| load(req.support_dir)) {
        Ok(lib) => lib,
        Err(code) => return *code,
    };

    // The agent reads its debug switch from the environment it inherits
    let dbg_name: Vec<u16> = "WINPTYDBG\0".encode_utf16().collect();
    let dbg_value: Vec<u16> = "1\0".encode_utf16().collect();
    let _ = SetEnvironmentVariableW(
        PCWSTR(dbg_name.as_ptr()),
        if req.debug {
            PCWSTR(dbg_value.as_ptr())
        } else {
            PCWSTR::null()
        },
    );

    let mut err: Handle = ptr::null_mut();
    let config = (lib.config_new)(0, &mut err);
    if config.is_null() {
        return lib.take_error(err);
    }
    (lib.config_set_initial_size)(config, req.cols as i32, req.rows as i32);

    let mut err: Handle = ptr::null_mut();
    let pty = (lib.open)(config, &mut err);
    (lib.config_free)(config);
    if pty.is_null() {
        return lib.take_error(err);
    }

    let mut err: Handle = ptr::null_mut();
    let spawn_config = (lib.spawn_config_new)(
        WINPTY_SPAWN_FLAG_AUTO_SHUTDOWN,
        req.file,
        req.command_line,
        req.cwd,
        req.env_block,
        &mut err,
    );
    if spawn_config.is_null() {
        (lib.free)(pty);
        return lib.take_error(err);
    }

    let mut process = HANDLE::default();
    let mut err: Handle = ptr::null_mut();
    let ok = (lib.spawn)(
        pty,
        spawn_config,
        &mut process,
        ptr::null_mut(),
        ptr::null_mut(),
        &mut err,
    );
    (lib.spawn_config_free)(spawn_config);
    if !ok.as_bool() {
        (lib.free)(pty);
        return lib.take_error(err);
    }

    let agent_pid = GetProcessId((lib.agent_process)(pty));

    let out = &mut *out;
    out.agent_pid = agent_pid;
    out.pid = GetProcessId(process);
    out.process = process.0 as isize;
    copy_name((lib.conin_name)(pty), &mut out.conin);
    copy_name((lib.conout_name)(pty), &mut out.conout);

    SESSIONS
        .lock()
        .get_or_insert_with(HashMap::new)
        .insert(agent_pid, Session(pty));
    0
}

pub unsafe extern "C" fn resize(agent_pid: u32, cols: i32, rows: i32) -> u32 {
    let Some(Ok(lib)) = LIBRARY.get() else {
        return E_MOD_NOT_FOUND;
    };
    let sessions = SESSIONS.lock();
    let Some(session) = sessions.as_ref().and_then(|s| s.get(&agent_pid)) else {
        return E_NOT_FOUND;
    };

    let mut err: Handle = ptr::null_mut();
    if (lib.set_size)(session.0, cols, rows, &mut err).as_bool() {
        if !err.is_null() {
            (lib.error_free)(err);
        }
        0
    } else {
        lib.take_error(err)
    }
}

pub unsafe extern "C" fn kill(agent_pid: u32) -> u32 {
    let Some(Ok(lib)) = LIBRARY.get() else {
        return E_MOD_NOT_FOUND;
    };
    let Some(session) = SESSIONS.lock().as_mut().and_then(|s| s.remove(&agent_pid)) else {
        return E_NOT_FOUND;
    };
    (lib.free)(session.0);
    0
}
