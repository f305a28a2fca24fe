//! ConPTY sessions
//!
//! The pseudo-console entry points are resolved from kernel32 at runtime so
//! the extension still loads on hosts that predate them.

use std::collections::HashMap;
use std::ffi::c_void;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use libloading::Library;
use parking_lot::Mutex;
use windows::core::{HRESULT, PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Console::{COORD, HPCON};
use windows::Win32::System::Pipes::CreatePipe;
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, InitializeProcThreadAttributeList,
    UpdateProcThreadAttribute, CREATE_UNICODE_ENVIRONMENT, EXTENDED_STARTUPINFO_PRESENT,
    LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION, STARTUPINFOEXW,
};

use super::{error_code, E_UNKNOWN};
use crate::{RawConPty, RawWinSpawnRequest};

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x0002_0016;
const PSEUDOCONSOLE_INHERIT_CURSOR: u32 = 0x1;
/// `HRESULT_FROM_WIN32(ERROR_NOT_FOUND)`
const E_NOT_FOUND: u32 = 0x8007_0490;
/// `HRESULT_FROM_WIN32(ERROR_PROC_NOT_FOUND)`
const E_PROC_NOT_FOUND: u32 = 0x8007_007F;

type CreateFn = unsafe extern "system" fn(COORD, HANDLE, HANDLE, u32, *mut HPCON) -> HRESULT;
type ResizeFn = unsafe extern "system" fn(HPCON, COORD) -> HRESULT;
type CloseFn = unsafe extern "system" fn(HPCON);

struct ConPtyFns {
    create: CreateFn,
    resize: ResizeFn,
    close: CloseFn,
    _kernel32: Library,
}

static FNS: OnceLock<Option<ConPtyFns>> = OnceLock::new();
static SESSIONS: Mutex<Option<HashMap<u32, HPCON>>> = parking_lot::const_mutex(None);
static NEXT_ID: AtomicU32 = AtomicU32::new(1);

fn fns() -> Option<&'static ConPtyFns> {
    FNS.get_or_init(|| unsafe {
        let kernel32 = Library::new("kernel32.dll").ok()?;
        let create = *kernel32.get::<CreateFn>(b"CreatePseudoConsole\0").ok()?;
        let resize = *kernel32.get::<ResizeFn>(b"ResizePseudoConsole\0").ok()?;
        let close = *kernel32.get::<CloseFn>(b"ClosePseudoConsole\0").ok()?;
        Some(ConPtyFns {
            create,
            resize,
            close,
            _kernel32: kernel32,
        })
    })
    .as_ref()
}

fn hresult(hr: HRESULT) -> u32 {
    if hr.is_ok() {
        0
    } else {
        hr.0 as u32
    }
}

pub unsafe extern "C" fn available() -> bool {
    fns().is_some()
}

pub unsafe extern "C" fn spawn(req: *const RawWinSpawnRequest, out: *mut RawConPty) -> u32 {
    if req.is_null() || out.is_null() || (*req).command_line.is_null() {
        return E_UNKNOWN;
    }
    let Some(fns) = fns() else {
        return E_PROC_NOT_FOUND;
    };
    let req = &*req;

    let mut input_read = HANDLE::default();
    let mut input_write = HANDLE::default();
    let mut output_read = HANDLE::default();
    let mut output_write = HANDLE::default();

    if let Err(err) = CreatePipe(&mut input_read, &mut input_write, None, 0) {
        return error_code(&err);
    }
    if let Err(err) = CreatePipe(&mut output_read, &mut output_write, None, 0) {
        let _ = CloseHandle(input_read);
        let _ = CloseHandle(input_write);
        return error_code(&err);
    }

    let size = COORD {
        X: req.cols,
        Y: req.rows,
    };
    let flags = if req.inherit_cursor {
        PSEUDOCONSOLE_INHERIT_CURSOR
    } else {
        0
    };

    let mut hpc = HPCON::default();
    let hr = (fns.create)(size, input_read, output_write, flags, &mut hpc);

    // The pseudo console holds its own references to its ends of the pipes
    let _ = CloseHandle(input_read);
    let _ = CloseHandle(output_write);

    if hr.is_err() {
        let _ = CloseHandle(input_write);
        let _ = CloseHandle(output_read);
        return hresult(hr);
    }

    match start_process(req, hpc) {
        Ok(info) => {
            let _ = CloseHandle(info.hThread);

            let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
            SESSIONS.lock().get_or_insert_with(HashMap::new).insert(id, hpc);

            let out = &mut *out;
            out.id = id;
            out.pid = info.dwProcessId;
            out.input = input_write.0 as isize;
            out.output = output_read.0 as isize;
            out.process = info.hProcess.0 as isize;
            0
        }
        Err(code) => {
            (fns.close)(hpc);
            let _ = CloseHandle(input_write);
            let _ = CloseHandle(output_read);
            code
        }
    }
}

unsafe fn start_process(req: &RawWinSpawnRequest, hpc: HPCON) -> Result<PROCESS_INFORMATION, u32> {
    let mut attr_size: usize = 0;
    let _ = InitializeProcThreadAttributeList(
        LPPROC_THREAD_ATTRIBUTE_LIST::default(),
        1,
        0,
        &mut attr_size,
    );

    let mut attr_buffer = vec![0u8; attr_size];
    let attr_list = LPPROC_THREAD_ATTRIBUTE_LIST(attr_buffer.as_mut_ptr() as *mut _);
    InitializeProcThreadAttributeList(attr_list, 1, 0, &mut attr_size)
        .map_err(|e| error_code(&e))?;

    let result = (|| {
        UpdateProcThreadAttribute(
            attr_list,
            0,
            PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
            Some(hpc.0 as *const c_void),
            mem::size_of::<HPCON>(),
            None,
            None,
        )
        .map_err(|e| error_code(&e))?;

        let mut startup_info = STARTUPINFOEXW {
            StartupInfo: mem::zeroed(),
            lpAttributeList: attr_list,
        };
        startup_info.StartupInfo.cb = mem::size_of::<STARTUPINFOEXW>() as u32;

        let mut command_line = wide_copy(req.command_line);
        let mut creation_flags = EXTENDED_STARTUPINFO_PRESENT;
        let environment = if req.env_block.is_null() {
            None
        } else {
            creation_flags |= CREATE_UNICODE_ENVIRONMENT;
            Some(req.env_block as *const c_void)
        };

        let mut info = PROCESS_INFORMATION::default();
        CreateProcessW(
            PCWSTR::null(),
            PWSTR(command_line.as_mut_ptr()),
            None,
            None,
            false,
            creation_flags,
            environment,
            PCWSTR(req.cwd),
            &startup_info.StartupInfo,
            &mut info,
        )
        .map_err(|e| error_code(&e))?;

        Ok(info)
    })();

    DeleteProcThreadAttributeList(attr_list);
    result
}

/// Copy a NUL-terminated wide string, keeping the terminator
unsafe fn wide_copy(ptr: *const u16) -> Vec<u16> {
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    std::slice::from_raw_parts(ptr, len + 1).to_vec()
}

pub unsafe extern "C" fn resize(id: u32, cols: i16, rows: i16) -> u32 {
    let Some(fns) = fns() else {
        return E_PROC_NOT_FOUND;
    };
    let Some(hpc) = SESSIONS.lock().as_ref().and_then(|s| s.get(&id).copied()) else {
        return E_NOT_FOUND;
    };
    hresult((fns.resize)(hpc, COORD { X: cols, Y: rows }))
}

pub unsafe extern "C" fn kill(id: u32) -> u32 {
    let Some(fns) = fns() else {
        return E_PROC_NOT_FOUND;
    };
    let Some(hpc) = SESSIONS.lock().as_mut().and_then(|s| s.remove(&id)) else {
        return E_NOT_FOUND;
    };
    (fns.close)(hpc);
    0
}
