//! Windows console primitives

pub mod conpty;
pub mod console;
pub mod winpty;

use std::ffi::c_void;

use windows::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, WAIT_FAILED};
use windows::Win32::System::Threading::{GetExitCodeProcess, WaitForSingleObject, INFINITE};

/// Generic failure code when the OS reported none
pub(crate) const E_UNKNOWN: u32 = 0x8000_4005;

/// Raw code of a `windows` crate error
pub(crate) fn error_code(err: &windows::core::Error) -> u32 {
    match err.code().0 as u32 {
        0 => E_UNKNOWN,
        code => code,
    }
}

pub(crate) fn handle(raw: isize) -> HANDLE {
    HANDLE(raw as *mut c_void)
}

pub unsafe extern "C" fn wait_process(process: isize, exit_code: *mut u32) -> u32 {
    if exit_code.is_null() {
        return E_UNKNOWN;
    }
    let process = handle(process);

    if WaitForSingleObject(process, INFINITE) == WAIT_FAILED {
        let code = GetLastError().0;
        let _ = CloseHandle(process);
        return if code == 0 { E_UNKNOWN } else { code };
    }

    let result = GetExitCodeProcess(process, &mut *exit_code);
    let _ = CloseHandle(process);
    match result {
        Ok(()) => 0,
        Err(err) => error_code(&err),
    }
}
