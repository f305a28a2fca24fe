//! Console attachment queries
//!
//! Attaching to another console detaches the caller from its own, so these
//! are meant to run inside the short-lived console-list helper.

use windows::core::PWSTR;
use windows::Win32::Foundation::{CloseHandle, ERROR_INVALID_HANDLE};
use windows::Win32::System::Console::{AttachConsole, FreeConsole, GetConsoleProcessList};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};

use super::{error_code, E_UNKNOWN};

pub unsafe extern "C" fn process_list(pid: u32, buf: *mut u32, cap: usize, count: *mut usize) -> u32 {
    if buf.is_null() || cap == 0 || count.is_null() {
        return E_UNKNOWN;
    }
    *count = 0;

    let _ = FreeConsole();
    if let Err(err) = AttachConsole(pid) {
        // A target without a console has nothing attached
        if err.code() == ERROR_INVALID_HANDLE.to_hresult() {
            return 0;
        }
        return error_code(&err);
    }

    let list = std::slice::from_raw_parts_mut(buf, cap);
    let n = GetConsoleProcessList(list);
    let result = if n == 0 {
        error_code(&windows::core::Error::from_win32())
    } else {
        *count = n as usize;
        0
    };

    let _ = FreeConsole();
    result
}

pub unsafe extern "C" fn image_name(pid: u32, buf: *mut u16, cap: usize, len: *mut usize) -> u32 {
    if buf.is_null() || cap == 0 || len.is_null() {
        return E_UNKNOWN;
    }
    *len = 0;

    let process = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
        Ok(process) => process,
        Err(err) => return error_code(&err),
    };

    let mut size = cap.min(u32::MAX as usize) as u32;
    let result = QueryFullProcessImageNameW(process, PROCESS_NAME_WIN32, PWSTR(buf), &mut size);
    let _ = CloseHandle(process);

    match result {
        Ok(()) => {
            *len = size as usize;
            0
        }
        Err(err) => error_code(&err),
    }
}
