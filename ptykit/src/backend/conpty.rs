//! ConPTY backend

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use ptykit_utils::{PtykitError, Result};

use super::command_line::{
    argv_to_command_line, environment_block, environment_entries, resolve_on_path, to_wide,
    with_raw_args,
};
use super::{reject_signal, spawn_cwd, Backend, Launch};
use crate::console_list;
use crate::native::{NativeCapability, WinSpawnRequest};
use crate::options::CommandArgs;
use crate::resolver::PlatformBinaryDescriptor;
use crate::signal::Signal;
use crate::terminal::{ExitStatus, Spawned, TerminalIo};

/// A pseudo console and the process attached to it
pub(crate) struct ConPty {
    native: NativeCapability,
    id: u32,
    pid: u32,
    file: String,
    helper: Option<PathBuf>,
}

impl ConPty {
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let (cols, rows) = console_size(cols, rows)?;
        self.native
            .conpty_resize(self.id, cols, rows)
            .map_err(|e| PtykitError::native_io(format!("resize failed: {}", e)))
    }

    /// Close the pseudo console, which ends the attached process
    pub fn kill(&self, signal: Option<Signal>) -> Result<()> {
        reject_signal(signal)?;
        self.native
            .conpty_kill(self.id)
            .map_err(|e| PtykitError::native_io(format!("kill failed: {}", e)))
    }

    /// Image name of the newest process on the console
    ///
    /// Falls back to the spawned file when the console cannot be listed.
    pub async fn process_name(&self) -> Option<String> {
        if let Some(helper) = &self.helper {
            match console_list::query(helper, self.pid).await {
                Ok(processes) => {
                    if let Some(name) = console_list::foreground_name(&processes, None) {
                        return Some(name);
                    }
                }
                Err(e) => debug!(pid = self.pid, error = %e, "Console list query failed"),
            }
        }
        Some(file_name(&self.file))
    }
}

pub(crate) fn spawn(
    native: &NativeCapability,
    descriptor: &PlatformBinaryDescriptor,
    helper: Option<PathBuf>,
    launch: &Launch<'_>,
) -> Result<Spawned> {
    let request = spawn_request(descriptor, launch)?;
    let session = native
        .conpty_spawn(&request)
        .map_err(|e| PtykitError::spawn_failed(format!("{}: {}", launch.file, e)))?;
    debug!(
        pid = session.pid,
        id = session.id,
        file = launch.file,
        cols = launch.cols,
        rows = launch.rows,
        "Spawned process on pseudo console"
    );

    let id = session.id;
    let waiter = native.clone();
    let process = session.process;
    let io = TerminalIo {
        reader: Box::new(File::from(session.output)),
        writer: Box::new(File::from(session.input)),
        waiter: Some(Box::new(move || {
            let status = match waiter.wait_process(process) {
                Ok(code) => ExitStatus::Exited(code as i32),
                Err(e) => {
                    warn!(id, error = %e, "Failed to wait for process");
                    ExitStatus::Exited(-1)
                }
            };
            // Output only reaches EOF once the pseudo console is closed
            let _ = waiter.conpty_kill(id);
            status
        })),
    };

    Ok(Spawned {
        backend: Backend::ConPty(ConPty {
            native: native.clone(),
            id,
            pid: session.pid,
            file: launch.file.to_string(),
            helper,
        }),
        pid: Some(session.pid),
        pty_name: None,
        io,
    })
}

/// Build the native request shared by both Windows backends
pub(super) fn spawn_request(
    descriptor: &PlatformBinaryDescriptor,
    launch: &Launch<'_>,
) -> Result<WinSpawnRequest> {
    let options = launch.options;
    if options.uid.is_some() || options.gid.is_some() {
        return Err(PtykitError::invalid_options(
            "uid and gid are not supported on Windows",
        ));
    }

    let cwd = spawn_cwd(options.cwd.as_ref())?;

    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.extend(options.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    let entries = environment_entries(vars);
    let search_path = entries.iter().find_map(|entry| {
        let (key, value) = entry.split_once('=')?;
        key.eq_ignore_ascii_case("PATH").then_some(value)
    });

    let program = resolve_on_path(launch.file, search_path, |p| p.is_file()).ok_or_else(|| {
        PtykitError::spawn_failed(format!("{}: file not found", launch.file))
    })?;

    let command_line = match launch.args {
        CommandArgs::Argv(args) => argv_to_command_line(launch.file, args),
        CommandArgs::CommandLine(raw) => with_raw_args(launch.file, raw),
    };
    let (cols, rows) = console_size(launch.cols, launch.rows)?;

    Ok(WinSpawnRequest {
        file: wide_path(&program),
        command_line: to_wide(&command_line),
        cwd: Some(wide_path(&cwd)),
        env_block: Some(environment_block(&entries)),
        support_dir: wide_path(&descriptor.directory),
        cols,
        rows,
        inherit_cursor: options.conpty_inherit_cursor,
        debug: options.debug,
    })
}

/// Console dimensions are `SHORT`s
pub(super) fn console_size(cols: u16, rows: u16) -> Result<(i16, i16)> {
    match (i16::try_from(cols), i16::try_from(rows)) {
        (Ok(cols), Ok(rows)) => Ok((cols, rows)),
        _ => Err(PtykitError::invalid_options(format!(
            "console size {}x{} is too large",
            cols, rows
        ))),
    }
}

fn wide_path(path: &Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

pub(super) fn file_name(file: &str) -> String {
    PathBuf::from(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_size_bounds() {
        assert_eq!(console_size(80, 24).unwrap(), (80, 24));
        assert!(console_size(40000, 24).is_err());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name(r"C:\Windows\System32\cmd.exe"), "cmd.exe");
        assert_eq!(file_name("powershell.exe"), "powershell.exe");
    }
}
