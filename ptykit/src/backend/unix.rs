//! Unix pty backend

use std::collections::BTreeMap;
use std::ffi::{CString, OsStr, OsString};
use std::fs::File;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use ptykit_utils::{PtykitError, Result};

use super::{spawn_cwd, Backend, Launch};
use crate::native::{ChildExit, ForkRequest, NativeCapability};
use crate::options::{CommandArgs, OpenOptions};
use crate::signal::Signal;
use crate::terminal::{ExitStatus, Spawned, TerminalIo};

/// Variables describing an enclosing multiplexer or terminal size; they
/// would be wrong inside the new terminal
const SANITIZED_ENV: &[&str] = &[
    "TMUX", "TMUX_PANE", "STY", "WINDOW", "WINDOWID", "TERMCAP", "COLUMNS", "LINES",
];

/// A pty master, and the process on its slave side if there is one
pub(crate) struct UnixPty {
    native: NativeCapability,
    master: OwnedFd,
    pid: Option<i32>,
}

impl UnixPty {
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.native
            .resize(self.master.as_fd(), cols, rows)
            .map_err(|e| PtykitError::native_io(format!("resize failed: {}", e)))
    }

    /// Signal the process group of the spawned process
    pub fn kill(&self, signal: Option<Signal>) -> Result<()> {
        let pid = self
            .pid
            .ok_or_else(|| PtykitError::invalid_options("terminal has no process"))?;
        let signal = signal.unwrap_or_default();
        self.native.kill(pid, signal.as_raw()).map_err(|e| {
            warn!(pid, %signal, error = %e, "Failed to signal process group");
            PtykitError::native_io(format!("kill failed: {}", e))
        })
    }

    pub fn process_name(&self) -> Option<String> {
        self.native.process_name(self.master.as_fd())
    }
}

/// Fork `launch.file` onto a new pty
pub(crate) fn spawn(native: &NativeCapability, launch: &Launch<'_>) -> Result<Spawned> {
    let options = launch.options;
    let args = match launch.args {
        CommandArgs::Argv(args) => args,
        CommandArgs::CommandLine(_) => {
            return Err(PtykitError::invalid_options(
                "a pre-escaped command line is only supported on Windows",
            ))
        }
    };
    let cwd = spawn_cwd(options.cwd.as_ref())?;

    let env = build_env(std::env::vars_os(), &options.env, launch.term_name);
    let search_path = env.get(OsStr::new("PATH")).cloned();
    let program = resolve_executable(launch.file, search_path.as_deref(), &cwd).ok_or_else(|| {
        PtykitError::spawn_failed(format!("{}: command not found", launch.file))
    })?;

    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(c_string(launch.file, "file")?);
    for arg in args {
        argv.push(c_string(arg.as_str(), "argument")?);
    }
    let envp = env
        .into_iter()
        .map(|(key, value)| {
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend(value.into_vec());
            CString::new(entry)
                .map_err(|_| PtykitError::invalid_options("environment contains a NUL byte"))
        })
        .collect::<Result<Vec<_>>>()?;

    let request = ForkRequest {
        file: c_string(program.as_os_str(), "file")?,
        argv,
        envp,
        cwd: Some(c_string(cwd.as_os_str(), "cwd")?),
        cols: launch.cols,
        rows: launch.rows,
        uid: options.uid,
        gid: options.gid,
        utf8: options.encoding_utf8.unwrap_or(true),
    };

    let forked = native
        .fork(&request)
        .map_err(|e| PtykitError::spawn_failed(format!("{}: {}", launch.file, e)))?;
    debug!(
        pid = forked.pid,
        file = launch.file,
        program = %program.display(),
        pty = %forked.pty_name,
        cols = launch.cols,
        rows = launch.rows,
        "Spawned process on pty"
    );

    let pid = forked.pid;
    let io = master_io(&forked.master)?;
    let waiter = native.clone();
    let io = TerminalIo {
        waiter: Some(Box::new(move || wait_child(&waiter, pid))),
        ..io
    };

    Ok(Spawned {
        backend: Backend::Unix(UnixPty {
            native: native.clone(),
            master: forked.master,
            pid: Some(pid),
        }),
        pid: u32::try_from(pid).ok(),
        pty_name: Some(forked.pty_name),
        io,
        slave: None,
    })
}

/// Open a pty with no process, or attach to an existing one
pub(crate) fn open(native: &NativeCapability, options: OpenOptions, cols: u16, rows: u16) -> Result<Spawned> {
    let utf8 = options.encoding_utf8.unwrap_or(true);

    let (master, slave, pty_name) = match options.existing {
        Some(existing) => {
            native
                .attach(existing.master.as_fd(), cols, rows)
                .map_err(|e| PtykitError::attach_failed(format!("not a usable pty: {}", e)))?;
            (existing.master, existing.slave, None)
        }
        None => {
            let opened = native
                .open(cols, rows, utf8)
                .map_err(|e| PtykitError::attach_failed(format!("cannot open pty: {}", e)))?;
            (opened.master, Some(opened.slave), Some(opened.pty_name))
        }
    };
    debug!(pty = ?pty_name, cols, rows, "Opened pty");

    let io = master_io(&master)?;
    Ok(Spawned {
        backend: Backend::Unix(UnixPty {
            native: native.clone(),
            master,
            pid: None,
        }),
        pid: None,
        pty_name,
        io,
        slave,
    })
}

/// Reader and writer on duplicates of the master
fn master_io(master: &OwnedFd) -> Result<TerminalIo> {
    let reader = File::from(master.try_clone()?);
    let writer = File::from(master.try_clone()?);
    Ok(TerminalIo {
        reader: Box::new(reader),
        writer: Box::new(writer),
        waiter: None,
    })
}

fn wait_child(native: &NativeCapability, pid: i32) -> ExitStatus {
    match native.wait(pid) {
        Ok(ChildExit::Code(code)) => ExitStatus::Exited(code),
        Ok(ChildExit::Signal(signal)) => ExitStatus::Signaled(signal),
        Err(e) => {
            warn!(pid, error = %e, "Failed to reap child");
            ExitStatus::Exited(-1)
        }
    }
}

fn c_string(value: impl AsRef<OsStr>, what: &str) -> Result<CString> {
    CString::new(value.as_ref().as_bytes())
        .map_err(|_| PtykitError::invalid_options(format!("{} contains a NUL byte", what)))
}

/// Inherited environment with overrides applied and `TERM` set
fn build_env(
    inherited: impl IntoIterator<Item = (OsString, OsString)>,
    overrides: &std::collections::HashMap<String, String>,
    term_name: &str,
) -> BTreeMap<OsString, OsString> {
    let mut env: BTreeMap<OsString, OsString> = inherited
        .into_iter()
        .filter(|(key, _)| !SANITIZED_ENV.iter().any(|s| key.as_os_str() == OsStr::new(s)))
        .collect();
    env.insert("TERM".into(), term_name.into());
    for (key, value) in overrides {
        env.insert(key.into(), value.into());
    }
    env
}

/// Resolve `file` the way `execvp` would
///
/// Names containing a slash are taken as paths, relative ones against
/// `cwd`. Bare names are searched for in `search_path`.
pub fn resolve_executable(file: &str, search_path: Option<&OsStr>, cwd: &Path) -> Option<PathBuf> {
    if file.is_empty() {
        return None;
    }
    if file.contains('/') {
        let path = cwd.join(file);
        return is_executable(&path).then_some(path);
    }

    let search_path = search_path?;
    std::env::split_paths(search_path)
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                cwd.join(file)
            } else {
                cwd.join(dir).join(file)
            }
        })
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn make_executable(path: &Path) {
        std::fs::write(path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_resolve_searches_path_in_order() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        make_executable(&second.join("tool"));

        let path = std::env::join_paths([&first, &second]).unwrap();
        let found = resolve_executable("tool", Some(&path), dir.path());
        assert_eq!(found, Some(second.join("tool")));

        make_executable(&first.join("tool"));
        let found = resolve_executable("tool", Some(&path), dir.path());
        assert_eq!(found, Some(first.join("tool")));
    }

    #[test]
    fn test_resolve_skips_non_executable() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("data"), b"plain").unwrap();

        let path = dir.path().as_os_str();
        assert_eq!(resolve_executable("data", Some(path), dir.path()), None);
        assert_eq!(resolve_executable("missing", Some(path), dir.path()), None);
        assert_eq!(resolve_executable("data", None, dir.path()), None);
    }

    #[test]
    fn test_resolve_slash_is_relative_to_cwd() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        make_executable(&dir.path().join("bin/run"));

        assert_eq!(
            resolve_executable("./bin/run", None, dir.path()),
            Some(dir.path().join("./bin/run"))
        );
        assert_eq!(resolve_executable("", None, dir.path()), None);
    }

    #[test]
    fn test_build_env_sets_term_and_strips_multiplexer() {
        let inherited = vec![
            (OsString::from("HOME"), OsString::from("/home/me")),
            (OsString::from("TMUX"), OsString::from("/tmp/tmux-1000/default")),
            (OsString::from("COLUMNS"), OsString::from("200")),
            (OsString::from("TERM"), OsString::from("screen")),
        ];
        let mut overrides = HashMap::new();
        overrides.insert("EDITOR".to_string(), "vi".to_string());

        let env = build_env(inherited, &overrides, "xterm-256color");
        assert_eq!(env.get(OsStr::new("HOME")).unwrap(), "/home/me");
        assert_eq!(env.get(OsStr::new("TERM")).unwrap(), "xterm-256color");
        assert_eq!(env.get(OsStr::new("EDITOR")).unwrap(), "vi");
        assert!(env.get(OsStr::new("TMUX")).is_none());
        assert!(env.get(OsStr::new("COLUMNS")).is_none());
    }

    #[test]
    fn test_explicit_term_override_wins() {
        let mut overrides = HashMap::new();
        overrides.insert("TERM".to_string(), "dumb".to_string());
        let env = build_env(Vec::new(), &overrides, "xterm-256color");
        assert_eq!(env.get(OsStr::new("TERM")).unwrap(), "dumb");
    }

    #[test]
    fn test_c_string_rejects_nul() {
        assert!(c_string("ok", "file").is_ok());
        assert!(matches!(
            c_string("bad\0arg", "argument"),
            Err(PtykitError::InvalidOptions(_))
        ));
    }
}
