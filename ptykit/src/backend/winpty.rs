//! WinPTY backend
//!
//! The agent owns a hidden console; input and output are relayed over the
//! named pipes it creates.

use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing::{debug, warn};

use ptykit_utils::{PtykitError, Result};

use super::conpty::{console_size, spawn_request};
use super::{reject_signal, Backend, Launch};
use crate::console_list;
use crate::native::NativeCapability;
use crate::resolver::PlatformBinaryDescriptor;
use crate::signal::Signal;
use crate::terminal::{ExitStatus, Spawned, TerminalIo};

/// An agent-hosted console and the process attached to it
pub(crate) struct WinPty {
    native: NativeCapability,
    agent_pid: u32,
    pid: u32,
    helper: Option<PathBuf>,
}

impl WinPty {
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let (cols, rows) = console_size(cols, rows)?;
        self.native
            .winpty_resize(self.agent_pid, cols.into(), rows.into())
            .map_err(|e| PtykitError::native_io(format!("resize failed: {}", e)))
    }

    /// Shut the agent down, which ends the attached process
    pub fn kill(&self, signal: Option<Signal>) -> Result<()> {
        reject_signal(signal)?;
        self.native
            .winpty_kill(self.agent_pid)
            .map_err(|e| PtykitError::native_io(format!("kill failed: {}", e)))
    }

    /// Image name of the newest process on the console
    pub async fn process_name(&self) -> Option<String> {
        let helper = self.helper.as_ref()?;
        match console_list::query(helper, self.pid).await {
            Ok(processes) => console_list::foreground_name(&processes, Some(self.agent_pid)),
            Err(e) => {
                debug!(pid = self.pid, error = %e, "Console list query failed");
                None
            }
        }
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
        .winpty_spawn(&request)
        .map_err(|e| PtykitError::spawn_failed(format!("{}: {}", launch.file, e)))?;
    debug!(
        pid = session.pid,
        agent_pid = session.agent_pid,
        file = launch.file,
        "Spawned process under winpty agent"
    );

    let agent_pid = session.agent_pid;
    let conin = OpenOptions::new()
        .write(true)
        .open(&session.conin)
        .map_err(|e| connect_failed(native, agent_pid, "conin", e))?;
    let conout = OpenOptions::new()
        .read(true)
        .open(&session.conout)
        .map_err(|e| connect_failed(native, agent_pid, "conout", e))?;

    let waiter = native.clone();
    let process = session.process;
    let io = TerminalIo {
        reader: Box::new(conout),
        writer: Box::new(conin),
        waiter: Some(Box::new(move || {
            let status = match waiter.wait_process(process) {
                Ok(code) => ExitStatus::Exited(code as i32),
                Err(e) => {
                    warn!(agent_pid, error = %e, "Failed to wait for process");
                    ExitStatus::Exited(-1)
                }
            };
            // Closes the agent's pipes so the reader sees EOF
            let _ = waiter.winpty_kill(agent_pid);
            status
        })),
    };

    Ok(Spawned {
        backend: Backend::WinPty(WinPty {
            native: native.clone(),
            agent_pid,
            pid: session.pid,
            helper,
        }),
        pid: Some(session.pid),
        pty_name: None,
        io,
    })
}

fn connect_failed(
    native: &NativeCapability,
    agent_pid: u32,
    pipe: &str,
    err: std::io::Error,
) -> PtykitError {
    warn!(agent_pid, pipe, error = %err, "Failed to connect to winpty pipe");
    let _ = native.winpty_kill(agent_pid);
    PtykitError::spawn_failed(format!("cannot connect to winpty {} pipe: {}", pipe, err))
}
