//! Terminal handles
//!
//! A [`Terminal`] owns one pty/console session. Output and the exit
//! notification arrive as [`TerminalEvent`]s: any number of `Data` events,
//! then exactly one `Exit`, after which the stream ends.
//!
//! Blocking native reads and waits run on dedicated threads and are
//! bridged into the runtime through channels, so a terminal must be created
//! from within a tokio runtime.
//!
//! ```no_run
//! # async fn demo() -> ptykit::Result<()> {
//! use ptykit::{SpawnOptions, TerminalEvent};
//!
//! let mut term = ptykit::spawn("echo", ["hello"], SpawnOptions::new().with_size(80, 24))?;
//! while let Some(event) = term.next_event().await {
//!     match event {
//!         TerminalEvent::Data(bytes) => print!("{}", String::from_utf8_lossy(&bytes)),
//!         TerminalEvent::Exit(status) => println!("exited: {:?}", status),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, trace, warn};

use ptykit_utils::{PtykitError, Result};

use crate::backend::{Backend, BackendKind};
use crate::signal::Signal;

/// Read buffer size for pty reads
const READ_BUFFER_SIZE: usize = 4096;

/// How long output is still collected once the process has exited
///
/// Background jobs can keep the pty open past the exit of the spawned
/// process; the exit notification is not held back for them.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// How a terminal's process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Pending,
    Exited(i32),
    Signaled(i32),
}

impl ExitStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Exit code for a normal exit
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(*code),
            _ => None,
        }
    }

    /// Terminating signal
    pub fn signal(&self) -> Option<i32> {
        match self {
            Self::Signaled(sig) => Some(*sig),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

/// Something that happened on a terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// Output bytes, in order
    Data(Bytes),
    /// The process ended; always the last event
    Exit(ExitStatus),
}

/// Blocking I/O endpoints handed over by a backend
pub(crate) struct TerminalIo {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    /// Blocks until the process exits; `None` when there is no process
    pub waiter: Option<Box<dyn FnOnce() -> ExitStatus + Send>>,
}

/// What a backend produced for a new terminal
pub(crate) struct Spawned {
    pub backend: Backend,
    pub pid: Option<u32>,
    pub pty_name: Option<String>,
    pub io: TerminalIo,
    #[cfg(unix)]
    pub slave: Option<std::os::fd::OwnedFd>,
}

/// Queued writer state shared with the writer thread
struct WriteQueue {
    tx: mpsc::UnboundedSender<Bytes>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    error: Arc<Mutex<Option<String>>>,
}

enum Input {
    Direct(Mutex<Box<dyn Write + Send>>),
    Queued(WriteQueue),
}

/// A process attached to a pseudoterminal
///
/// Exclusively owned by its creator. Dropping it does not kill the
/// process; call [`Terminal::kill`] or wait for the exit event.
pub struct Terminal {
    pid: Option<u32>,
    file: String,
    pty_name: Option<String>,
    cols: u16,
    rows: u16,
    backend: Backend,
    input: Input,
    events: mpsc::UnboundedReceiver<TerminalEvent>,
    status: Arc<Mutex<ExitStatus>>,
    #[cfg(unix)]
    slave: Option<std::os::fd::OwnedFd>,
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("pid", &self.pid)
            .field("file", &self.file)
            .field("pty_name", &self.pty_name)
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .field("backend", &self.backend.kind())
            .field("status", &*self.status.lock())
            .finish()
    }
}

impl Terminal {
    /// Wire up reader, waiter, writer, and the event pump
    pub(crate) fn start(
        runtime: &Handle,
        spawned: Spawned,
        file: impl Into<String>,
        cols: u16,
        rows: u16,
        flow_control: bool,
    ) -> Result<Self> {
        let Spawned {
            backend,
            pid,
            pty_name,
            io,
            #[cfg(unix)]
            slave,
        } = spawned;
        let TerminalIo {
            reader,
            writer,
            waiter,
        } = io;

        let (data_tx, data_rx) = mpsc::unbounded_channel();
        spawn_reader(reader, data_tx)?;

        let exit_rx = match waiter {
            Some(waiter) => {
                let (exit_tx, exit_rx) = oneshot::channel();
                spawn_waiter(waiter, exit_tx)?;
                Some(exit_rx)
            }
            None => None,
        };

        let input = if flow_control {
            Input::Queued(spawn_writer(writer)?)
        } else {
            Input::Direct(Mutex::new(writer))
        };

        let status = Arc::new(Mutex::new(ExitStatus::Pending));
        let (events_tx, events) = mpsc::unbounded_channel();
        runtime.spawn(pump(data_rx, exit_rx, events_tx, status.clone(), pid));

        Ok(Self {
            pid,
            file: file.into(),
            pty_name,
            cols,
            rows,
            backend,
            input,
            events,
            status,
            #[cfg(unix)]
            slave,
        })
    }

    /// Process id; `None` for terminals opened without a process
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The program this terminal was spawned with
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Device name of the pty slave, where the platform has one
    pub fn pty_name(&self) -> Option<&str> {
        self.pty_name.as_deref()
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// Current size as (cols, rows)
    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    pub fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn exit_status(&self) -> ExitStatus {
        *self.status.lock()
    }

    /// Slave end of a terminal created by `open`
    #[cfg(unix)]
    pub fn slave(&self) -> Option<std::os::fd::BorrowedFd<'_>> {
        use std::os::fd::AsFd;
        self.slave.as_ref().map(|fd| fd.as_fd())
    }

    /// Take ownership of the slave end of a terminal created by `open`
    #[cfg(unix)]
    pub fn take_slave(&mut self) -> Option<std::os::fd::OwnedFd> {
        self.slave.take()
    }

    /// Write input to the terminal
    ///
    /// Without flow control this blocks until the bytes are handed to the
    /// pty. With flow control the bytes are queued; await
    /// [`drain`](Self::drain) before relying on delivery.
    pub fn write(&self, data: impl AsRef<[u8]>) -> Result<()> {
        let data = data.as_ref();
        if data.is_empty() {
            return Ok(());
        }

        match &self.input {
            Input::Direct(writer) => {
                let mut writer = writer.lock();
                writer
                    .write_all(data)
                    .and_then(|_| writer.flush())
                    .map_err(|e| PtykitError::native_io(format!("write failed: {}", e)))
            }
            Input::Queued(queue) => {
                if let Some(err) = queue.error.lock().clone() {
                    return Err(PtykitError::native_io(err));
                }
                queue.pending.fetch_add(data.len(), Ordering::SeqCst);
                queue
                    .tx
                    .send(Bytes::copy_from_slice(data))
                    .map_err(|_| PtykitError::native_io("terminal input is closed"))
            }
        }
    }

    /// Wait until every queued write has reached the pty
    ///
    /// Returns immediately without flow control.
    pub async fn drain(&self) -> Result<()> {
        let Input::Queued(queue) = &self.input else {
            return Ok(());
        };

        loop {
            let notified = queue.drained.notified();
            if let Some(err) = queue.error.lock().clone() {
                return Err(PtykitError::native_io(err));
            }
            if queue.pending.load(Ordering::SeqCst) == 0 {
                return Ok(());
            }
            notified.await;
        }
    }

    /// Resize the terminal
    ///
    /// Zero dimensions are rejected before reaching the native layer. The
    /// reported size changes only when the native resize succeeds.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        if cols == 0 || rows == 0 {
            return Err(PtykitError::invalid_options(format!(
                "cols and rows must be positive, got {}x{}",
                cols, rows
            )));
        }

        self.backend.resize(cols, rows)?;
        debug!(pid = ?self.pid, cols, rows, "Resized terminal");
        self.cols = cols;
        self.rows = rows;
        Ok(())
    }

    /// Terminate the process
    ///
    /// On Unix the signal (default `SIGTERM`) goes to the whole process
    /// group. Windows backends take no signal.
    pub fn kill(&self, signal: Option<Signal>) -> Result<()> {
        if self.pid.is_none() {
            return Err(PtykitError::invalid_options(
                "terminal was opened without a process",
            ));
        }
        if !self.exit_status().is_pending() {
            return Err(PtykitError::native_io("process has already exited"));
        }

        debug!(pid = ?self.pid, ?signal, "Killing terminal process");
        self.backend.kill(signal)
    }

    /// Name of the process in the foreground of the terminal
    ///
    /// Falls back to the spawned file when the platform cannot tell.
    pub async fn process_name(&self) -> String {
        self.backend
            .process_name()
            .await
            .unwrap_or_else(|| self.file.clone())
    }

    /// Next event; `None` once the exit event has been delivered
    pub async fn next_event(&mut self) -> Option<TerminalEvent> {
        self.events.recv().await
    }

    /// Wait for exit, discarding output
    pub async fn wait(&mut self) -> ExitStatus {
        while let Some(event) = self.events.recv().await {
            if let TerminalEvent::Exit(status) = event {
                return status;
            }
        }
        self.exit_status()
    }

    /// Collect all output until exit
    pub async fn output_until_exit(&mut self) -> (Vec<u8>, ExitStatus) {
        let mut output = Vec::new();
        while let Some(event) = self.events.recv().await {
            match event {
                TerminalEvent::Data(bytes) => output.extend_from_slice(&bytes),
                TerminalEvent::Exit(status) => return (output, status),
            }
        }
        (output, self.exit_status())
    }
}

impl Stream for Terminal {
    type Item = TerminalEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

fn spawn_reader(mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<Bytes>) -> Result<()> {
    std::thread::Builder::new()
        .name("ptykit-reader".into())
        .spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO once the slave side closes on Linux
                        trace!(error = %e, "Pty read ended");
                        break;
                    }
                }
            }
        })?;
    Ok(())
}

fn spawn_waiter(
    waiter: Box<dyn FnOnce() -> ExitStatus + Send>,
    tx: oneshot::Sender<ExitStatus>,
) -> Result<()> {
    std::thread::Builder::new()
        .name("ptykit-waiter".into())
        .spawn(move || {
            let _ = tx.send(waiter());
        })?;
    Ok(())
}

fn spawn_writer(mut writer: Box<dyn Write + Send>) -> Result<WriteQueue> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let pending = Arc::new(AtomicUsize::new(0));
    let drained = Arc::new(Notify::new());
    let error = Arc::new(Mutex::new(None));

    let queue = WriteQueue {
        tx,
        pending: pending.clone(),
        drained: drained.clone(),
        error: error.clone(),
    };

    std::thread::Builder::new()
        .name("ptykit-writer".into())
        .spawn(move || {
            while let Some(chunk) = rx.blocking_recv() {
                let result = writer.write_all(&chunk).and_then(|_| writer.flush());
                if let Err(e) = result {
                    warn!(error = %e, "Queued pty write failed");
                    *error.lock() = Some(format!("write failed: {}", e));
                    pending.store(0, Ordering::SeqCst);
                    drained.notify_waiters();
                    break;
                }
                if pending.fetch_sub(chunk.len(), Ordering::SeqCst) == chunk.len() {
                    drained.notify_waiters();
                }
            }
        })?;

    Ok(queue)
}

/// Forward output, then deliver the exit event exactly once
async fn pump(
    mut data_rx: mpsc::UnboundedReceiver<Bytes>,
    exit_rx: Option<oneshot::Receiver<ExitStatus>>,
    events: mpsc::UnboundedSender<TerminalEvent>,
    status: Arc<Mutex<ExitStatus>>,
    pid: Option<u32>,
) {
    let exit = match exit_rx {
        None => {
            while let Some(bytes) = data_rx.recv().await {
                let _ = events.send(TerminalEvent::Data(bytes));
            }
            ExitStatus::Exited(0)
        }
        Some(mut exit_rx) => loop {
            tokio::select! {
                biased;

                chunk = data_rx.recv() => match chunk {
                    Some(bytes) => {
                        let _ = events.send(TerminalEvent::Data(bytes));
                    }
                    None => break (&mut exit_rx).await.unwrap_or(ExitStatus::Exited(0)),
                },

                result = &mut exit_rx => {
                    let exit = result.unwrap_or(ExitStatus::Exited(0));
                    let grace = tokio::time::sleep(EXIT_DRAIN_GRACE);
                    tokio::pin!(grace);
                    loop {
                        tokio::select! {
                            biased;
                            chunk = data_rx.recv() => match chunk {
                                Some(bytes) => {
                                    let _ = events.send(TerminalEvent::Data(bytes));
                                }
                                None => break,
                            },
                            _ = &mut grace => break,
                        }
                    }
                    break exit;
                }
            }
        },
    };

    debug!(?pid, ?exit, "Terminal exited");
    *status.lock() = exit;
    let _ = events.send(TerminalEvent::Exit(exit));
}
