//! Unix pty primitives

use std::io;
use std::mem;
use std::os::raw::{c_char, c_int};
use std::ptr;

use crate::{RawExit, RawForkedPty, RawOpenedPty, RawSpawnRequest, NAME_MAX, OK};

/// Exit code of a child whose exec failed
const EXEC_FAILED: c_int = 127;

fn last_errno() -> c_int {
    io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

fn winsize(cols: u16, rows: u16) -> libc::winsize {
    libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

unsafe fn set_cloexec(fd: c_int) -> c_int {
    let flags = libc::fcntl(fd, libc::F_GETFD);
    if flags == -1 || libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) == -1 {
        return last_errno();
    }
    OK
}

#[allow(unused_variables)]
unsafe fn set_utf8(fd: c_int, utf8: bool) {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
    {
        let mut term: libc::termios = mem::zeroed();
        if libc::tcgetattr(fd, &mut term) != 0 {
            return;
        }
        if utf8 {
            term.c_iflag |= libc::IUTF8;
        } else {
            term.c_iflag &= !libc::IUTF8;
        }
        libc::tcsetattr(fd, libc::TCSANOW, &term);
    }
}

/// Open a pty pair with both ends close-on-exec
unsafe fn open_pair(cols: u16, rows: u16, utf8: bool) -> Result<(c_int, c_int), c_int> {
    let mut master: c_int = -1;
    let mut slave: c_int = -1;
    let mut size = winsize(cols, rows);

    if libc::openpty(
        &mut master,
        &mut slave,
        ptr::null_mut(),
        ptr::null_mut::<libc::termios>(),
        &mut size,
    ) == -1
    {
        return Err(last_errno());
    }

    let err = set_cloexec(master);
    let err = if err == OK { set_cloexec(slave) } else { err };
    if err != OK {
        libc::close(master);
        libc::close(slave);
        return Err(err);
    }

    set_utf8(slave, utf8);
    Ok((master, slave))
}

/// Open a pipe with both ends close-on-exec
unsafe fn open_status_pipe() -> Result<[c_int; 2], c_int> {
    let mut fds: [c_int; 2] = [-1, -1];
    if libc::pipe(fds.as_mut_ptr()) == -1 {
        return Err(last_errno());
    }

    let err = set_cloexec(fds[0]);
    let err = if err == OK { set_cloexec(fds[1]) } else { err };
    if err != OK {
        libc::close(fds[0]);
        libc::close(fds[1]);
        return Err(err);
    }
    Ok(fds)
}

unsafe fn write_tty_name(fd: c_int, out: &mut [c_char; NAME_MAX]) {
    if libc::ttyname_r(fd, out.as_mut_ptr(), NAME_MAX) != 0 {
        out[0] = 0;
    }
}

pub unsafe extern "C" fn pty_fork(req: *const RawSpawnRequest, out: *mut RawForkedPty) -> c_int {
    if req.is_null() || out.is_null() {
        return libc::EINVAL;
    }
    let req = &*req;
    let out = &mut *out;

    let (master, slave) = match open_pair(req.cols, req.rows, req.utf8) {
        Ok(pair) => pair,
        Err(err) => return err,
    };

    // The child reports a failed exec through this pipe; a successful exec
    // closes it (close-on-exec) and the parent reads EOF.
    let status_pipe = match open_status_pipe() {
        Ok(fds) => fds,
        Err(err) => {
            libc::close(master);
            libc::close(slave);
            return err;
        }
    };

    write_tty_name(slave, &mut out.pty_name);

    let pid = libc::fork();
    match pid {
        -1 => {
            let err = last_errno();
            libc::close(master);
            libc::close(slave);
            libc::close(status_pipe[0]);
            libc::close(status_pipe[1]);
            err
        }
        0 => {
            libc::close(status_pipe[0]);
            exec_child(req, master, slave, status_pipe[1])
        }
        _ => {
            libc::close(slave);
            libc::close(status_pipe[1]);

            let child_err = read_exec_status(status_pipe[0]);
            libc::close(status_pipe[0]);

            if let Some(err) = child_err {
                let mut status = 0;
                libc::waitpid(pid, &mut status, 0);
                libc::close(master);
                return err;
            }

            out.master = master;
            out.pid = pid;
            OK
        }
    }
}

unsafe fn read_exec_status(fd: c_int) -> Option<c_int> {
    let mut buf = [0u8; mem::size_of::<c_int>()];
    loop {
        let n = libc::read(fd, buf.as_mut_ptr().cast(), buf.len());
        if n == -1 && last_errno() == libc::EINTR {
            continue;
        }
        if n == buf.len() as isize {
            return Some(c_int::from_ne_bytes(buf));
        }
        return None;
    }
}

/// Runs in the forked child: only async-signal-safe calls from here on
unsafe fn exec_child(req: &RawSpawnRequest, master: c_int, slave: c_int, status_fd: c_int) -> ! {
    let fail = |err: c_int| -> ! {
        let bytes = err.to_ne_bytes();
        libc::write(status_fd, bytes.as_ptr().cast(), bytes.len());
        libc::_exit(EXEC_FAILED)
    };

    libc::close(master);

    if libc::setsid() == -1 {
        fail(last_errno());
    }
    if libc::ioctl(slave, libc::TIOCSCTTY as _, 0) == -1 {
        fail(last_errno());
    }

    for fd in 0..3 {
        if libc::dup2(slave, fd) == -1 {
            fail(last_errno());
        }
    }
    if slave > 2 {
        libc::close(slave);
    }

    let mut set: libc::sigset_t = mem::zeroed();
    libc::sigemptyset(&mut set);
    libc::pthread_sigmask(libc::SIG_SETMASK, &set, ptr::null_mut());
    for sig in [
        libc::SIGHUP,
        libc::SIGINT,
        libc::SIGQUIT,
        libc::SIGTERM,
        libc::SIGPIPE,
        libc::SIGCHLD,
        libc::SIGALRM,
        libc::SIGWINCH,
    ] {
        libc::signal(sig, libc::SIG_DFL);
    }

    if !req.cwd.is_null() && *req.cwd != 0 && libc::chdir(req.cwd) == -1 {
        fail(last_errno());
    }

    if req.uid >= 0 && req.gid >= 0 {
        if libc::setgid(req.gid as libc::gid_t) == -1 {
            fail(last_errno());
        }
        if libc::setuid(req.uid as libc::uid_t) == -1 {
            fail(last_errno());
        }
    }

    libc::execve(req.file, req.argv, req.envp);
    fail(last_errno())
}

pub unsafe extern "C" fn pty_open(cols: u16, rows: u16, utf8: bool, out: *mut RawOpenedPty) -> c_int {
    if out.is_null() {
        return libc::EINVAL;
    }
    let out = &mut *out;

    let (master, slave) = match open_pair(cols, rows, utf8) {
        Ok(pair) => pair,
        Err(err) => return err,
    };

    write_tty_name(slave, &mut out.pty_name);
    out.master = master;
    out.slave = slave;
    OK
}

pub unsafe extern "C" fn pty_attach(master: c_int, cols: u16, rows: u16) -> c_int {
    if master < 0 {
        return libc::EBADF;
    }
    if libc::isatty(master) != 1 {
        return last_errno();
    }
    pty_resize(master, cols, rows)
}

pub unsafe extern "C" fn pty_resize(fd: c_int, cols: u16, rows: u16) -> c_int {
    let size = winsize(cols, rows);
    if libc::ioctl(fd, libc::TIOCSWINSZ as _, &size) == -1 {
        return last_errno();
    }
    OK
}

pub unsafe extern "C" fn pty_process_name(fd: c_int, buf: *mut c_char, cap: usize) -> isize {
    if buf.is_null() || cap == 0 {
        return -1;
    }

    let pgrp = libc::tcgetpgrp(fd);
    if pgrp <= 0 {
        return -1;
    }

    match foreground_name(pgrp) {
        Some(name) => {
            let len = name.len().min(cap - 1);
            ptr::copy_nonoverlapping(name.as_ptr().cast::<c_char>(), buf, len);
            *buf.add(len) = 0;
            len as isize
        }
        None => -1,
    }
}

#[cfg(target_os = "linux")]
fn foreground_name(pgrp: libc::pid_t) -> Option<Vec<u8>> {
    let cmdline = std::fs::read(format!("/proc/{}/cmdline", pgrp)).ok()?;
    let argv0: Vec<u8> = cmdline.split(|b| *b == 0).next().unwrap_or(&[]).to_vec();
    if !argv0.is_empty() {
        return Some(argv0);
    }

    let comm = std::fs::read(format!("/proc/{}/comm", pgrp)).ok()?;
    let comm: Vec<u8> = comm.into_iter().take_while(|b| *b != b'\n').collect();
    (!comm.is_empty()).then_some(comm)
}

#[cfg(target_os = "macos")]
fn foreground_name(pgrp: libc::pid_t) -> Option<Vec<u8>> {
    let mut buf = [0u8; NAME_MAX];
    let len = unsafe { libc::proc_name(pgrp, buf.as_mut_ptr().cast(), buf.len() as u32) };
    (len > 0).then(|| buf[..len as usize].to_vec())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn foreground_name(_pgrp: libc::pid_t) -> Option<Vec<u8>> {
    None
}

pub unsafe extern "C" fn pty_kill(pid: c_int, signal: c_int) -> c_int {
    if pid <= 0 {
        return libc::ESRCH;
    }
    if libc::killpg(pid, signal) == -1 {
        return last_errno();
    }
    OK
}

pub unsafe extern "C" fn pty_wait(pid: c_int, out: *mut RawExit) -> c_int {
    if out.is_null() {
        return libc::EINVAL;
    }

    let mut status: c_int = 0;
    loop {
        let ret = libc::waitpid(pid, &mut status, 0);
        if ret == pid {
            break;
        }
        if ret == -1 {
            let err = last_errno();
            if err == libc::EINTR {
                continue;
            }
            return err;
        }
    }

    let out = &mut *out;
    *out = RawExit::default();
    if libc::WIFEXITED(status) {
        out.code = libc::WEXITSTATUS(status);
    } else if libc::WIFSIGNALED(status) {
        out.signal = libc::WTERMSIG(status);
    }
    OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{CStr, CString};

    fn spawn(file: &str, args: &[&str]) -> Result<RawForkedPty, c_int> {
        let file = CString::new(file).unwrap();
        let argv: Vec<CString> = args.iter().map(|a| CString::new(*a).unwrap()).collect();
        let mut argv_ptrs: Vec<*const c_char> = argv.iter().map(|a| a.as_ptr()).collect();
        argv_ptrs.push(ptr::null());
        let envp: [*const c_char; 1] = [ptr::null()];

        let req = RawSpawnRequest {
            file: file.as_ptr(),
            argv: argv_ptrs.as_ptr(),
            envp: envp.as_ptr(),
            cwd: ptr::null(),
            cols: 80,
            rows: 24,
            uid: -1,
            gid: -1,
            utf8: true,
        };

        let mut out: RawForkedPty = unsafe { mem::zeroed() };
        let err = unsafe { pty_fork(&req, &mut out) };
        if err == OK {
            Ok(out)
        } else {
            Err(err)
        }
    }

    fn is_cloexec(fd: c_int) -> bool {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        flags != -1 && flags & libc::FD_CLOEXEC != 0
    }

    #[test]
    fn test_status_pipe_is_cloexec() {
        let fds = unsafe { open_status_pipe() }.unwrap();
        assert!(is_cloexec(fds[0]));
        assert!(is_cloexec(fds[1]));
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn test_set_cloexec_reports_failure() {
        assert_eq!(unsafe { set_cloexec(-1) }, libc::EBADF);
    }

    #[test]
    fn test_fork_and_wait_exit_code() {
        let pty = spawn("/bin/sh", &["sh", "-c", "exit 3"]).unwrap();
        assert!(pty.pid > 0);

        let mut exit = RawExit::default();
        assert_eq!(unsafe { pty_wait(pty.pid, &mut exit) }, OK);
        assert_eq!(exit.code, 3);
        assert_eq!(exit.signal, 0);
        unsafe { libc::close(pty.master) };
    }

    #[test]
    fn test_fork_reports_exec_failure() {
        let err = spawn("/nonexistent/ptykit-test", &["x"]).err();
        assert_eq!(err, Some(libc::ENOENT));
    }

    #[test]
    fn test_kill_reports_signal() {
        let pty = spawn("/bin/sh", &["sh", "-c", "sleep 30"]).unwrap();
        assert_eq!(unsafe { pty_kill(pty.pid, libc::SIGKILL) }, OK);

        let mut exit = RawExit::default();
        assert_eq!(unsafe { pty_wait(pty.pid, &mut exit) }, OK);
        assert_eq!(exit.signal, libc::SIGKILL);
        unsafe { libc::close(pty.master) };
    }

    #[test]
    fn test_open_and_resize() {
        let mut out: RawOpenedPty = unsafe { mem::zeroed() };
        assert_eq!(unsafe { pty_open(80, 24, true, &mut out) }, OK);

        assert_eq!(unsafe { pty_resize(out.master, 120, 40) }, OK);

        let mut size: libc::winsize = unsafe { mem::zeroed() };
        assert_ne!(unsafe { libc::ioctl(out.slave, libc::TIOCGWINSZ as _, &mut size) }, -1);
        assert_eq!(size.ws_col, 120);
        assert_eq!(size.ws_row, 40);

        let name = unsafe { CStr::from_ptr(out.pty_name.as_ptr()) }.to_bytes();
        assert!(name.is_empty() || name.starts_with(b"/dev/"));

        unsafe {
            libc::close(out.master);
            libc::close(out.slave);
        }
    }

    #[test]
    fn test_attach_rejects_non_tty() {
        let mut fds: [c_int; 2] = [-1, -1];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        assert_ne!(unsafe { pty_attach(fds[0], 80, 24) }, OK);
        assert_eq!(unsafe { pty_attach(-1, 80, 24) }, libc::EBADF);

        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn test_kill_rejects_non_positive_pid() {
        assert_eq!(unsafe { pty_kill(0, libc::SIGTERM) }, libc::ESRCH);
    }
}
