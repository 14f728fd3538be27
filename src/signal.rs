//! Signal/resize bridge (C4).
//!
//! SIGCHLD is translated into an async-signal-safe reap plus a plain
//! atomic flag (`die`) — distilled §3 counts exactly five fds in the
//! recorder's runtime state, so child death is a flag, not a sixth fd.
//! SIGWINCH is translated into a self-pipe: the handler pushes the new
//! winsize onto the pty master and writes the raw `winsize` bytes to the
//! pipe whose read end *is* `resize_read_fd`. Handlers touch only atomics
//! and async-signal-safe syscalls (`waitpid`, `ioctl`, `write`); no
//! allocation, no user buffers beyond the fixed-size winsize struct.

use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::pipe;

use crate::error::{ScriptError, SetupKind};
use crate::pty::set_nonblocking;

static CHILD_PID: AtomicI32 = AtomicI32::new(0);
static CHILD_STATUS: AtomicI32 = AtomicI32::new(0);
static DIE: AtomicBool = AtomicBool::new(false);
static RESIZE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static REAL_TTY_FD: AtomicI32 = AtomicI32::new(-1);
static PTY_MASTER_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn handle_sigchld(_sig: libc::c_int) {
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        if pid == CHILD_PID.load(Ordering::Relaxed) {
            CHILD_STATUS.store(status, Ordering::Relaxed);
            DIE.store(true, Ordering::Relaxed);
        }
    }
}

extern "C" fn handle_sigwinch(_sig: libc::c_int) {
    let real_fd = REAL_TTY_FD.load(Ordering::Relaxed);
    if real_fd < 0 {
        return;
    }
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    if unsafe { libc::ioctl(real_fd, libc::TIOCGWINSZ, &mut ws) } != 0 {
        return;
    }
    let master_fd = PTY_MASTER_FD.load(Ordering::Relaxed);
    if master_fd >= 0 {
        unsafe {
            libc::ioctl(master_fd, libc::TIOCSWINSZ, &ws);
        }
    }
    let write_fd = RESIZE_WRITE_FD.load(Ordering::Relaxed);
    if write_fd >= 0 {
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &ws as *const libc::winsize as *const u8,
                std::mem::size_of::<libc::winsize>(),
            )
        };
        // Async-signal-safe, best-effort: a full pipe or any other
        // failure here is silently swallowed (§4.3 / Open Questions).
        unsafe {
            libc::write(write_fd, bytes.as_ptr() as *const libc::c_void, bytes.len());
        }
    }
}

pub struct SignalBridge {
    pub resize_r: OwnedFd,
}

impl SignalBridge {
    /// Installs both handlers and wires the winsize self-pipe. `real_tty_fd`
    /// is the real terminal (source of TIOCGWINSZ); `master_fd` is the pty
    /// master (destination of TIOCSWINSZ).
    pub fn install(
        real_tty_fd: RawFd,
        master_fd: RawFd,
        child_pid: nix::unistd::Pid,
    ) -> Result<Self, ScriptError> {
        let (resize_r, resize_w) = pipe().map_err(|e| ScriptError::setup(SetupKind::Pipe, e))?;
        set_nonblocking(resize_r.as_raw_fd())?;
        set_nonblocking(resize_w.as_raw_fd())?;

        CHILD_PID.store(child_pid.as_raw(), Ordering::Relaxed);
        REAL_TTY_FD.store(real_tty_fd, Ordering::Relaxed);
        PTY_MASTER_FD.store(master_fd, Ordering::Relaxed);
        // The write end is a process-lifetime singleton handed to the
        // signal handler; it is intentionally never closed by this
        // struct (closing it would race the handler).
        RESIZE_WRITE_FD.store(resize_w.into_raw_fd(), Ordering::Relaxed);

        unsafe {
            signal::signal(Signal::SIGCHLD, SigHandler::Handler(handle_sigchld))
                .map_err(|e| ScriptError::setup(SetupKind::Signal, e))?;
            signal::signal(Signal::SIGWINCH, SigHandler::Handler(handle_sigwinch))
                .map_err(|e| ScriptError::setup(SetupKind::Signal, e))?;
        }

        Ok(Self { resize_r })
    }

    pub fn died() -> bool {
        DIE.load(Ordering::Relaxed)
    }

    /// The raw `wait(2)` status last recorded for our child, valid once
    /// `died()` is true.
    pub fn child_status() -> i32 {
        CHILD_STATUS.load(Ordering::Relaxed)
    }
}
