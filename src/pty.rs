//! Pty provisioner (C2) and child spawner (C3).

use std::ffi::CString;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, OpenptyResult};
use nix::sys::signal::{self, SigSet, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use nix::unistd::{dup2, execvp, fork, setsid, ForkResult, Pid};

use crate::error::{ScriptError, SetupKind};

const DEFAULT_SHELL: &str = "/bin/sh";

/// `SHELL` env var if set and non-empty, else the compiled-in default.
pub fn detect_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SHELL.to_string())
}

pub fn set_nonblocking(fd: RawFd) -> Result<(), ScriptError> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| ScriptError::setup(SetupKind::Pty, e))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| ScriptError::setup(SetupKind::Pty, e))?;
    Ok(())
}

/// Opens the pty master/slave pair. `nix::pty::openpty` folds together
/// `open("/dev/ptmx")`, `grantpt`, `unlockpt` and `ptsname`+`open` of the
/// slave, matching §4.2's getmaster/getslave sequence.
pub fn open_pty() -> Result<OpenptyResult, ScriptError> {
    openpty(None, None).map_err(|e| ScriptError::setup(SetupKind::Pty, e))
}

/// Forks, blocking SIGCHLD around the fork so the parent can record the
/// child pid before any SIGCHLD can arrive (§4.2). The child execs
/// `shell -c <command>` or `shell -i` and never returns; the parent gets
/// back the child pid and a non-blocking master fd.
pub fn spawn_child(
    master: OwnedFd,
    slave: OwnedFd,
    orig_termios: Option<&Termios>,
    command: Option<&str>,
) -> Result<(Pid, OwnedFd), ScriptError> {
    let mut block = SigSet::empty();
    block.add(Signal::SIGCHLD);
    let old = signal::sigprocmask(signal::SigmaskHow::SIG_BLOCK, Some(&block), None)
        .map(|_| block)
        .map_err(|e| ScriptError::setup(SetupKind::Signal, e))?;

    let shell = detect_shell();

    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            drop(master);
            let _ = signal::sigprocmask(signal::SigmaskHow::SIG_UNBLOCK, Some(&old), None);
            child_exec(slave, orig_termios, &shell, command)
        }
        Ok(ForkResult::Parent { child }) => {
            let _ = signal::sigprocmask(signal::SigmaskHow::SIG_UNBLOCK, Some(&old), None);
            drop(slave);
            set_nonblocking(master.as_raw_fd())?;
            Ok((child, master))
        }
        Err(e) => {
            let _ = signal::sigprocmask(signal::SigmaskHow::SIG_UNBLOCK, Some(&old), None);
            Err(ScriptError::setup(SetupKind::Fork, e))
        }
    }
}

/// Child-side setup: new session, controlling terminal, inherited tty
/// attributes, stdio redirected to the slave, then exec. Diverges.
fn child_exec(
    slave: OwnedFd,
    orig_termios: Option<&Termios>,
    shell: &str,
    command: Option<&str>,
) -> ! {
    let slave_fd = slave.as_raw_fd();

    let _ = setsid();
    unsafe {
        libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
    }

    if let Some(orig) = orig_termios {
        let _ = termios::tcsetattr(
            unsafe { std::os::fd::BorrowedFd::borrow_raw(slave_fd) },
            SetArg::TCSANOW,
            orig,
        );
    }

    let _ = dup2(slave_fd, 0);
    let _ = dup2(slave_fd, 1);
    let _ = dup2(slave_fd, 2);

    if slave_fd > 2 {
        drop(slave);
    } else {
        // The slave fd IS one of our stdio fds now; release ownership
        // without closing it.
        let _ = slave.into_raw_fd();
    }

    let shell_name = shell.rsplit('/').next().unwrap_or(shell);
    let shell_c = CString::new(shell).unwrap_or_else(|_| CString::new(DEFAULT_SHELL).unwrap());
    let name_c = CString::new(shell_name).unwrap_or_else(|_| CString::new("sh").unwrap());

    let result = match command {
        Some(cmd) => {
            let c_flag = CString::new("-c").unwrap();
            let cmd_c = CString::new(cmd).unwrap_or_default();
            execvp(&shell_c, &[name_c, c_flag, cmd_c])
        }
        None => {
            let i_flag = CString::new("-i").unwrap();
            execvp(&shell_c, &[name_c, i_flag])
        }
    };

    if let Err(e) = result {
        eprintln!("script: {}: {}", shell, e);
    }
    std::process::exit(71);
}

/// Reaps a child process, blocking until it exits, and returns the raw
/// `wait(2)` status (same encoding the SIGCHLD handler sees). Used once
/// the event loop has reached quiescence and no SIGCHLD has yet
/// delivered status — a narrow race between pty EOF and signal delivery.
pub fn reap_blocking(pid: Pid) -> Option<i32> {
    let mut status: i32 = 0;
    let ret = unsafe { libc::waitpid(pid.as_raw(), &mut status, 0) };
    if ret == pid.as_raw() {
        Some(status)
    } else {
        None
    }
}

pub fn get_winsize(fd: RawFd) -> Option<libc::winsize> {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) };
    if ret == 0 {
        Some(ws)
    } else {
        None
    }
}

pub fn set_winsize(fd: RawFd, ws: &libc::winsize) {
    unsafe {
        libc::ioctl(fd, libc::TIOCSWINSZ, ws);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_falls_back_to_default_when_unset() {
        let saved = std::env::var("SHELL").ok();
        std::env::remove_var("SHELL");
        assert_eq!(detect_shell(), DEFAULT_SHELL);
        if let Some(s) = saved {
            std::env::set_var("SHELL", s);
        }
    }

    #[test]
    fn shell_falls_back_when_empty() {
        let saved = std::env::var("SHELL").ok();
        std::env::set_var("SHELL", "");
        assert_eq!(detect_shell(), DEFAULT_SHELL);
        match saved {
            Some(s) => std::env::set_var("SHELL", s),
            None => std::env::remove_var("SHELL"),
        }
    }

    #[test]
    fn shell_honors_env() {
        let saved = std::env::var("SHELL").ok();
        std::env::set_var("SHELL", "/bin/zsh");
        assert_eq!(detect_shell(), "/bin/zsh");
        match saved {
            Some(s) => std::env::set_var("SHELL", s),
            None => std::env::remove_var("SHELL"),
        }
    }
}
