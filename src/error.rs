//! Error taxonomy: {Usage, Setup, RuntimeIo, ChildExit}.
//!
//! `exit_code` is the pure function from this sum type (plus the `-e`
//! flag) to a process exit code, mirroring the usage/setup/OS/IO exit
//! codes of the original `script`/`scriptreplay`.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// What kind of setup step failed; determines whether the failure is
/// reported as EX_OSERR (71) or EX_IOERR (74).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupKind {
    Tty,
    Pty,
    Fork,
    Pipe,
    Signal,
    Journal,
}

impl SetupKind {
    fn exit_code(self) -> i32 {
        match self {
            SetupKind::Journal => 74, // EX_IOERR
            _ => 71,                 // EX_OSERR
        }
    }
}

impl fmt::Display for SetupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SetupKind::Tty => "terminal setup",
            SetupKind::Pty => "pty setup",
            SetupKind::Fork => "fork",
            SetupKind::Pipe => "pipe",
            SetupKind::Signal => "signal handler install",
            SetupKind::Journal => "journal open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("{kind} failed: {source}")]
    Setup {
        kind: SetupKind,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {role}: {source}")]
    RuntimeIo {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("child exited: {0:?}")]
    ChildExit(ExitStatus),
}

impl ScriptError {
    pub fn setup(kind: SetupKind, source: impl Into<std::io::Error>) -> Self {
        ScriptError::Setup {
            kind,
            source: source.into(),
        }
    }

    pub fn runtime_io(role: &'static str, source: impl Into<std::io::Error>) -> Self {
        ScriptError::RuntimeIo {
            role,
            source: source.into(),
        }
    }

    /// Process exit code per §7/§9: a pure function of the error and
    /// whether `-e` (propagate child exit status) was requested.
    pub fn exit_code(&self, propagate_child_exit: bool) -> i32 {
        match self {
            ScriptError::Usage(_) => 64, // EX_USAGE
            ScriptError::Setup { kind, .. } => kind.exit_code(),
            ScriptError::RuntimeIo { .. } => 74, // EX_IOERR
            ScriptError::ChildExit(status) => {
                if propagate_child_exit {
                    child_exit_code(status)
                } else {
                    0
                }
            }
        }
    }
}

/// `0x80 + signal` for a signal death, otherwise the process's own exit
/// value — the `-e` encoding from distilled §4.4 / scenario 6.
pub fn child_exit_code(status: &ExitStatus) -> i32 {
    if let Some(sig) = status.signal() {
        0x80 + sig
    } else {
        status.code().unwrap_or(1)
    }
}

/// Same encoding, but taking the raw wait(2) status as captured by the
/// SIGCHLD handler (which cannot construct an `ExitStatus` directly).
pub fn child_exit_code_raw(wait_status: i32, propagate_child_exit: bool) -> i32 {
    if !propagate_child_exit {
        return 0;
    }
    if libc::WIFSIGNALED(wait_status) {
        0x80 + libc::WTERMSIG(wait_status)
    } else if libc::WIFEXITED(wait_status) {
        libc::WEXITSTATUS(wait_status)
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_is_ex_usage() {
        assert_eq!(ScriptError::Usage("bad flag".into()).exit_code(false), 64);
    }

    #[test]
    fn journal_setup_is_ex_ioerr() {
        let e = ScriptError::setup(
            SetupKind::Journal,
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        assert_eq!(e.exit_code(false), 74);
    }

    #[test]
    fn pty_setup_is_ex_oserr() {
        let e = ScriptError::setup(
            SetupKind::Pty,
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        assert_eq!(e.exit_code(false), 71);
    }

    #[test]
    fn runtime_io_is_ex_ioerr() {
        let e = ScriptError::runtime_io(
            "stdout",
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        assert_eq!(e.exit_code(false), 74);
    }

    #[test]
    fn child_exit_signal_death_is_encoded() {
        // kill -TERM $$ => WIFSIGNALED, signal 15
        let raw = {
            // Synthesize a wait() status for "killed by SIGTERM" without
            // spawning a process: low 7 bits hold the signal number.
            15
        };
        assert_eq!(child_exit_code_raw(raw, true), 0x80 | 15);
    }

    #[test]
    fn child_exit_not_propagated_without_e_flag() {
        assert_eq!(child_exit_code_raw(42 << 8, false), 0);
    }
}
