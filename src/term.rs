//! Terminal state manager (C1): snapshot the controlling terminal once,
//! switch it to raw mode, and restore it on every exit path.

use std::os::fd::{BorrowedFd, RawFd};

use nix::sys::termios::{self, InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices, Termios};

use crate::error::{ScriptError, SetupKind};

pub struct TerminalGuard {
    fd: RawFd,
    original: Option<Termios>,
}

impl TerminalGuard {
    /// Snapshots `fd`'s attributes. `fd` not being a tty (piped stdin,
    /// for instance) is not an error — later operations on this guard
    /// simply become no-ops, matching I5's "so long as ... is a tty".
    pub fn snapshot(fd: RawFd) -> Self {
        let original = termios::tcgetattr(unsafe { BorrowedFd::borrow_raw(fd) }).ok();
        Self { fd, original }
    }

    pub fn is_tty(&self) -> bool {
        self.original.is_some()
    }

    pub fn original(&self) -> Option<&Termios> {
        self.original.as_ref()
    }

    /// Switches the terminal to raw mode per §4.1. No-op if `fd` wasn't
    /// a tty to begin with.
    pub fn set_raw(&self) -> Result<(), ScriptError> {
        let Some(orig) = &self.original else {
            return Ok(());
        };
        let mut raw = orig.clone();
        raw.input_flags &= !(InputFlags::IGNBRK
            | InputFlags::BRKINT
            | InputFlags::PARMRK
            | InputFlags::ISTRIP
            | InputFlags::INLCR
            | InputFlags::IGNCR
            | InputFlags::ICRNL
            | InputFlags::IXON);
        raw.output_flags &= !OutputFlags::OPOST;
        raw.local_flags &= !(LocalFlags::ECHO
            | LocalFlags::ECHONL
            | LocalFlags::ICANON
            | LocalFlags::ISIG
            | LocalFlags::IEXTEN);
        raw.control_flags &= !(nix::sys::termios::ControlFlags::CSIZE | nix::sys::termios::ControlFlags::PARENB);
        raw.control_flags |= nix::sys::termios::ControlFlags::CS8;
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(unsafe { BorrowedFd::borrow_raw(self.fd) }, SetArg::TCSANOW, &raw)
            .map_err(|e| ScriptError::setup(SetupKind::Tty, e))
    }

    /// Restores the original attributes using drain semantics (wait for
    /// queued output to leave the kernel first). Best-effort: called on
    /// every exit path, including ones where the fd may already be in a
    /// degraded state, so failures are swallowed rather than propagated.
    pub fn restore(&self) {
        if let Some(orig) = &self.original {
            let _ = termios::tcsetattr(
                unsafe { BorrowedFd::borrow_raw(self.fd) },
                SetArg::TCSADRAIN,
                orig,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_tty_fd_is_harmless() {
        // A plain file is never a tty; tcgetattr fails and every
        // subsequent operation on the guard becomes a no-op.
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let guard = TerminalGuard::snapshot(std::os::fd::AsRawFd::as_raw_fd(tmp.as_file()));
        assert!(!guard.is_tty());
        assert!(guard.set_raw().is_ok());
        guard.restore(); // must not panic
    }
}
