//! Typescript writer (C6): opens the journal with append/truncate and
//! optional synchronous-write semantics, refuses a symlinked/hardlinked
//! default filename, and formats the header/footer lines.

use std::os::fd::OwnedFd;
use std::path::Path;

use nix::fcntl::{open, OFlag};
use nix::sys::stat::{lstat, Mode};

use crate::error::{ScriptError, SetupKind};

/// Refuses to proceed if `path` is a symlink or has more than one hard
/// link — a defense against a classic TOCTOU attack where an attacker
/// pre-creates `typescript` as a link into a file the invoking user
/// shouldn't overwrite. Only applied when the caller defaulted the
/// filename (distilled §4.6 / `die_if_link` in the original).
pub fn refuse_unsafe_default_name(path: &Path) -> Result<(), ScriptError> {
    let Ok(st) = lstat(path) else {
        return Ok(()); // doesn't exist yet — nothing to refuse
    };
    let is_symlink = (st.st_mode & libc::S_IFMT) == libc::S_IFLNK;
    let nlink = st.st_nlink;
    if is_symlink || nlink > 1 {
        return Err(ScriptError::Usage(format!(
            "`{}' is a link.\nUse an explicit filename if you really want to use it.\nScript not started.",
            path.display()
        )));
    }
    Ok(())
}

/// Opens the typescript file, returning an owned fd suitable for the
/// recorder's non-blocking event loop.
pub fn open_typescript(
    path: &Path,
    append: bool,
    sync_each_write: bool,
) -> Result<OwnedFd, ScriptError> {
    let mut flags = OFlag::O_WRONLY | OFlag::O_CREAT;
    flags |= if append { OFlag::O_APPEND } else { OFlag::O_TRUNC };
    if sync_each_write {
        flags |= sync_flag();
    }
    let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH;
    open(path, flags, mode).map_err(|e| ScriptError::setup(SetupKind::Journal, e))
}

/// The synchronous-write flag, where the platform has one. Open
/// Question (distilled §9) resolved: where `O_SYNC` isn't available,
/// `-f`/`--flush` becomes a no-op rather than a setup error — flushing
/// is a durability nicety, not a correctness requirement of this format.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn sync_flag() -> OFlag {
    OFlag::O_SYNC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn sync_flag() -> OFlag {
    OFlag::empty()
}

/// Header/footer timestamp, in UTC (distilled §3 requires `<UTC-timestamp>`,
/// not the local wall clock).
fn now_utc_string() -> Option<String> {
    Some(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// `Script started on <ts>\r\n`, or `Script started\r\n` if formatting
/// the timestamp fails for any reason.
pub fn header_line() -> Vec<u8> {
    match now_utc_string() {
        Some(ts) => format!("Script started on {}\r\n", ts).into_bytes(),
        None => b"Script started\r\n".to_vec(),
    }
}

/// `\r\nScript done on <ts>\r\n`, or `\r\nScript done\r\n` as fallback.
/// Only ever written when quiet mode is off and the pty reached natural
/// EOF (distilled §3).
pub fn footer_line() -> Vec<u8> {
    match now_utc_string() {
        Some(ts) => format!("\r\nScript done on {}\r\n", ts).into_bytes(),
        None => b"\r\nScript done\r\n".to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_footer_are_crlf_terminated() {
        let h = header_line();
        assert!(h.starts_with(b"Script started on "));
        assert!(h.ends_with(b"\r\n"));

        let f = footer_line();
        assert!(f.starts_with(b"\r\nScript done on "));
        assert!(f.ends_with(b"\r\n"));
    }
}
