//! Integration coverage for P6: the typescript writer refuses a
//! default-named file that is a symlink or has more than one hard link.

use std::os::unix::fs::symlink;

use script_tty::writer::refuse_unsafe_default_name;

#[test]
fn refuses_symlinked_default_name() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("real");
    std::fs::write(&target, b"").unwrap();
    let link = dir.path().join("typescript");
    symlink(&target, &link).unwrap();

    assert!(refuse_unsafe_default_name(&link).is_err());
    assert_eq!(std::fs::read(&target).unwrap(), b"");
}

#[test]
fn refuses_hardlinked_default_name() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("typescript");
    std::fs::write(&original, b"").unwrap();
    let other = dir.path().join("other");
    std::fs::hard_link(&original, &other).unwrap();

    assert!(refuse_unsafe_default_name(&original).is_err());
    assert_eq!(std::fs::read(&original).unwrap(), b"");
}

#[test]
fn allows_plain_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("typescript");
    std::fs::write(&path, b"").unwrap();
    assert!(refuse_unsafe_default_name(&path).is_ok());
}

#[test]
fn allows_nonexistent_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("typescript");
    assert!(refuse_unsafe_default_name(&path).is_ok());
}
