//! Atomic file operations (§4.7): every replacement writes to a temp file
//! in the same directory and `fsync`+`rename`s to the target name; the
//! directory is `fsync`-ed afterward on platforms where that matters.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// Create `dir` (and parents) if missing, restricted to owner access.
pub fn ensure_dir_owner_only(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    restrict_to_owner(dir)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> Result<()> {
    Ok(())
}

/// Atomically replace the contents of `target` with `data`: write a temp
/// file in `target`'s directory, `fsync` it, rename over `target`, then
/// `fsync` the containing directory.
pub fn atomic_write(target: &Path, data: &[u8]) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| StoreError::Corrupt("target has no parent directory".into()))?;
    let tmp_path: PathBuf = dir.join(format!(
        ".{}.tmp-{}",
        target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("atomic"),
        rand_suffix()
    ));

    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(data)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, target)?;
    fsync_dir(dir)?;
    Ok(())
}

/// Append one line (caller-supplied, newline appended here) to a log file,
/// creating it if necessary, and `fsync` before returning.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(line.as_bytes())?;
    f.write_all(b"\n")?;
    f.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> Result<()> {
    let f = File::open(dir)?;
    f.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn rand_suffix() -> u64 {
    use rand::RngCore;
    rand::rng().next_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("identity.bin");
        atomic_write(&target, b"first").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"first");
        atomic_write(&target, b"second").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"second");
    }

    #[test]
    fn append_line_accumulates() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("history.log");
        append_line(&log, "one").unwrap();
        append_line(&log, "two").unwrap();
        let contents = fs::read_to_string(&log).unwrap();
        assert_eq!(contents, "one\ntwo\n");
    }
}
