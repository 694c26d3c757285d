//! Cross-platform filesystem wrapper.
//!
//! On Unix we transparently re-export std::fs and restore the full stat
//! snapshot (mode, owner, times). On other platforms the permission and
//! ownership helpers are no-ops so the rest of the crate can call them
//! unconditionally.

use std::io;
use std::path::Path;

pub use std::fs::*;

use crate::common::Timestamp;

#[cfg(unix)]
/// Set POSIX permission bits on Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
/// No-op: POSIX permission bits are not preserved.
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
/// Change owner and group. Fails with `PermissionDenied` for unprivileged
/// callers giving a file away.
pub fn set_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}

#[cfg(not(unix))]
pub fn set_owner(_path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
    Ok(())
}

/// Set access and modification times on an open file.
pub fn set_times(file: &File, atime: Timestamp, mtime: Timestamp) -> io::Result<()> {
    let times = FileTimes::new()
        .set_accessed(atime.to_system_time())
        .set_modified(mtime.to_system_time());
    file.set_times(times)
}

#[cfg(unix)]
/// fsync a directory so a rename inside it is durable.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
/// Whether both paths name the same inode. A missing path matches nothing.
pub fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let (a, b) = match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        (Err(e), _) | (_, Err(e)) => return Err(e),
    };
    Ok(a.dev() == b.dev() && a.ino() == b.ino())
}

#[cfg(not(unix))]
/// Whether both paths resolve to the same file. A missing path matches nothing.
pub fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => Ok(a == b),
        (Err(e), _) | (_, Err(e)) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        (Err(e), _) | (_, Err(e)) => Err(e),
    }
}

/// Parent directory of `path`, with `"."` for bare file names.
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parent_of_bare_name_is_cwd() {
        assert_eq!(parent_dir(Path::new("a.far")), Path::new("."));
        assert_eq!(parent_dir(Path::new("dir/a.far")), Path::new("dir"));
    }

    #[test]
    fn same_file_sees_through_other_spellings() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        std::fs::create_dir(dir.path().join("sub"))?;
        let path = dir.path().join("a.far");
        File::create(&path)?;
        let other = dir.path().join("sub").join("..").join("a.far");
        assert!(same_file(&path, &other)?);
        assert!(!same_file(&path, &dir.path().join("sub"))?);
        assert!(!same_file(&path, &dir.path().join("missing"))?);
        Ok(())
    }

    #[test]
    fn times_are_applied() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("t.txt");
        let mut f = File::create(&path)?;
        f.write_all(b"x")?;
        let mtime = Timestamp::new(1_000_000_000, 0);
        set_times(&f, Timestamp::new(1_000_000_100, 0), mtime)?;
        drop(f);
        let got = Timestamp::from_system_time(std::fs::metadata(&path)?.modified()?);
        assert_eq!(got, mtime);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn permissions_are_applied() -> Result<(), Box<dyn std::error::Error>> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir()?;
        let path = dir.path().join("p.txt");
        File::create(&path)?;
        set_unix_permissions(&path, 0o640)?;
        assert_eq!(std::fs::metadata(&path)?.permissions().mode() & 0o777, 0o640);
        Ok(())
    }
}
