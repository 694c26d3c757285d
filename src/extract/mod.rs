//! # Extraction Module
//!
//! Lookup, extraction and listing. All three are linear scans from byte 0;
//! there is no index. A lookup resolves to the *first* live record with the
//! requested name, so an older copy wins over a newer one until it has been
//! extracted.

use std::fs::OpenOptions;
use std::io::{BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{self, normalize_name, RecordScanner, ScannedRecord};
use crate::common::{RecordMeta, Timestamp};
use crate::compact::{self, CompactStats};
use crate::config::StoreConfig;
use crate::error::{ArchiverError, CorruptKind, IoContext, Result};
use crate::fsx as fs;
use crate::lock::{lock_path, ArchiveLock, LockMode};
use fs::File;

/// One live record as reported by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub size: u64,
    pub mtime: Timestamp,
    pub mode: u32,
    /// Header offset inside the archive.
    pub offset: u64,
}

impl From<ScannedRecord> for ListEntry {
    fn from(rec: ScannedRecord) -> Self {
        Self {
            name: rec.header.name,
            size: rec.header.meta.size,
            mtime: rec.header.meta.mtime,
            mode: rec.header.meta.mode,
            offset: rec.offset,
        }
    }
}

/// Lazy listing of live records in on-disk order.
///
/// Holds a shared lock on the archive until dropped. After a corrupt record
/// it yields that error once and then ends.
pub struct Entries {
    scanner: RecordScanner<File>,
    _lock: ArchiveLock,
}

impl Iterator for Entries {
    type Item = Result<ListEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.scanner.next()? {
                Ok(rec) if rec.header.deleted => continue,
                Ok(rec) => return Some(Ok(rec.into())),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Starts a lazy scan of `archive_path`.
pub fn entries(archive_path: &Path, config: &StoreConfig) -> Result<Entries> {
    let lock = ArchiveLock::acquire_existing(config.lock, archive_path, LockMode::Shared)?;
    let scanner = RecordScanner::open(archive_path)?;
    Ok(Entries { scanner, _lock: lock })
}

/// Collects every live record; fails if the scan hits corruption.
pub fn list_records(archive_path: &Path, config: &StoreConfig) -> Result<Vec<ListEntry>> {
    entries(archive_path, config)?.collect()
}

/// A file restored from the archive.
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    pub name: String,
    /// Where the payload was written.
    pub path: PathBuf,
    pub meta: RecordMeta,
    /// Outcome of the compaction that follows every extraction. `None` if it
    /// failed; the record is then left behind as a tombstone.
    pub compaction: Option<CompactStats>,
    /// Best-effort steps that did not succeed (ownership, times, compaction).
    pub warnings: Vec<String>,
}

/// Extracts the first live record called `name`, tombstones it and compacts
/// the archive.
///
/// Returns `Ok(None)` when no live record has that name; the archive is left
/// untouched in that case.
pub fn find_and_extract(archive_path: &Path, name: &str, config: &StoreConfig) -> Result<Option<ExtractedFile>> {
    let wanted = normalize_name(name);
    let _lock = ArchiveLock::acquire_existing(config.lock, archive_path, LockMode::Exclusive)?;

    let file = OpenOptions::new().read(true).write(true).open(archive_path).at(archive_path)?;
    let mut scanner = RecordScanner::with_path(&file, archive_path)?;

    let mut found = None;
    while let Some(rec) = scanner.next() {
        let rec = rec?;
        if !rec.header.deleted && rec.header.name == wanted {
            found = Some(rec);
            break;
        }
    }
    let Some(record) = found else {
        info!(archive = %archive_path.display(), name = %wanted, "no live record with that name");
        return Ok(None);
    };

    let meta = record.header.meta;
    if meta.size > config.max_record_size {
        return Err(ArchiverError::RecordTooLarge {
            name: record.header.name.clone(),
            size: meta.size,
            limit: config.max_record_size,
        });
    }

    let target = output_path(config.output_dir.as_deref(), &record.header.name)?;
    for guarded in [archive_path.to_path_buf(), lock_path(archive_path)] {
        if fs::same_file(&guarded, &target).at(&target)? {
            return Err(ArchiverError::InvalidName {
                name: record.header.name.clone(),
                reason: "output path is the archive or its lock file",
            });
        }
    }
    if let Some(dir) = target.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).at(dir)?;
    }

    let mut warnings = Vec::new();
    {
        let mut payload = scanner.payload(&record)?;
        write_payload(&mut payload, &target, &record)?;
    }
    restore_metadata(&target, &meta, config, &mut warnings)?;

    archive::mark_deleted(&file, archive_path, &record)?;
    if config.sync {
        file.sync_data().at(archive_path)?;
    }
    drop(scanner);
    drop(file);

    info!(archive = %archive_path.display(), name = %record.header.name, path = %target.display(), size = meta.size, "extracted record");

    let compaction = match compact::compact_locked(archive_path, config) {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!(archive = %archive_path.display(), error = %e, "compaction after extract failed, tombstone kept");
            warnings.push(format!("compaction failed: {e}"));
            None
        }
    };

    Ok(Some(ExtractedFile {
        name: record.header.name,
        path: target,
        meta,
        compaction,
        warnings,
    }))
}

/// Maps a stored name onto the output directory. Root and `.` components are
/// dropped so absolute names extract relative to the output directory; `..`
/// is refused.
pub fn output_path(base: Option<&Path>, name: &str) -> Result<PathBuf> {
    let mut rel = PathBuf::new();
    for comp in Path::new(name).components() {
        match comp {
            Component::Normal(c) => rel.push(c),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(ArchiverError::InvalidName {
                    name: name.to_string(),
                    reason: "name escapes the output directory",
                })
            }
        }
    }
    if rel.as_os_str().is_empty() {
        return Err(ArchiverError::InvalidName { name: name.to_string(), reason: "name has no file component" });
    }
    Ok(match base {
        Some(dir) => dir.join(rel),
        None => rel,
    })
}

/// Streams the payload into a temporary sibling of `target` and renames it
/// into place, so a failed copy never leaves a partial file or clobbers an
/// existing one.
fn write_payload<R: Read>(payload: &mut R, target: &Path, record: &ScannedRecord) -> Result<()> {
    let dir = fs::parent_dir(target);
    let tmp = tempfile::Builder::new()
        .prefix(".flatarch.")
        .suffix(".part")
        .tempfile_in(dir)
        .at(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file());
        let mut remaining = record.header.meta.size;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = payload.read(&mut buf[..want])?;
            if n == 0 {
                return Err(ArchiverError::corrupt(record.offset, CorruptKind::TruncatedPayload));
            }
            out.write_all(&buf[..n]).at(tmp.path())?;
            remaining -= n as u64;
        }
        out.flush().at(tmp.path())?;
    }
    tmp.persist(target).map_err(|e| ArchiverError::io(target, e.error))?;
    Ok(())
}

/// Owner, times and mode, in that order: chown may clear set-id bits, so the
/// mode goes last. Only the mode is mandatory.
fn restore_metadata(target: &Path, meta: &RecordMeta, config: &StoreConfig, warnings: &mut Vec<String>) -> Result<()> {
    if config.restore_ownership {
        if let Err(e) = fs::set_owner(target, meta.uid, meta.gid) {
            warn!(path = %target.display(), uid = meta.uid, gid = meta.gid, error = %e, "could not restore ownership");
            warnings.push(format!("ownership not restored: {e}"));
        }
    }

    let times = OpenOptions::new()
        .write(true)
        .open(target)
        .and_then(|f| fs::set_times(&f, meta.atime, meta.mtime));
    if let Err(e) = times {
        warn!(path = %target.display(), error = %e, "could not restore timestamps");
        warnings.push(format!("timestamps not restored: {e}"));
    }

    fs::set_unix_permissions(target, meta.permissions()).at(target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_stays_inside_base() {
        let base = Path::new("/out");
        assert_eq!(output_path(Some(base), "a.txt").unwrap(), PathBuf::from("/out/a.txt"));
        assert_eq!(output_path(Some(base), "/tmp/x/a.txt").unwrap(), PathBuf::from("/out/tmp/x/a.txt"));
        assert_eq!(output_path(None, "./dir/a.txt").unwrap(), PathBuf::from("dir/a.txt"));
    }

    #[test]
    fn output_path_rejects_escapes() {
        assert!(matches!(output_path(None, "../a.txt"), Err(ArchiverError::InvalidName { .. })));
        assert!(matches!(output_path(None, "dir/../../a.txt"), Err(ArchiverError::InvalidName { .. })));
        assert!(matches!(output_path(None, "/"), Err(ArchiverError::InvalidName { .. })));
    }
}
