//! # Compaction
//!
//! Physically removes tombstoned records. The live records are streamed,
//! header bytes verbatim, into a temporary file next to the archive, which is
//! fsynced and then renamed over the archive path. Until that rename the
//! original is never written to, so a failure at any point leaves it exactly
//! as it was and the temporary file is removed when it goes out of scope.
//!
//! Processes that opened the archive before the rename keep reading the old
//! inode until they close it.

use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::archive::RecordScanner;
use crate::config::StoreConfig;
use crate::error::{ArchiverError, CorruptKind, IoContext, Result};
use crate::fsx as fs;
use crate::lock::{ArchiveLock, LockMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CompactStats {
    /// Live records copied into the new archive.
    pub kept: usize,
    /// Tombstones left behind.
    pub dropped: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl CompactStats {
    pub fn reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Rewrites `archive_path` without its tombstoned records.
pub fn compact(archive_path: &Path, config: &StoreConfig) -> Result<CompactStats> {
    let _lock = ArchiveLock::acquire_existing(config.lock, archive_path, LockMode::Exclusive)?;
    compact_locked(archive_path, config)
}

/// Compaction body; the caller holds the exclusive lock.
pub(crate) fn compact_locked(archive_path: &Path, config: &StoreConfig) -> Result<CompactStats> {
    let src = fs::File::open(archive_path).at(archive_path)?;
    let src_perms = src.metadata().at(archive_path)?.permissions();
    let mut scanner = RecordScanner::with_path(&src, archive_path)?;

    let dir = fs::parent_dir(archive_path);
    let tmp = temp_sibling(archive_path, dir)?;

    let mut stats = CompactStats { bytes_before: scanner.archive_len(), ..Default::default() };
    {
        let mut out = BufWriter::with_capacity(1 << 20, tmp.as_file());
        while let Some(rec) = scanner.next() {
            let rec = rec?;
            if rec.header.deleted {
                debug!(offset = rec.offset, name = %rec.header.name, "dropping tombstone");
                stats.dropped += 1;
                continue;
            }
            out.write_all(&rec.raw).at(tmp.path())?;
            let copied = io::copy(&mut scanner.payload(&rec)?, &mut out).at(tmp.path())?;
            if copied != rec.header.meta.size {
                return Err(ArchiverError::corrupt(rec.offset, CorruptKind::TruncatedPayload));
            }
            stats.kept += 1;
        }
        out.flush().at(tmp.path())?;
    }

    fs::set_permissions(tmp.path(), src_perms).at(tmp.path())?;
    if config.sync {
        tmp.as_file().sync_all().at(tmp.path())?;
    }
    stats.bytes_after = tmp.as_file().metadata().at(tmp.path())?.len();

    drop(scanner);
    drop(src);
    tmp.persist(archive_path).map_err(|e| ArchiverError::io(archive_path, e.error))?;
    if config.sync {
        fs::sync_dir(dir).at(dir)?;
    }

    info!(
        archive = %archive_path.display(),
        kept = stats.kept,
        dropped = stats.dropped,
        reclaimed = stats.reclaimed(),
        "compacted archive"
    );
    Ok(stats)
}

/// Uniquely named temporary file in `dir`, e.g. `.data.far.Xy3k9Q.compact`.
fn temp_sibling(archive_path: &Path, dir: &Path) -> Result<NamedTempFile> {
    let stem = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    tempfile::Builder::new()
        .prefix(&format!(".{stem}."))
        .suffix(".compact")
        .tempfile_in(dir)
        .at(dir)
}
