//! Integrity walk and torn-tail recovery.
//!
//! `verify` reads every header and every payload byte, so it also surfaces
//! media read errors that a header-only scan would miss. `repair` only ever
//! shortens the archive, and only when the damage is a torn tail: a record
//! whose header or payload stops at end-of-file. A bad checksum in the middle
//! of the file is left alone for a human to look at.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::RecordScanner;
use crate::config::StoreConfig;
use crate::error::{ArchiverError, CorruptKind, IoContext, Result};
use crate::lock::{ArchiveLock, LockMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VerifyReport {
    pub records: usize,
    pub live: usize,
    pub tombstoned: usize,
    /// Header + payload bytes held by live records.
    pub live_bytes: u64,
    /// Header + payload bytes compaction would reclaim.
    pub dead_bytes: u64,
    pub archive_len: u64,
}

/// Reads the whole archive and checks that it is a valid chain of records.
pub fn verify(archive_path: &Path, config: &StoreConfig) -> Result<VerifyReport> {
    let _lock = ArchiveLock::acquire_existing(config.lock, archive_path, LockMode::Shared)?;
    let mut scanner = RecordScanner::open(archive_path)?;
    let mut report = VerifyReport { archive_len: scanner.archive_len(), ..Default::default() };

    while let Some(rec) = scanner.next() {
        let rec = rec?;
        let read = io::copy(&mut scanner.payload(&rec)?, &mut io::sink()).at(archive_path)?;
        if read != rec.header.meta.size {
            return Err(ArchiverError::corrupt(rec.offset, CorruptKind::TruncatedPayload));
        }
        let bytes = rec.end_offset() - rec.offset;
        report.records += 1;
        if rec.header.deleted {
            report.tombstoned += 1;
            report.dead_bytes += bytes;
        } else {
            report.live += 1;
            report.live_bytes += bytes;
        }
    }
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RepairReport {
    /// Complete records kept.
    pub records: usize,
    /// Archive length after repair.
    pub valid_len: u64,
    pub truncated_bytes: u64,
}

/// Cuts a torn tail record off the end of the archive.
pub fn repair(archive_path: &Path, config: &StoreConfig) -> Result<RepairReport> {
    let _lock = ArchiveLock::acquire_existing(config.lock, archive_path, LockMode::Exclusive)?;
    let file = OpenOptions::new().read(true).write(true).open(archive_path).at(archive_path)?;
    let mut scanner = RecordScanner::with_path(&file, archive_path)?;
    let len = scanner.archive_len();

    let mut records = 0;
    while let Some(rec) = scanner.next() {
        match rec {
            Ok(_) => records += 1,
            Err(ArchiverError::CorruptArchive { offset, kind }) if kind.is_torn_tail() => {
                drop(scanner);
                file.set_len(offset).at(archive_path)?;
                if config.sync {
                    file.sync_all().at(archive_path)?;
                }
                warn!(archive = %archive_path.display(), offset, %kind, truncated = len - offset, "truncated torn tail record");
                return Ok(RepairReport { records, valid_len: offset, truncated_bytes: len - offset });
            }
            Err(e) => return Err(e),
        }
    }

    info!(archive = %archive_path.display(), records, "archive is intact, nothing to repair");
    Ok(RepairReport { records, valid_len: len, truncated_bytes: 0 })
}
