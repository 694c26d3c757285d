//! Common utilities and types module.
// Metadata snapshot shared by the format, extraction and listing code.

use serde::Serialize;
use std::fs::Metadata;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A point in time as stored in a record header: seconds relative to the
/// Unix epoch plus a nanosecond remainder in `0..1_000_000_000`.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos: nanos.min(999_999_999) }
    }

    pub fn from_system_time(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => {
                // before the epoch: floor to whole seconds, keep a positive remainder
                let d = e.duration();
                let mut secs = -(d.as_secs() as i64);
                let mut nanos = d.subsec_nanos();
                if nanos > 0 {
                    secs -= 1;
                    nanos = 1_000_000_000 - nanos;
                }
                Self::new(secs, nanos)
            }
        }
    }

    pub fn to_system_time(self) -> SystemTime {
        if self.secs >= 0 {
            UNIX_EPOCH + Duration::new(self.secs as u64, self.nanos)
        } else {
            UNIX_EPOCH - Duration::from_secs(self.secs.unsigned_abs()) + Duration::from_nanos(self.nanos as u64)
        }
    }

    /// Local wall-clock rendering used by `list`.
    pub fn to_local_string(self) -> String {
        match chrono::DateTime::from_timestamp(self.secs, self.nanos) {
            Some(utc) => utc
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            None => "-".to_string(),
        }
    }
}

/// Snapshot of the source file's stat information at archive time.
///
/// `size` is authoritative: it is the exact length of the payload that
/// follows the header on disk.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordMeta {
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Informational only.
    pub nlink: u64,
    pub atime: Timestamp,
    pub mtime: Timestamp,
}

impl RecordMeta {
    #[cfg(unix)]
    pub fn from_metadata(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            size: meta.len(),
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            nlink: meta.nlink(),
            atime: Timestamp::new(meta.atime(), meta.atime_nsec() as u32),
            mtime: Timestamp::new(meta.mtime(), meta.mtime_nsec() as u32),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &Metadata) -> Self {
        let mode = if meta.permissions().readonly() { 0o100444 } else { 0o100644 };
        Self {
            size: meta.len(),
            mode,
            uid: 0,
            gid: 0,
            nlink: 1,
            atime: meta.accessed().map(Timestamp::from_system_time).unwrap_or_default(),
            mtime: meta.modified().map(Timestamp::from_system_time).unwrap_or_default(),
        }
    }

    /// Permission bits only, without the file-type bits `st_mode` carries.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}
