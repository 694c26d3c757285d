//! # Flat Archive Format
//!
//! This module defines the on-disk record layout and the two primitives every
//! operation is built from: the forward [`RecordScanner`] and [`append_file`].
//!
//! An archive is nothing but `(header, payload)` pairs laid back to back.
//! There is no file header, no footer and no index; end-of-file is the only
//! terminator and `size` in each header is the only way to find the next one.
//!
//! ## Header layout (little-endian, [`HEADER_SIZE`] bytes)
//!
//! | offset | size | field                                   |
//! |-------:|-----:|-----------------------------------------|
//! |      0 |  256 | name, UTF-8, NUL padded                 |
//! |    256 |    8 | payload size (`u64`)                    |
//! |    264 |    4 | mode (`u32`)                            |
//! |    268 |    4 | uid (`u32`)                             |
//! |    272 |    4 | gid (`u32`)                             |
//! |    276 |    8 | link count (`u64`)                      |
//! |    284 |    8 | atime seconds (`i64`)                   |
//! |    292 |    4 | atime nanoseconds (`u32`)               |
//! |    296 |    8 | mtime seconds (`i64`)                   |
//! |    304 |    4 | mtime nanoseconds (`u32`)               |
//! |    308 |    1 | deleted flag (0 live, 1 tombstone)      |
//! |    309 |    3 | reserved, zero                          |
//! |    312 |    4 | CRC-32 of bytes `0..312`                |

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32Hasher;
use tracing::{debug, info, warn};

use crate::common::{RecordMeta, Timestamp};
use crate::config::StoreConfig;
use crate::error::{ArchiverError, CorruptKind, IoContext, Result};
use crate::fsx;
use crate::lock::{ArchiveLock, LockMode};

/// Bytes reserved for the name, terminator included.
pub const NAME_CAPACITY: usize = 256;
/// Longest name that still leaves room for the NUL terminator.
pub const MAX_NAME_LEN: usize = NAME_CAPACITY - 1;
pub const HEADER_SIZE: usize = 316;

const OFF_SIZE: usize = 256;
const OFF_MODE: usize = 264;
const OFF_UID: usize = 268;
const OFF_GID: usize = 272;
const OFF_NLINK: usize = 276;
const OFF_ATIME: usize = 284;
const OFF_ATIME_NS: usize = 292;
const OFF_MTIME: usize = 296;
const OFF_MTIME_NS: usize = 304;
const OFF_DELETED: usize = 308;
const OFF_CRC: usize = 312;

const COPY_BUF: usize = 64 * 1024;

/// A decoded record header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub name: String,
    pub meta: RecordMeta,
    pub deleted: bool,
}

impl RecordHeader {
    /// Builds a live header, rejecting names the fixed field cannot hold.
    pub fn new(name: &str, meta: RecordMeta) -> Result<Self> {
        validate_name(name)?;
        Ok(Self { name: name.to_string(), meta, deleted: false })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let name = self.name.as_bytes();
        let n = name.len().min(MAX_NAME_LEN);
        buf[..n].copy_from_slice(&name[..n]);

        let m = &self.meta;
        buf[OFF_SIZE..OFF_SIZE + 8].copy_from_slice(&m.size.to_le_bytes());
        buf[OFF_MODE..OFF_MODE + 4].copy_from_slice(&m.mode.to_le_bytes());
        buf[OFF_UID..OFF_UID + 4].copy_from_slice(&m.uid.to_le_bytes());
        buf[OFF_GID..OFF_GID + 4].copy_from_slice(&m.gid.to_le_bytes());
        buf[OFF_NLINK..OFF_NLINK + 8].copy_from_slice(&m.nlink.to_le_bytes());
        buf[OFF_ATIME..OFF_ATIME + 8].copy_from_slice(&m.atime.secs.to_le_bytes());
        buf[OFF_ATIME_NS..OFF_ATIME_NS + 4].copy_from_slice(&m.atime.nanos.to_le_bytes());
        buf[OFF_MTIME..OFF_MTIME + 8].copy_from_slice(&m.mtime.secs.to_le_bytes());
        buf[OFF_MTIME_NS..OFF_MTIME_NS + 4].copy_from_slice(&m.mtime.nanos.to_le_bytes());
        buf[OFF_DELETED] = self.deleted as u8;

        let crc = header_crc(&buf);
        buf[OFF_CRC..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a header read at `offset`; the offset only feeds error reports.
    pub fn decode(buf: &[u8; HEADER_SIZE], offset: u64) -> Result<Self> {
        if read_u32(buf, OFF_CRC) != header_crc(buf) {
            return Err(ArchiverError::corrupt(offset, CorruptKind::ChecksumMismatch));
        }
        let name_end = buf[..NAME_CAPACITY].iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        let name = String::from_utf8_lossy(&buf[..name_end]).into_owned();

        let meta = RecordMeta {
            size: read_u64(buf, OFF_SIZE),
            mode: read_u32(buf, OFF_MODE),
            uid: read_u32(buf, OFF_UID),
            gid: read_u32(buf, OFF_GID),
            nlink: read_u64(buf, OFF_NLINK),
            atime: Timestamp::new(read_u64(buf, OFF_ATIME) as i64, read_u32(buf, OFF_ATIME_NS)),
            mtime: Timestamp::new(read_u64(buf, OFF_MTIME) as i64, read_u32(buf, OFF_MTIME_NS)),
        };
        Ok(Self { name, meta, deleted: buf[OFF_DELETED] != 0 })
    }

    /// Bytes the whole record (header + payload) occupies on disk.
    pub fn record_len(&self) -> Option<u64> {
        (HEADER_SIZE as u64).checked_add(self.meta.size)
    }
}

fn header_crc(buf: &[u8; HEADER_SIZE]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(&buf[..OFF_CRC]);
    hasher.finalize()
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

/// Checks that `name` can be stored in a header.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ArchiverError::InvalidName { name: name.to_string(), reason: "name is empty" });
    }
    if name.as_bytes().contains(&0) {
        return Err(ArchiverError::InvalidName { name: name.to_string(), reason: "name contains a NUL byte" });
    }
    if name.split('/').any(|c| c == "..") {
        return Err(ArchiverError::InvalidName { name: name.to_string(), reason: "name contains a '..' component" });
    }
    if name.split('/').all(|c| c.is_empty() || c == ".") {
        return Err(ArchiverError::InvalidName { name: name.to_string(), reason: "name has no file component" });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ArchiverError::NameTooLong { name: name.to_string(), len: name.len(), max: MAX_NAME_LEN });
    }
    Ok(())
}

/// Canonical stored form of a path: forward slashes, no leading `./`, no
/// doubled separators. Lookups normalize the query the same way.
pub fn normalize_name(path: &str) -> String {
    let mut s = path.replace('\\', "/");
    while let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    while s.contains("//") {
        s = s.replace("//", "/");
    }
    s
}

/// Stored name for a source path given on the command line.
pub fn name_for_path(path: &Path) -> Result<String> {
    match path.to_str() {
        Some(s) => Ok(normalize_name(s)),
        None => Err(ArchiverError::InvalidName {
            name: path.to_string_lossy().into_owned(),
            reason: "path is not valid UTF-8",
        }),
    }
}

/// A header found by the scanner, with the offset it was read from.
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    pub offset: u64,
    pub header: RecordHeader,
    /// The header bytes exactly as they sit on disk.
    pub raw: [u8; HEADER_SIZE],
}

impl ScannedRecord {
    pub fn payload_offset(&self) -> u64 {
        self.offset + HEADER_SIZE as u64
    }

    pub fn end_offset(&self) -> u64 {
        self.payload_offset() + self.header.meta.size
    }
}

/// Forward-only walk over the records of an archive.
///
/// Every call to `next` seeks to the next header explicitly, so callers may
/// read a payload through [`RecordScanner::payload`] between calls. The
/// scanner yields at most one error and then stops.
pub struct RecordScanner<R> {
    reader: R,
    path: PathBuf,
    pos: u64,
    len: u64,
    done: bool,
}

impl RecordScanner<File> {
    /// Opens `path` read-only and positions the scan at byte 0.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).at(path)?;
        Self::with_path(file, path)
    }
}

impl<R: Read + Seek> RecordScanner<R> {
    pub fn new(reader: R) -> Result<Self> {
        Self::with_path(reader, Path::new(""))
    }

    pub fn with_path(mut reader: R, path: &Path) -> Result<Self> {
        let len = reader.seek(SeekFrom::End(0)).at(path)?;
        reader.seek(SeekFrom::Start(0)).at(path)?;
        Ok(Self { reader, path: path.to_path_buf(), pos: 0, len, done: false })
    }

    /// Archive length captured when the scan started.
    pub fn archive_len(&self) -> u64 {
        self.len
    }

    /// Walks the remaining records and returns the offset where the last
    /// complete one ends, which must be the end of the file.
    pub fn scan_to_end(&mut self) -> Result<u64> {
        while let Some(rec) = self.next() {
            rec?;
        }
        Ok(self.pos)
    }

    /// Seeks to `record`'s payload and returns a reader bounded to it.
    pub fn payload(&mut self, record: &ScannedRecord) -> Result<io::Take<&mut R>> {
        self.reader.seek(SeekFrom::Start(record.payload_offset())).at(&self.path)?;
        Ok((&mut self.reader).take(record.header.meta.size))
    }

    fn read_next(&mut self) -> Result<ScannedRecord> {
        let offset = self.pos;
        if self.len - offset < HEADER_SIZE as u64 {
            return Err(ArchiverError::corrupt(offset, CorruptKind::TruncatedHeader));
        }
        self.reader.seek(SeekFrom::Start(offset)).at(&self.path)?;
        let mut raw = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut raw).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ArchiverError::corrupt(offset, CorruptKind::TruncatedHeader)
            } else {
                ArchiverError::io(&self.path, e)
            }
        })?;
        let header = RecordHeader::decode(&raw, offset)?;
        let end = header
            .record_len()
            .and_then(|n| offset.checked_add(n))
            .ok_or_else(|| ArchiverError::corrupt(offset, CorruptKind::SizeOverflow))?;
        if end > self.len {
            return Err(ArchiverError::corrupt(offset, CorruptKind::TruncatedPayload));
        }
        debug!(offset, name = %header.name, size = header.meta.size, deleted = header.deleted, "scanned record");
        self.pos = end;
        Ok(ScannedRecord { offset, header, raw })
    }
}

impl<R: Read + Seek> Iterator for RecordScanner<R> {
    type Item = Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.len {
            self.done = true;
            return None;
        }
        let rec = self.read_next();
        if rec.is_err() {
            self.done = true;
        }
        Some(rec)
    }
}

/// Result of a successful append.
#[derive(Debug, Clone)]
pub struct AppendedRecord {
    pub name: String,
    /// Offset of the new record's header.
    pub offset: u64,
    pub meta: RecordMeta,
}

/// Appends `source` under its own (normalized) path as the record name.
pub fn append_file(archive_path: &Path, source: &Path, config: &StoreConfig) -> Result<AppendedRecord> {
    let name = name_for_path(source)?;
    append_as(archive_path, source, &name, config)
}

/// Appends `source` to the archive under `name`.
///
/// The archive is created if missing and never truncated. If it does not end
/// on a record boundary the append is refused with `CorruptArchive`, and if
/// writing fails halfway the archive is cut back to its previous length.
pub fn append_as(archive_path: &Path, source: &Path, name: &str, config: &StoreConfig) -> Result<AppendedRecord> {
    let name = normalize_name(name);
    validate_name(&name)?;

    let _lock = ArchiveLock::acquire_if(config.lock, archive_path, LockMode::Exclusive)?;

    if fsx::same_file(source, archive_path).at(source)? {
        return Err(ArchiverError::Io {
            source: io::Error::new(io::ErrorKind::InvalidInput, "cannot append an archive to itself"),
            path: source.to_path_buf(),
        });
    }
    let mut src = File::open(source).at(source)?;
    let src_meta = src.metadata().at(source)?;
    if !src_meta.is_file() {
        return Err(ArchiverError::Io {
            source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            path: source.to_path_buf(),
        });
    }
    let header = RecordHeader::new(&name, RecordMeta::from_metadata(&src_meta))?;

    let archive = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(archive_path)
        .at(archive_path)?;

    let offset = RecordScanner::with_path(&archive, archive_path)?.scan_to_end()?;

    if let Err(e) = write_record(&archive, archive_path, &header, &mut src, source) {
        match archive.set_len(offset) {
            Ok(()) => warn!(archive = %archive_path.display(), offset, "append failed, rolled back partial record"),
            Err(te) => warn!(archive = %archive_path.display(), offset, error = %te, "append failed and rollback failed, archive has a torn tail"),
        }
        return Err(e);
    }
    if config.sync {
        archive.sync_data().at(archive_path)?;
    }

    info!(archive = %archive_path.display(), name = %header.name, size = header.meta.size, offset, "appended record");
    Ok(AppendedRecord { name: header.name, offset, meta: header.meta })
}

fn write_record(archive: &File, archive_path: &Path, header: &RecordHeader, src: &mut File, source: &Path) -> Result<()> {
    let mut out = BufWriter::with_capacity(COPY_BUF, archive);
    out.write_all(&header.encode()).at(archive_path)?;

    let mut remaining = header.meta.size;
    let mut buf = vec![0u8; COPY_BUF];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = src.read(&mut buf[..want]).at(source)?;
        if n == 0 {
            return Err(ArchiverError::Io {
                source: io::Error::new(io::ErrorKind::UnexpectedEof, "source shrank while being archived"),
                path: source.to_path_buf(),
            });
        }
        out.write_all(&buf[..n]).at(archive_path)?;
        remaining -= n as u64;
    }
    out.flush().at(archive_path)?;
    Ok(())
}

/// Flips the record's deleted flag by rewriting its header in place.
/// The payload is not touched.
pub fn mark_deleted(archive: &File, archive_path: &Path, record: &ScannedRecord) -> Result<()> {
    let mut header = record.header.clone();
    header.deleted = true;
    let mut f = archive;
    f.seek(SeekFrom::Start(record.offset)).at(archive_path)?;
    f.write_all(&header.encode()).at(archive_path)?;
    f.flush().at(archive_path)?;
    debug!(offset = record.offset, name = %header.name, "marked record deleted");
    Ok(())
}
