//! # flatarch Core Library
//!
//! This crate provides the storage engine behind the `flatarch` command-line
//! archiver: an append-only flat file of `(header, payload)` records with
//! in-place soft-delete and offline compaction.
//!
//! ## Key Modules
//!
//! - [`archive`]: The on-disk record format, the forward scanner and `append`.
//! - [`extract`]: Lookup, extraction (which tombstones and compacts) and listing.
//! - [`compact`]: Rewrites the archive without tombstoned records.
//! - [`check`]: Full integrity walk and torn-tail repair.
//! - [`lock`]: Advisory inter-process lock serializing writers.
//!
//! ## Examples
//!
//! ```no_run
//! use flatarch::{archive, extract, StoreConfig};
//! use std::path::Path;
//!
//! # fn main() -> flatarch::Result<()> {
//! let config = StoreConfig::default();
//! let arch = Path::new("backup.far");
//! archive::append_file(arch, Path::new("notes.txt"), &config)?;
//! for entry in extract::list_records(arch, &config)? {
//!     println!("{} {}", entry.name, entry.size);
//! }
//! if extract::find_and_extract(arch, "notes.txt", &config)?.is_none() {
//!     println!("not in archive");
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod check;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod compact;
pub mod config;
pub mod error;
pub mod extract;
pub mod lock;

// Cross-platform filesystem wrapper
pub mod fsx;

pub use config::StoreConfig;
pub use error::{ArchiverError, CorruptKind, Result};
