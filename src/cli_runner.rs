//! Command dispatch for the `flatarch` binary.
//!
//! Everything printed for the user goes to stdout; diagnostics go through
//! `tracing` to stderr.

use std::path::Path;

use crate::archive;
use crate::check;
use crate::cli::{Args, Commands};
use crate::compact;
use crate::extract::{self, ListEntry};

/// How a successfully parsed command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// `extract` found no live record with the requested name.
    NotFound,
}

/// Runs one parsed command against the store.
pub fn run_cli_app(args: &Args) -> Result<Outcome, Box<dyn std::error::Error>> {
    let config = args.store_config();

    match &args.command {
        Commands::Append { archive, file, name } => {
            let rec = match name {
                Some(n) => archive::append_as(archive, file, n, &config)?,
                None => archive::append_file(archive, file, &config)?,
            };
            println!(
                "Added '{}' ({} bytes) to archive '{}'.",
                rec.name,
                rec.meta.size,
                archive.display()
            );
        }
        Commands::Extract { archive, name, .. } => {
            let Some(done) = extract::find_and_extract(archive, name, &config)? else {
                eprintln!("'{}' not found in archive '{}'", name, archive.display());
                return Ok(Outcome::NotFound);
            };
            for w in &done.warnings {
                eprintln!("warning: {w}");
            }
            println!(
                "Extracted '{}' to '{}' and removed it from archive '{}'.",
                done.name,
                done.path.display(),
                archive.display()
            );
        }
        Commands::List { archive, json } => {
            let entries = extract::list_records(archive, &config)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_table(archive, &entries);
            }
        }
        Commands::Compact { archive } => {
            let stats = compact::compact(archive, &config)?;
            println!(
                "Compacted '{}': kept {} records, dropped {}, reclaimed {} bytes.",
                archive.display(),
                stats.kept,
                stats.dropped,
                stats.reclaimed()
            );
        }
        Commands::Verify { archive, json } => {
            let report = check::verify(archive, &config)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Archive '{}' is consistent.", archive.display());
                println!("  records:    {} ({} live, {} deleted)", report.records, report.live, report.tombstoned);
                println!("  live bytes: {}", report.live_bytes);
                println!("  dead bytes: {}", report.dead_bytes);
                println!("  file size:  {}", report.archive_len);
            }
        }
        Commands::Repair { archive } => {
            let report = check::repair(archive, &config)?;
            if report.truncated_bytes == 0 {
                println!("Archive '{}' is intact ({} records).", archive.display(), report.records);
            } else {
                println!(
                    "Truncated {} bytes of torn data from '{}'; {} records kept.",
                    report.truncated_bytes,
                    archive.display(),
                    report.records
                );
            }
        }
    }

    Ok(Outcome::Done)
}

fn print_table(archive: &Path, entries: &[ListEntry]) {
    println!("Contents of archive '{}':", archive.display());
    println!("{}", "-".repeat(64));
    println!("{:<30} {:>12} {:<20}", "Name", "Size (B)", "Modified");
    println!("{}", "-".repeat(64));
    for e in entries {
        println!("{:<30} {:>12} {:<20}", e.name, e.size, e.mtime.to_local_string());
    }
}
