use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{parse_size_mb, StoreConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log every scanned record and lock transition to stderr (same as RUST_LOG=debug).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip fsync after mutations. Faster, but a crash may lose the last operation.
    #[arg(long, global = true)]
    pub no_sync: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Append a file to the end of an archive, creating the archive if needed.
    #[command(alias = "i")]
    Append {
        /// The archive file (e.g., backup.far).
        #[arg(required = true)]
        archive: PathBuf,

        /// The file to add.
        #[arg(required = true)]
        file: PathBuf,

        /// Store the file under this name instead of its path.
        #[arg(long)]
        name: Option<String>,
    },

    /// Extract a file from an archive and remove it from the archive.
    #[command(alias = "x", alias = "e")]
    Extract {
        /// The archive file to extract from.
        #[arg(required = true)]
        archive: PathBuf,

        /// Name of the record, as shown by `list`.
        #[arg(required = true)]
        name: String,

        /// The directory where the file will be written. Defaults to the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Refuse records larger than this many MiB (overrides FLATARCH_MAX_RECORD_MB).
        #[arg(long, value_parser = parse_size_mb_arg)]
        max_record_mb: Option<u64>,
    },

    /// List the live records of an archive.
    #[command(alias = "l", alias = "stat")]
    List {
        /// The archive file to list contents of.
        #[arg(required = true)]
        archive: PathBuf,

        /// Print a JSON array instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Rewrite the archive without deleted records.
    Compact {
        #[arg(required = true)]
        archive: PathBuf,
    },

    /// Read the whole archive and report record and space statistics.
    Verify {
        #[arg(required = true)]
        archive: PathBuf,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Truncate a torn record left at the end of the archive by an interrupted append.
    Repair {
        #[arg(required = true)]
        archive: PathBuf,
    },
}

fn parse_size_mb_arg(s: &str) -> Result<u64, String> {
    parse_size_mb(s).ok_or_else(|| format!("'{s}' is not a size in MiB"))
}

impl Args {
    /// Environment configuration with this invocation's flags applied on top.
    pub fn store_config(&self) -> StoreConfig {
        let mut config = StoreConfig::from_env();
        if self.no_sync {
            config.sync = false;
        }
        if let Commands::Extract { output, max_record_mb, .. } = &self.command {
            if let Some(dir) = output {
                config.output_dir = Some(dir.clone());
            }
            if let Some(bytes) = max_record_mb {
                config.max_record_size = *bytes;
            }
        }
        config
    }
}

/// Parses command-line arguments using `clap`.
///
/// This is the main entry point for the CLI logic.
pub fn run() -> Args {
    Args::parse()
}
