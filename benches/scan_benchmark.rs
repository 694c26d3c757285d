use std::error::Error;
use std::fs;
use std::path::Path;
use std::time::Instant;

use flatarch::{archive, compact, extract, StoreConfig};
use rand::{thread_rng, RngCore};

const RECORDS: usize = 2_000;
const PAYLOAD: usize = 16 * 1024;

fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else {
        format!("{:.2} KiB", b / KB)
    }
}

fn build_archive(dir: &Path, config: &StoreConfig) -> Result<std::path::PathBuf, Box<dyn Error>> {
    let archive = dir.join("bench.far");
    let source = dir.join("payload.bin");
    let mut buf = vec![0u8; PAYLOAD];
    for i in 0..RECORDS {
        thread_rng().fill_bytes(&mut buf);
        fs::write(&source, &buf)?;
        archive::append_as(&archive, &source, &format!("file_{i:05}.bin"), config)?;
    }
    Ok(archive)
}

fn main() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let mut config = StoreConfig::default().with_output_dir(dir.path().join("out"));
    config.sync = false;

    println!("--- flatarch scan benchmark ({} records x {}) ---", RECORDS, format_bytes(PAYLOAD as u64));

    let start = Instant::now();
    let archive = build_archive(dir.path(), &config)?;
    let append_dur = start.elapsed();
    let size = fs::metadata(&archive)?.len();
    println!("append:  {:?} ({}, {:.0} records/s)", append_dur, format_bytes(size), RECORDS as f64 / append_dur.as_secs_f64());

    let start = Instant::now();
    let listed = extract::list_records(&archive, &config)?.len();
    println!("list:    {:?} ({} live records)", start.elapsed(), listed);

    // worst case lookup: the last record
    let last = format!("file_{:05}.bin", RECORDS - 1);
    let start = Instant::now();
    extract::find_and_extract(&archive, &last, &config)?;
    println!("extract: {:?} (scan to tail + compaction)", start.elapsed());

    let start = Instant::now();
    let stats = compact::compact(&archive, &config)?;
    println!("compact: {:?} (kept {}, nothing to drop)", start.elapsed(), stats.kept);

    Ok(())
}
