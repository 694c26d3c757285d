//! Store configuration.
//!
//! Defaults are safe for interactive use. The CLI starts from
//! [`StoreConfig::from_env`] and then applies its own flags on top, so a flag
//! always wins over the environment.

use std::path::PathBuf;

/// Environment variable overriding [`StoreConfig::max_record_size`], in MiB.
pub const ENV_MAX_RECORD_MB: &str = "FLATARCH_MAX_RECORD_MB";
/// Any non-empty value other than `0` disables fsync.
pub const ENV_NO_SYNC: &str = "FLATARCH_NO_SYNC";

pub const DEFAULT_MAX_RECORD_SIZE: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Extraction refuses records whose header claims more than this many bytes.
    pub max_record_size: u64,
    /// Where extracted files are written. `None` means the current directory.
    pub output_dir: Option<PathBuf>,
    /// Try to chown extracted files back to the archived uid/gid.
    pub restore_ownership: bool,
    /// fsync the archive after every mutation.
    pub sync: bool,
    /// Serialize processes through the `<archive>.lock` advisory lock.
    pub lock: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            output_dir: None,
            restore_ownership: true,
            sync: true,
            lock: true,
        }
    }
}

impl StoreConfig {
    /// Defaults with `FLATARCH_*` environment overrides applied.
    ///
    /// Malformed values are ignored with a warning rather than failing the
    /// whole invocation.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(ENV_MAX_RECORD_MB) {
            match parse_size_mb(&raw) {
                Some(bytes) => config.max_record_size = bytes,
                None => tracing::warn!(value = %raw, "ignoring malformed {}", ENV_MAX_RECORD_MB),
            }
        }
        if let Ok(raw) = std::env::var(ENV_NO_SYNC) {
            let raw = raw.trim();
            if !raw.is_empty() && raw != "0" {
                config.sync = false;
            }
        }
        config
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_max_record_size(mut self, bytes: u64) -> Self {
        self.max_record_size = bytes;
        self
    }
}

/// Parses a size in MiB such as `512`, `512MB` or `512 MiB` into bytes.
pub fn parse_size_mb(input: &str) -> Option<u64> {
    let s = input.trim();
    let lower = s.to_ascii_lowercase();
    let digits = lower
        .strip_suffix("mib")
        .or_else(|| lower.strip_suffix("mb"))
        .or_else(|| lower.strip_suffix('m'))
        .unwrap_or(&lower)
        .trim();
    let mb: u64 = digits.parse().ok()?;
    mb.checked_mul(1024 * 1024)
}
