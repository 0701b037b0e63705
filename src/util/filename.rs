//! Log file naming conventions.

use std::path::{Path, PathBuf};

/// Generate a log file path: `NNNNNN.log` inside `dir`.
pub fn log_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.log", number))
}

/// Parse a log file name and return its number.
///
/// Returns `None` if the name is not of the form `NNNNNN.log`.
pub fn parse_log_file_name(name: &str) -> Option<u64> {
    let num_str = name.strip_suffix(".log")?;
    if num_str.is_empty() || !num_str.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    num_str.parse::<u64>().ok()
}
