//! Memory parsing utilities for scheduler output and resource requests.

/// Parse a memory string to megabytes.
///
/// Handles the SLURM forms "4G", "1000M", "4096K", "1T" and bare numbers
/// (taken as MB). A trailing per-node/per-core marker ("4Gn", "1000Mc") is
/// ignored.
///
/// Returns None for empty strings or placeholder values.
pub fn parse_memory_mb(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || s == "-" || s == "N/A" {
        return None;
    }

    let s = s.trim_end_matches(['n', 'c']);
    let upper = s.to_ascii_uppercase();
    let upper = upper.trim_end_matches('B');

    if let Some(stripped) = upper.strip_suffix('T') {
        stripped.parse::<u64>().ok()?.checked_mul(1024 * 1024)
    } else if let Some(stripped) = upper.strip_suffix('G') {
        stripped.parse::<u64>().ok()?.checked_mul(1024)
    } else if let Some(stripped) = upper.strip_suffix('M') {
        stripped.parse::<u64>().ok()
    } else if let Some(stripped) = upper.strip_suffix('K') {
        stripped.parse::<u64>().ok().map(|v| v / 1024)
    } else {
        // Assume MB if no suffix
        upper.parse::<u64>().ok()
    }
}
