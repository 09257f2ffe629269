//! Per-user storage accounting.

use serde::Serialize;

const MIB: f64 = 1024.0 * 1024.0;

/// Bytes used by a user's files against their quota. Folder markers never count.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub max_bytes: u64,
    /// Share of the quota in use, rounded to one decimal.
    pub percentage: f64,
    pub used_mb: f64,
    pub max_mb: f64,
    pub available_mb: f64,
}

impl StorageUsage {
    pub fn new(used_bytes: u64, max_bytes: u64) -> Self {
        let used_mb = used_bytes as f64 / MIB;
        let max_mb = max_bytes as f64 / MIB;
        let percentage = if max_bytes == 0 {
            100.0
        } else {
            used_bytes as f64 / max_bytes as f64 * 100.0
        };
        Self {
            used_bytes,
            max_bytes,
            percentage: round1(percentage),
            used_mb: round1(used_mb),
            max_mb: max_mb.round(),
            available_mb: round1(max_mb - used_mb),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
