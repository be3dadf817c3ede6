//! Run statistics (§6 expansion): what `compress` reports back to the CLI
//! for `--json` output and human-readable summaries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub log_count: u64,
    pub template_count: u64,
    pub synthetic_template_count: u64,
    pub skipped_lines: u64,
    pub truncated_lines: u64,
    pub elapsed_ms: u64,
}

impl Stats {
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 0.0;
        }
        self.original_bytes as f64 / self.compressed_bytes as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_zero_for_empty_output() {
        let stats = Stats::default();
        assert_eq!(stats.compression_ratio(), 0.0);
    }

    #[test]
    fn ratio_computed_from_byte_counts() {
        let stats = Stats {
            original_bytes: 1000,
            compressed_bytes: 100,
            ..Stats::default()
        };
        assert_eq!(stats.compression_ratio(), 10.0);
    }
}
