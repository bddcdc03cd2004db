//! Pipeline configuration.

use std::time::Duration;

/// Tunable parameters for the queue and the splitting handlers.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How long a claim holds a task before the reaper may reclaim it.
    pub lease: Duration,
    /// Default retry budget for newly created tasks.
    pub default_max_retries: i64,
    /// Upper bound on one audio segment, in bytes.
    pub max_segment_bytes: usize,
    /// Overlap carried into the next audio segment, in bytes.
    pub overlap_bytes: usize,
    /// Rough bitrate used to estimate segment durations.
    pub estimated_bytes_per_sec: usize,
    /// Upper bound on one proofreading chunk, in characters.
    pub max_chunk_chars: usize,
    /// Poller: delay between dispatch attempts.
    pub dispatch_interval: Duration,
    /// Poller: delay between reaper sweeps.
    pub reap_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(600),
            default_max_retries: 3,
            max_segment_bytes: 20 * 1024 * 1024,
            overlap_bytes: 256 * 1024,
            estimated_bytes_per_sec: 32 * 1024,
            max_chunk_chars: 8_000,
            dispatch_interval: Duration::from_secs(5),
            reap_interval: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    /// Set the lease duration.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Set the default retry budget.
    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Set the audio segment size bound and overlap.
    pub fn with_segmenting(mut self, max_segment_bytes: usize, overlap_bytes: usize) -> Self {
        self.max_segment_bytes = max_segment_bytes;
        self.overlap_bytes = overlap_bytes;
        self
    }

    /// Set the text chunk size bound.
    pub fn with_max_chunk_chars(mut self, max_chunk_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars;
        self
    }
}
