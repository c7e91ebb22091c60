//! Per-execution timing and resident memory metrics.

use chrono::{DateTime, Utc};
use psutil::process::Process;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Resident memory before and after an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub rss_before_bytes: Option<u64>,
    pub rss_after_bytes: Option<u64>,
    /// `after - before`; negative when memory was released.
    pub rss_delta_bytes: Option<i64>,
}

/// Metrics attached to every terminal agent result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub resource_usage: ResourceUsage,
}

/// Captures a start snapshot; [`finish`](Self::finish) produces the metrics.
#[derive(Debug)]
pub struct MetricsRecorder {
    started: Instant,
    start_time: DateTime<Utc>,
    rss_before: Option<u64>,
}

impl MetricsRecorder {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            start_time: Utc::now(),
            rss_before: resident_memory_bytes(),
        }
    }

    pub fn finish(self) -> ExecutionMetrics {
        let rss_after = resident_memory_bytes();
        let rss_delta = match (self.rss_before, rss_after) {
            (Some(before), Some(after)) => Some(after as i64 - before as i64),
            _ => None,
        };

        ExecutionMetrics {
            start_time: self.start_time,
            end_time: Utc::now(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            resource_usage: ResourceUsage {
                rss_before_bytes: self.rss_before,
                rss_after_bytes: rss_after,
                rss_delta_bytes: rss_delta,
            },
        }
    }
}

/// Resident set size of the current process, if the platform exposes it.
pub fn resident_memory_bytes() -> Option<u64> {
    match Process::current().and_then(|process| process.memory_info()) {
        Ok(info) => Some(info.rss()),
        Err(e) => {
            debug!(error = %e, "Resident memory unavailable");
            None
        }
    }
}
