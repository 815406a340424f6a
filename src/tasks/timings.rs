use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 轮询、超时与自动移除的时间参数（毫秒）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTimings {
    pub poll_interval_ms: u64,
    pub batch_ceiling_ms: u64,
    pub download_ceiling_ms: u64,
    pub batch_success_removal_ms: u64,
    pub batch_failure_removal_ms: u64,
    pub download_success_removal_ms: u64,
    pub download_failure_removal_ms: u64,
    pub download_cancel_removal_ms: u64,
    pub cleanup_delay_ms: u64,
    pub batch_staleness_ms: u64,
    pub download_staleness_ms: u64,
}

impl Default for TaskTimings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_ceiling_ms: 10 * 60 * 1_000,
            download_ceiling_ms: 30 * 60 * 1_000,
            batch_success_removal_ms: 2_000,
            batch_failure_removal_ms: 4_000,
            download_success_removal_ms: 3_000,
            download_failure_removal_ms: 4_000,
            download_cancel_removal_ms: 2_000,
            cleanup_delay_ms: 5_000,
            batch_staleness_ms: 60 * 60 * 1_000,
            download_staleness_ms: 2 * 60 * 60 * 1_000,
        }
    }
}

impl TaskTimings {
    pub fn poll_interval(&self) -> Duration {
        // interval 不接受 0
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn batch_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval(),
            ceiling: Duration::from_millis(self.batch_ceiling_ms),
        }
    }

    pub fn download_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval(),
            ceiling: Duration::from_millis(self.download_ceiling_ms),
        }
    }
}

/// 单个任务的轮询间隔与硬超时
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub ceiling: Duration,
}

pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
