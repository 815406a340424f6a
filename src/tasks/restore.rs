use chrono::Utc;
use tracing::{debug, info, warn};

use super::manager::TaskManager;
use super::store::{Namespace, PersistedRecord};
use crate::common::api::ApiError;
use crate::common::api::models::RemoteState;

/// 一次恢复的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    /// 重新开始轮询
    pub resumed: usize,
    /// 超过时限，未访问远端即清除
    pub stale: usize,
    /// 远端已结束或不存在
    pub finished: usize,
    /// 查询失败或无法恢复
    pub failed: usize,
}

impl RestoreReport {
    pub fn total(&self) -> usize {
        self.resumed + self.stale + self.finished + self.failed
    }
}

impl TaskManager {
    /// 从持久化记录恢复上次未结束的任务
    ///
    /// 只有远端仍在进行中的任务会被恢复，其余记录一律清除。
    /// 已在本进程中轮询的任务会被跳过。
    pub async fn restore(&self) -> RestoreReport {
        let mut report = RestoreReport::default();
        let now_ms = Utc::now().timestamp_millis();
        let store = self.ctx.registry.store();

        for namespace in [Namespace::Batch, Namespace::Download] {
            let max_age_ms = match namespace {
                Namespace::Batch => self.ctx.timings.batch_staleness_ms,
                Namespace::Download => self.ctx.timings.download_staleness_ms,
            };

            for (task_id, record) in store.load_all(namespace) {
                if self.ctx.scheduler.is_attached(&task_id) || self.ctx.registry.contains(&task_id) {
                    debug!("任务 {} 已在运行，跳过恢复", task_id);
                    continue;
                }

                if record.is_older_than(now_ms, max_age_ms) {
                    debug!("任务记录 {} 已过期，清除", task_id);
                    store.evict(namespace, &task_id);
                    report.stale += 1;
                    continue;
                }

                let Some(class) = record.class() else {
                    store.evict(namespace, &task_id);
                    report.failed += 1;
                    continue;
                };

                match self.ctx.poll_status(class, record.remote_job_id()).await {
                    Ok(status) if status.state == RemoteState::InProgress => {
                        let resumed = match record {
                            PersistedRecord::Batch(record) => {
                                self.batch.resume(&task_id, record, status)
                            }
                            PersistedRecord::Download(record) => self
                                .downloads(record.download_type)
                                .resume(&task_id, record, status),
                        };
                        if resumed {
                            report.resumed += 1;
                        } else {
                            store.evict(namespace, &task_id);
                            report.failed += 1;
                        }
                    }
                    Ok(status) => {
                        debug!("任务 {} 远端已结束 ({:?})，清除记录", task_id, status.state);
                        store.evict(namespace, &task_id);
                        report.finished += 1;
                    }
                    Err(ApiError::NotFound(_)) => {
                        debug!("任务 {} 在远端不存在，清除记录", task_id);
                        store.evict(namespace, &task_id);
                        report.finished += 1;
                    }
                    Err(e) => {
                        warn!("恢复任务 {} 时查询失败，清除记录: {}", task_id, e);
                        store.evict(namespace, &task_id);
                        report.failed += 1;
                    }
                }
            }
        }

        if report.total() > 0 {
            info!(
                "任务恢复完成: 恢复 {}, 过期 {}, 已结束 {}, 失败 {}",
                report.resumed, report.stale, report.finished, report.failed
            );
        }
        report
    }
}
