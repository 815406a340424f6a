use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{BatchLabels, BatchOp, SuccessCallback};
use crate::common::api::ApiError;
use crate::common::api::models::{JobRequest, JobStatus, RemoteState};
use crate::common::models::{ResourceId, Task, TaskState, TaskUpdate};
use crate::tasks::context::TaskContext;
use crate::tasks::error::TaskError;
use crate::tasks::scheduler::{TickFlow, TickHandler};
use crate::tasks::store::{BatchRecord, Namespace};
use crate::tasks::timings::millis;

pub struct BatchJobOrchestrator {
    ctx: Arc<TaskContext>,
}

impl BatchJobOrchestrator {
    pub fn new(ctx: Arc<TaskContext>) -> Self {
        Self { ctx }
    }

    /// 向相册添加文件
    pub async fn add_files(
        &self,
        album_id: u64,
        file_ids: Vec<String>,
        on_success: Option<SuccessCallback>,
    ) -> Result<String, TaskError> {
        if file_ids.is_empty() {
            return Err(TaskError::InvalidRequest("没有要添加的文件".to_string()));
        }
        let count = file_ids.len() as u64;
        self.start(
            BatchOp::AddFiles,
            album_id,
            JobRequest::AddFiles { album_id, file_ids },
            count,
            on_success,
        )
        .await
    }

    /// 删除相册，`delete_files` 为真时同时删除其中的文件
    pub async fn delete_album(
        &self,
        album_id: u64,
        delete_files: bool,
        on_success: Option<SuccessCallback>,
    ) -> Result<String, TaskError> {
        self.start(
            BatchOp::DeleteAlbum,
            album_id,
            JobRequest::DeleteAlbum {
                album_id,
                delete_files,
            },
            0,
            on_success,
        )
        .await
    }

    async fn start(
        &self,
        op: BatchOp,
        album_id: u64,
        request: JobRequest,
        fallback_total: u64,
        on_success: Option<SuccessCallback>,
    ) -> Result<String, TaskError> {
        let started = self.ctx.engine.start_job(&request).await?;
        let task_id = TaskContext::new_task_id(op.class());

        let mut task = Task::new(&task_id, op.kind());
        task.label = op.labels().started.to_string();
        task.remote_job_id = started.remote_job_id.clone();
        task.total = started.total.unwrap_or(fallback_total);
        task.resource_id = Some(ResourceId::Album(album_id));
        self.ctx.registry.insert(task);

        self.attach(&task_id, op, &started.remote_job_id, on_success);
        info!(
            "开始批量任务 {} (相册 {}), 远端 {}",
            task_id, album_id, started.remote_job_id
        );
        Ok(task_id)
    }

    fn attach(
        &self,
        task_id: &str,
        op: BatchOp,
        remote_job_id: &str,
        on_success: Option<SuccessCallback>,
    ) {
        let ticker = Arc::new(BatchTicker {
            ctx: Arc::clone(&self.ctx),
            task_id: task_id.to_string(),
            remote_job_id: remote_job_id.to_string(),
            op,
            on_success: Mutex::new(on_success),
        });
        self.ctx
            .scheduler
            .attach(task_id, remote_job_id, self.ctx.timings.batch_policy(), ticker);
    }

    /// 相册上是否有进行中的同类任务
    pub fn has_active(&self, op: BatchOp, album_id: u64) -> bool {
        self.ctx
            .registry
            .find(|task| {
                task.kind == op.kind()
                    && task.resource_id == Some(ResourceId::Album(album_id))
                    && task.state.is_in_flight()
            })
            .is_some()
    }

    /// 恢复远端仍在进行的批量任务；恢复后的任务没有成功回调
    pub(crate) fn resume(&self, task_id: &str, record: BatchRecord, status: JobStatus) -> bool {
        let Some(op) = BatchOp::from_kind(record.kind) else {
            return false;
        };

        let total = if status.total > 0 { status.total } else { record.total };
        let labels = op.labels();

        let mut task = Task::new(task_id, record.kind);
        task.label = if total > 0 {
            labels.progress(status.completed, total)
        } else {
            record.label.clone()
        };
        task.state = TaskState::InProgress;
        task.current = if total > 0 {
            status.completed.min(total)
        } else {
            status.completed
        };
        task.total = total;
        task.progress_percent = status.progress;
        task.remote_job_id = record.remote_job_id.clone();
        task.resource_id = record.album_id.map(ResourceId::Album);
        task.created_at = record.timestamp_created;
        self.ctx.registry.insert(task);

        self.attach(task_id, op, &record.remote_job_id, None);
        info!("已恢复批量任务 {}", task_id);
        true
    }
}

struct BatchTicker {
    ctx: Arc<TaskContext>,
    task_id: String,
    remote_job_id: String,
    op: BatchOp,
    on_success: Mutex<Option<SuccessCallback>>,
}

impl BatchTicker {
    fn labels(&self) -> &'static BatchLabels {
        self.op.labels()
    }

    fn apply_progress(&self, status: &JobStatus) -> TickFlow {
        let Some(task) = self.ctx.registry.get(&self.task_id) else {
            debug!("任务 {} 已不存在，停止轮询", self.task_id);
            return TickFlow::Finished;
        };

        let total = if status.total > 0 { status.total } else { task.total };
        let mut current = task.current.max(status.completed);
        if total > 0 {
            current = current.min(total);
        }
        let percent = if total > 0 {
            (current as u128 * 100 / total as u128) as u8
        } else {
            status.progress
        };

        self.ctx.registry.update(
            &self.task_id,
            TaskUpdate::default()
                .state(TaskState::InProgress)
                .label(self.labels().progress(current, total))
                .progress(current, total, percent),
        );
        TickFlow::Continue
    }

    fn take_callback(&self) -> Option<SuccessCallback> {
        match self.on_success.lock() {
            Ok(mut callback) => callback.take(),
            Err(_) => None,
        }
    }
}

#[async_trait]
impl TickHandler for BatchTicker {
    async fn poll(&self) -> Result<JobStatus, ApiError> {
        self.ctx.poll_status(self.op.class(), &self.remote_job_id).await
    }

    fn on_status(&self, status: JobStatus) -> TickFlow {
        match status.state {
            RemoteState::InProgress => self.apply_progress(&status),
            RemoteState::Completed => {
                let total = self
                    .ctx
                    .registry
                    .get(&self.task_id)
                    .map(|task| status.total.max(task.total))
                    .unwrap_or(status.total);
                self.ctx.registry.update(
                    &self.task_id,
                    TaskUpdate::default()
                        .state(TaskState::Completed)
                        .label(self.labels().completed)
                        .progress(total, total, 100),
                );
                self.ctx.registry.store().evict(Namespace::Batch, &self.task_id);
                info!("批量任务完成: {}", self.task_id);

                // 回调结束后才开始移除倒计时
                let callback = self.take_callback();
                let ctx = Arc::clone(&self.ctx);
                let task_id = self.task_id.clone();
                tokio::spawn(async move {
                    if let Some(callback) = callback {
                        callback().await;
                    }
                    ctx.schedule_removal(&task_id, millis(ctx.timings.batch_success_removal_ms));
                });
                TickFlow::Finished
            }
            RemoteState::Failed | RemoteState::Cancelled => {
                self.ctx.registry.update(
                    &self.task_id,
                    TaskUpdate::default()
                        .state(TaskState::Failed)
                        .label(self.labels().failed),
                );
                self.ctx.registry.store().evict(Namespace::Batch, &self.task_id);
                self.ctx.schedule_removal(
                    &self.task_id,
                    millis(self.ctx.timings.batch_failure_removal_ms),
                );
                warn!("批量任务失败: {} (远端状态 {:?})", self.task_id, status.state);
                TickFlow::Finished
            }
        }
    }

    fn on_ceiling(&self) {
        self.ctx.registry.remove(&self.task_id);
    }
}
