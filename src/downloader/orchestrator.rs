use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::mapping::DownloadMapping;
use crate::common::api::ApiError;
use crate::common::api::models::{JobClass, JobRequest, JobStatus, RemoteState};
use crate::common::models::{DownloadType, ResourceId, Task, TaskKind, TaskState, TaskUpdate};
use crate::tasks::context::TaskContext;
use crate::tasks::error::TaskError;
use crate::tasks::scheduler::{TickFlow, TickHandler};
use crate::tasks::store::{DownloadRecord, Namespace};
use crate::tasks::timings::millis;

pub const CANCELLED_LABEL: &str = "Download cancelled";

fn preparing_label(name: &str) -> String {
    format!("Preparing {}…", name)
}

fn progress_label(name: &str, percent: u8) -> String {
    format!("Preparing {} ({}%)", name, percent)
}

fn ready_label(name: &str) -> String {
    format!("{} ready", name)
}

fn failed_label(name: &str) -> String {
    format!("{} download failed", name)
}

/// 一个下载类别的完整生命周期：启动、轮询、结束、清理与移除
pub struct DownloadOrchestrator {
    ctx: Arc<TaskContext>,
    download_type: DownloadType,
}

impl DownloadOrchestrator {
    pub fn new(ctx: Arc<TaskContext>, download_type: DownloadType) -> Self {
        Self { ctx, download_type }
    }

    pub fn download_type(&self) -> DownloadType {
        self.download_type
    }

    fn class(&self) -> JobClass {
        JobClass::for_download(self.download_type)
    }

    fn check_resource(&self, resource: &ResourceId) -> Result<(), TaskError> {
        if resource.download_type() != self.download_type {
            return Err(TaskError::InvalidRequest(format!(
                "资源 {} 不属于 {} 下载",
                resource,
                self.download_type.as_str()
            )));
        }
        Ok(())
    }

    /// 开始下载，返回新任务的 ID
    pub async fn start(&self, resource: ResourceId, resource_name: &str) -> Result<String, TaskError> {
        self.check_resource(&resource)?;

        // 占位失败时不会发出任何远端请求
        let reservation = self.ctx.mappings.reserve(resource)?;

        let size = self.ctx.engine.get_resource_size(&resource).await?;
        let decision = self.ctx.admission.evaluate(size).await;
        if !decision.admitted {
            warn!(
                "存储空间不足，拒绝下载 {}: 需要 {} 字节",
                resource, decision.required_bytes
            );
            return Err(TaskError::InsufficientSpace {
                required_bytes: decision.required_bytes,
            });
        }

        let started = self.ctx.engine.start_job(&JobRequest::Export(resource)).await?;
        let task_id = TaskContext::new_task_id(self.class());

        let mut task = Task::new(&task_id, TaskKind::Downloading);
        task.label = preparing_label(resource_name);
        task.remote_job_id = started.remote_job_id.clone();
        task.resource_size = Some(size);
        task.total = started.total.unwrap_or(0);
        task.resource_id = Some(resource);
        task.resource_name = Some(resource_name.to_string());
        task.download_type = Some(self.download_type);
        self.ctx.registry.insert(task);

        reservation.commit(&started.remote_job_id, &task_id);
        self.attach(&task_id, resource, resource_name, &started.remote_job_id);

        info!(
            "开始下载 {} ({}), 任务 {}, 远端 {}, 大小 {} 字节",
            resource_name, resource, task_id, started.remote_job_id, size
        );
        Ok(task_id)
    }

    fn attach(&self, task_id: &str, resource: ResourceId, resource_name: &str, remote_job_id: &str) {
        let ticker = Arc::new(DownloadTicker {
            ctx: Arc::clone(&self.ctx),
            task_id: task_id.to_string(),
            remote_job_id: remote_job_id.to_string(),
            resource,
            resource_name: resource_name.to_string(),
            class: self.class(),
        });
        self.ctx
            .scheduler
            .attach(task_id, remote_job_id, self.ctx.timings.download_policy(), ticker);
    }

    /// 取消下载；本地状态立即更新，不等待远端确认
    pub fn cancel(&self, resource: &ResourceId) -> bool {
        if resource.download_type() != self.download_type {
            return false;
        }
        let Some(DownloadMapping {
            remote_job_id: Some(remote_job_id),
            task_id: Some(task_id),
            ..
        }) = self.ctx.mappings.remove_committed(resource)
        else {
            debug!("没有可取消的下载: {}", resource);
            return false;
        };

        self.ctx.scheduler.detach(&task_id);
        self.ctx.registry.update(
            &task_id,
            TaskUpdate::default()
                .state(TaskState::CancelRequested)
                .label(CANCELLED_LABEL),
        );
        self.ctx.registry.store().evict(Namespace::Download, &task_id);

        let class = self.class();
        let engine = Arc::clone(&self.ctx.engine);
        let registry = Arc::clone(&self.ctx.registry);
        let remote = remote_job_id.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            match engine.cancel_job(class, &remote).await {
                Ok(()) => {
                    registry.update_if(
                        &id,
                        |task| task.state == TaskState::CancelRequested,
                        TaskUpdate::default().state(TaskState::Cancelled),
                    );
                    debug!("远端已确认取消: {}", remote);
                }
                Err(e) => warn!("取消远端任务失败 {}: {}", remote, e),
            }
        });

        let timings = &self.ctx.timings;
        self.ctx
            .schedule_cleanup(class, &remote_job_id, millis(timings.cleanup_delay_ms));
        self.ctx
            .schedule_removal(&task_id, millis(timings.download_cancel_removal_ms));

        info!("已取消下载 {} (任务 {})", resource, task_id);
        true
    }

    /// 取消本类别全部下载，返回取消的数量
    pub fn cancel_all(&self) -> usize {
        self.active_resources()
            .iter()
            .filter(|resource| self.cancel(resource))
            .count()
    }

    pub fn has_active(&self, resource: &ResourceId) -> bool {
        self.ctx.mappings.contains(resource)
    }

    pub fn active_resources(&self) -> Vec<ResourceId> {
        self.ctx.mappings.resources(self.download_type)
    }

    /// 恢复一个远端仍在进行的下载；资源已被其他任务占用时返回 false
    pub(crate) fn resume(&self, task_id: &str, record: DownloadRecord, status: JobStatus) -> bool {
        if self.check_resource(&record.resource_id).is_err() {
            return false;
        }
        if !self
            .ctx
            .mappings
            .restore(record.resource_id, &record.remote_job_id, task_id)
        {
            warn!(
                "资源 {} 已有其他下载，放弃恢复任务 {}",
                record.resource_id, task_id
            );
            return false;
        }

        let mut task = Task::new(task_id, TaskKind::Downloading);
        task.label = progress_label(&record.resource_name, status.progress);
        task.state = TaskState::InProgress;
        task.total = status.total;
        task.current = status.completed;
        task.progress_percent = status.progress;
        task.remote_job_id = record.remote_job_id.clone();
        task.resource_size = record.resource_size;
        task.resource_id = Some(record.resource_id);
        task.resource_name = Some(record.resource_name.clone());
        task.download_type = Some(self.download_type);
        task.created_at = record.timestamp_created;
        self.ctx.registry.insert(task);

        self.attach(
            task_id,
            record.resource_id,
            &record.resource_name,
            &record.remote_job_id,
        );
        info!("已恢复下载 {} (任务 {})", record.resource_id, task_id);
        true
    }

    /// 把已完成下载的产物保存到 `dest_dir`
    pub async fn fetch_artifact(&self, task_id: &str, dest_dir: &Path) -> Result<PathBuf, TaskError> {
        let task = self
            .ctx
            .registry
            .get(task_id)
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
        if task.state != TaskState::Completed || task.download_type != Some(self.download_type) {
            return Err(TaskError::ArtifactUnavailable(task_id.to_string()));
        }

        let file_name = task
            .artifact_name
            .as_deref()
            .and_then(|name| Path::new(name).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.zip", task.remote_job_id));

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(ApiError::from)?;
        let dest = dest_dir.join(file_name);
        let written = self
            .ctx
            .engine
            .fetch_artifact(self.class(), &task.remote_job_id, &dest)
            .await?;
        info!("已保存 {:?} ({} 字节)", dest, written);
        Ok(dest)
    }
}

struct DownloadTicker {
    ctx: Arc<TaskContext>,
    task_id: String,
    remote_job_id: String,
    resource: ResourceId,
    resource_name: String,
    class: JobClass,
}

impl DownloadTicker {
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
        let percent = task.progress_percent.max(status.progress);

        let applied = self.ctx.registry.update_if(
            &self.task_id,
            |task| task.state.is_in_flight(),
            TaskUpdate::default()
                .state(TaskState::InProgress)
                .label(progress_label(&self.resource_name, percent))
                .progress(current, total, percent),
        );
        if applied {
            TickFlow::Continue
        } else {
            debug!("任务 {} 已不在进行中，停止轮询", self.task_id);
            TickFlow::Finished
        }
    }

    /// 写入终态；任务已被本地取消或移除时返回 false，不覆盖其状态
    fn finish(&self, update: TaskUpdate) -> bool {
        let applied = self
            .ctx
            .registry
            .update_if(&self.task_id, |task| task.state.is_in_flight(), update);
        self.ctx.mappings.remove_if_task(&self.resource, &self.task_id);
        self.ctx.registry.store().evict(Namespace::Download, &self.task_id);
        applied
    }

    fn confirm_cancel(&self) {
        self.ctx.registry.update_if(
            &self.task_id,
            |task| task.state == TaskState::CancelRequested,
            TaskUpdate::default().state(TaskState::Cancelled),
        );
    }
}

#[async_trait]
impl TickHandler for DownloadTicker {
    async fn poll(&self) -> Result<JobStatus, ApiError> {
        self.ctx.poll_status(self.class, &self.remote_job_id).await
    }

    fn on_status(&self, status: JobStatus) -> TickFlow {
        let timings = &self.ctx.timings;
        match status.state {
            RemoteState::InProgress => self.apply_progress(&status),
            RemoteState::Completed => {
                let total = self
                    .ctx
                    .registry
                    .get(&self.task_id)
                    .map(|task| status.total.max(task.total))
                    .unwrap_or(status.total);
                let mut update = TaskUpdate::default()
                    .state(TaskState::Completed)
                    .label(ready_label(&self.resource_name))
                    .progress(total, total, 100);
                update.artifact_name = status.artifact_name;
                if !self.finish(update) {
                    return TickFlow::Finished;
                }
                self.ctx
                    .schedule_removal(&self.task_id, millis(timings.download_success_removal_ms));
                info!("下载已就绪: {} (任务 {})", self.resource_name, self.task_id);
                TickFlow::Finished
            }
            RemoteState::Failed => {
                if !self.finish(
                    TaskUpdate::default()
                        .state(TaskState::Failed)
                        .label(failed_label(&self.resource_name)),
                ) {
                    return TickFlow::Finished;
                }
                self.ctx
                    .schedule_cleanup(self.class, &self.remote_job_id, millis(timings.cleanup_delay_ms));
                self.ctx
                    .schedule_removal(&self.task_id, millis(timings.download_failure_removal_ms));
                warn!("下载失败: {} (任务 {})", self.resource_name, self.task_id);
                TickFlow::Finished
            }
            RemoteState::Cancelled => {
                if !self.finish(
                    TaskUpdate::default()
                        .state(TaskState::Cancelled)
                        .label(CANCELLED_LABEL),
                ) {
                    // 本地取消在先，远端结果只用来确认
                    self.confirm_cancel();
                    return TickFlow::Finished;
                }
                self.ctx
                    .schedule_cleanup(self.class, &self.remote_job_id, millis(timings.cleanup_delay_ms));
                self.ctx
                    .schedule_removal(&self.task_id, millis(timings.download_cancel_removal_ms));
                info!("远端已取消下载: {} (任务 {})", self.resource_name, self.task_id);
                TickFlow::Finished
            }
        }
    }

    fn on_late_status(&self, status: JobStatus) {
        if status.state == RemoteState::Cancelled {
            self.confirm_cancel();
        }
    }

    fn on_ceiling(&self) {
        self.ctx.registry.remove(&self.task_id);
        self.ctx.mappings.remove_if_task(&self.resource, &self.task_id);
    }
}
