use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use super::admission::SpaceAdmissionController;
use super::registry::TaskRegistry;
use super::scheduler::PollingScheduler;
use super::store::{KvStore, PersistentTaskStore};
use super::timings::TaskTimings;
use crate::common::api::models::{JobClass, JobStatus};
use crate::common::api::{ApiError, JobEngine};
use crate::downloader::mapping::DownloadMappings;

/// 各编排器共享的协作对象
pub struct TaskContext {
    pub engine: Arc<dyn JobEngine>,
    pub registry: Arc<TaskRegistry>,
    pub scheduler: Arc<PollingScheduler>,
    pub mappings: Arc<DownloadMappings>,
    pub admission: SpaceAdmissionController,
    pub timings: TaskTimings,
}

impl TaskContext {
    pub fn new(engine: Arc<dyn JobEngine>, kv: Arc<dyn KvStore>, timings: TaskTimings) -> Arc<Self> {
        let store = Arc::new(PersistentTaskStore::new(kv));
        let registry = Arc::new(TaskRegistry::new(store));
        let admission = SpaceAdmissionController::new(Arc::clone(&engine), Arc::clone(&registry));
        Arc::new(Self {
            engine,
            registry,
            scheduler: Arc::new(PollingScheduler::new()),
            mappings: Arc::new(DownloadMappings::new()),
            admission,
            timings,
        })
    }

    /// `<class>-<uuid>`，每个任务生命周期唯一
    pub fn new_task_id(class: JobClass) -> String {
        format!("{}-{}", class.as_str(), Uuid::new_v4())
    }

    /// 查询并校验远端状态
    pub async fn poll_status(&self, class: JobClass, remote_job_id: &str) -> Result<JobStatus, ApiError> {
        self.engine
            .get_job_status(class, remote_job_id)
            .await?
            .into_status(class)
    }

    /// 延迟后从注册表移除任务
    pub fn schedule_removal(&self, task_id: &str, delay: Duration) {
        let registry = Arc::clone(&self.registry);
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.remove(&task_id).is_some() {
                debug!("已移除结束的任务: {}", task_id);
            }
        });
    }

    /// 延迟后请求服务端清理产物，失败只记日志
    pub fn schedule_cleanup(&self, class: JobClass, remote_job_id: &str, delay: Duration) {
        let engine = Arc::clone(&self.engine);
        let remote_job_id = remote_job_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match engine.cleanup_job(class, &remote_job_id).await {
                Ok(()) => debug!("已清理远端任务: {} [{}]", remote_job_id, class.as_str()),
                Err(e) => warn!("清理远端任务失败 {} [{}]: {}", remote_job_id, class.as_str(), e),
            }
        });
    }
}
