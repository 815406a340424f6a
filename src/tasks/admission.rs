use std::sync::Arc;

use tracing::{debug, warn};

use super::registry::TaskRegistry;
use crate::common::api::JobEngine;

/// 一次准入检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub admitted: bool,
    pub required_bytes: u64,
}

/// 下载开始前的存储空间检查
///
/// 需求量是新下载的大小加上所有进行中下载尚未完成的部分，
/// 每次调用都从注册表现算，不缓存。
pub struct SpaceAdmissionController {
    engine: Arc<dyn JobEngine>,
    registry: Arc<TaskRegistry>,
}

impl SpaceAdmissionController {
    pub fn new(engine: Arc<dyn JobEngine>, registry: Arc<TaskRegistry>) -> Self {
        Self { engine, registry }
    }

    pub fn required_bytes(&self, candidate_bytes: u64) -> u64 {
        self.registry
            .downloads_in_flight()
            .iter()
            .fold(candidate_bytes, |acc, task| acc.saturating_add(task.remaining_bytes()))
    }

    pub async fn evaluate(&self, candidate_bytes: u64) -> AdmissionDecision {
        let required_bytes = self.required_bytes(candidate_bytes);
        let admitted = match self.engine.check_space_available(required_bytes).await {
            Ok(available) => available,
            Err(e) => {
                // 查询失败时放行
                warn!("存储空间查询失败，按可用处理 (需要 {} 字节): {}", required_bytes, e);
                true
            }
        };
        debug!("空间准入: 需要 {} 字节, 结果 {}", required_bytes, admitted);
        AdmissionDecision {
            admitted,
            required_bytes,
        }
    }

    pub async fn check_admission(&self, candidate_bytes: u64) -> bool {
        self.evaluate(candidate_bytes).await.admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::common::api::ApiError;
    use crate::common::api::models::{JobClass, JobRequest, JobStatusPayload, StartedJob};
    use crate::common::models::{ResourceId, Task, TaskKind, TaskState, TaskUpdate};
    use crate::tasks::store::{MemoryKvStore, PersistentTaskStore};

    /// 只实现空间查询，其余接口不会被调用
    struct SpaceOnly {
        available: Option<u64>,
        asked: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl JobEngine for SpaceOnly {
        async fn start_job(&self, _request: &JobRequest) -> Result<StartedJob, ApiError> {
            Err(ApiError::RetryLater)
        }
        async fn get_job_status(
            &self,
            _class: JobClass,
            _remote_job_id: &str,
        ) -> Result<JobStatusPayload, ApiError> {
            Err(ApiError::RetryLater)
        }
        async fn cancel_job(&self, _class: JobClass, _remote_job_id: &str) -> Result<(), ApiError> {
            Ok(())
        }
        async fn cleanup_job(&self, _class: JobClass, _remote_job_id: &str) -> Result<(), ApiError> {
            Ok(())
        }
        async fn get_resource_size(&self, _resource: &ResourceId) -> Result<u64, ApiError> {
            Ok(0)
        }
        async fn check_space_available(&self, bytes_required: u64) -> Result<bool, ApiError> {
            self.asked.lock().unwrap().push(bytes_required);
            match self.available {
                Some(available) => Ok(bytes_required <= available),
                None => Err(ApiError::RetryLater),
            }
        }
        async fn fetch_artifact(
            &self,
            _class: JobClass,
            _remote_job_id: &str,
            _dest: &Path,
        ) -> Result<u64, ApiError> {
            Ok(0)
        }
    }

    fn setup(available: Option<u64>) -> (Arc<SpaceOnly>, Arc<TaskRegistry>, SpaceAdmissionController) {
        let engine = Arc::new(SpaceOnly {
            available,
            asked: Mutex::new(Vec::new()),
        });
        let registry = Arc::new(TaskRegistry::new(Arc::new(PersistentTaskStore::new(Arc::new(
            MemoryKvStore::new(),
        )))));
        let controller = SpaceAdmissionController::new(engine.clone(), registry.clone());
        (engine, registry, controller)
    }

    fn download(id: &str, size: u64, percent: u8) -> Task {
        let mut task = Task::new(id, TaskKind::Downloading);
        task.resource_size = Some(size);
        task.progress_percent = percent;
        task.state = TaskState::InProgress;
        task
    }

    #[tokio::test]
    async fn admits_a_first_download_that_fits() {
        let (_, _, controller) = setup(Some(2_000_000));
        let decision = controller.evaluate(1_000_000).await;
        assert!(decision.admitted);
        assert_eq!(decision.required_bytes, 1_000_000);
    }

    #[tokio::test]
    async fn counts_the_remaining_part_of_active_downloads() {
        let (engine, registry, controller) = setup(Some(5_500_000));
        registry.insert(download("album-1", 2_000_000, 50));

        let decision = controller.evaluate(5_000_000).await;
        assert!(!decision.admitted);
        assert_eq!(decision.required_bytes, 6_000_000);
        assert_eq!(*engine.asked.lock().unwrap(), vec![6_000_000]);
    }

    #[tokio::test]
    async fn terminal_downloads_and_batches_are_ignored() {
        let (_, registry, controller) = setup(Some(0));
        registry.insert(download("album-1", 2_000_000, 10));
        registry.update("album-1", TaskUpdate::default().state(TaskState::CancelRequested));
        let mut batch = Task::new("add_files-1", TaskKind::Adding);
        batch.resource_size = Some(9_000);
        registry.insert(batch);

        assert_eq!(controller.required_bytes(100), 100);
    }

    #[tokio::test]
    async fn admits_when_the_space_query_fails() {
        let (_, _, controller) = setup(None);
        assert!(controller.check_admission(u64::MAX).await);
    }
}
