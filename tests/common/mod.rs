#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use vault_tasks::common::api::models::{
    BatchProgress, ExportProgress, JobClass, JobRequest, JobStatusPayload, RemoteState, StartedJob,
};
use vault_tasks::tasks::{MemoryKvStore, TaskManager, TaskTimings};
use vault_tasks::{ApiError, JobEngine, ResourceId};

/// 引擎收到的调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(JobClass),
    Status(JobClass, String),
    Cancel(JobClass, String),
    Cleanup(JobClass, String),
    Size(ResourceId),
    Space(u64),
    Fetch(JobClass, String),
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Payload(JobStatusPayload),
    NotFound,
    Unavailable,
}

#[derive(Default)]
struct MockState {
    next_job: u64,
    calls: Vec<Call>,
    sizes: HashMap<ResourceId, u64>,
    available: Option<u64>,
    space_fails: bool,
    size_fails: bool,
    cancel_fails: bool,
    start_total: Option<u64>,
    status_delay: Option<Duration>,
    fetch_delay: Option<Duration>,
    statuses: HashMap<String, VecDeque<Scripted>>,
}

/// 按脚本返回状态的任务引擎；每个远端任务的最后一条状态会一直重复
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                available: Some(u64::MAX),
                ..MockState::default()
            }),
        })
    }

    pub fn set_available(&self, bytes: u64) {
        self.state.lock().unwrap().available = Some(bytes);
    }

    pub fn fail_space_check(&self) {
        self.state.lock().unwrap().space_fails = true;
    }

    pub fn fail_size_query(&self) {
        self.state.lock().unwrap().size_fails = true;
    }

    pub fn fail_cancel(&self) {
        self.state.lock().unwrap().cancel_fails = true;
    }

    pub fn set_start_total(&self, total: Option<u64>) {
        self.state.lock().unwrap().start_total = total;
    }

    /// 状态查询在返回前等待 `delay`
    pub fn set_status_delay(&self, delay: Duration) {
        self.state.lock().unwrap().status_delay = Some(delay);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state.lock().unwrap().fetch_delay = Some(delay);
    }

    pub fn set_size(&self, resource: ResourceId, bytes: u64) {
        self.state.lock().unwrap().sizes.insert(resource, bytes);
    }

    pub fn script(&self, remote_job_id: &str, steps: Vec<Scripted>) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(remote_job_id.to_string(), steps.into());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

pub fn export(class: JobClass, status: RemoteState, progress: u8) -> Scripted {
    export_with(class, status, progress, None, None, None)
}

pub fn export_with(
    class: JobClass,
    status: RemoteState,
    progress: u8,
    completed: Option<u64>,
    total: Option<u64>,
    artifact_name: Option<&str>,
) -> Scripted {
    let progress = ExportProgress {
        status,
        progress,
        completed,
        total,
        artifact_name: artifact_name.map(str::to_string),
    };
    Scripted::Payload(match class {
        JobClass::AlbumExport => JobStatusPayload::AlbumExport(progress),
        JobClass::VaultExport => JobStatusPayload::VaultExport(progress),
        JobClass::AppDataExport => JobStatusPayload::AppDataExport(progress),
        JobClass::MetadataExport => JobStatusPayload::MetadataExport(progress),
        other => panic!("not an export class: {:?}", other),
    })
}

pub fn batch(class: JobClass, status: RemoteState, completed: u64, total: u64) -> Scripted {
    let progress = BatchProgress {
        status,
        completed,
        total,
    };
    Scripted::Payload(match class {
        JobClass::AddFiles => JobStatusPayload::AddFiles(progress),
        JobClass::DeleteAlbum => JobStatusPayload::DeleteAlbum(progress),
        other => panic!("not a batch class: {:?}", other),
    })
}

fn running(class: JobClass) -> Scripted {
    if class.is_download() {
        export(class, RemoteState::InProgress, 0)
    } else {
        batch(class, RemoteState::InProgress, 0, 0)
    }
}

#[async_trait]
impl JobEngine for MockEngine {
    async fn start_job(&self, request: &JobRequest) -> Result<StartedJob, ApiError> {
        let class = request.class();
        self.record(Call::Start(class));
        let mut state = self.state.lock().unwrap();
        state.next_job += 1;
        Ok(StartedJob {
            remote_job_id: format!("job-{}", state.next_job),
            total: state.start_total,
        })
    }

    async fn get_job_status(
        &self,
        class: JobClass,
        remote_job_id: &str,
    ) -> Result<JobStatusPayload, ApiError> {
        self.record(Call::Status(class, remote_job_id.to_string()));
        let delay = self.state.lock().unwrap().status_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        let step = match state.statuses.get_mut(remote_job_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
        .unwrap_or_else(|| running(class));

        match step {
            Scripted::Payload(payload) => Ok(payload),
            Scripted::NotFound => Err(ApiError::NotFound(remote_job_id.to_string())),
            Scripted::Unavailable => Err(ApiError::RetryLater),
        }
    }

    async fn cancel_job(&self, class: JobClass, remote_job_id: &str) -> Result<(), ApiError> {
        self.record(Call::Cancel(class, remote_job_id.to_string()));
        if self.state.lock().unwrap().cancel_fails {
            return Err(ApiError::RetryLater);
        }
        Ok(())
    }

    async fn cleanup_job(&self, class: JobClass, remote_job_id: &str) -> Result<(), ApiError> {
        self.record(Call::Cleanup(class, remote_job_id.to_string()));
        Ok(())
    }

    async fn get_resource_size(&self, resource: &ResourceId) -> Result<u64, ApiError> {
        self.record(Call::Size(*resource));
        let state = self.state.lock().unwrap();
        if state.size_fails {
            return Err(ApiError::RetryLater);
        }
        Ok(state.sizes.get(resource).copied().unwrap_or(1_000))
    }

    async fn check_space_available(&self, bytes_required: u64) -> Result<bool, ApiError> {
        self.record(Call::Space(bytes_required));
        let state = self.state.lock().unwrap();
        if state.space_fails {
            return Err(ApiError::RetryLater);
        }
        Ok(state.available.is_none_or(|available| bytes_required <= available))
    }

    async fn fetch_artifact(
        &self,
        class: JobClass,
        remote_job_id: &str,
        dest: &Path,
    ) -> Result<u64, ApiError> {
        self.record(Call::Fetch(class, remote_job_id.to_string()));
        let delay = self.state.lock().unwrap().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let body = format!("artifact of {}", remote_job_id);
        tokio::fs::write(dest, body.as_bytes()).await?;
        Ok(body.len() as u64)
    }
}

pub fn manager(engine: &Arc<MockEngine>) -> (TaskManager, Arc<MemoryKvStore>) {
    let kv = Arc::new(MemoryKvStore::new());
    (manager_with_store(engine, kv.clone()), kv)
}

pub fn shared_manager(engine: &Arc<MockEngine>) -> Arc<TaskManager> {
    Arc::new(manager_with_store(engine, Arc::new(MemoryKvStore::new())))
}

pub fn manager_with_store(engine: &Arc<MockEngine>, kv: Arc<MemoryKvStore>) -> TaskManager {
    TaskManager::new(engine.clone(), kv, TaskTimings::default())
}

/// 推进虚拟时间
pub async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
