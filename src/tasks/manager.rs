use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;

use super::context::TaskContext;
use super::error::TaskError;
use super::registry::{TaskEvent, TaskRegistry};
use super::store::{KvStore, Namespace, PersistedRecord};
use super::timings::TaskTimings;
use crate::batch::{BatchJobOrchestrator, BatchOp, SuccessCallback};
use crate::common::api::JobEngine;
use crate::common::models::{DownloadType, ProgressEntry, ResourceId, Task};
use crate::downloader::DownloadOrchestrator;

/// 后台任务子系统的唯一入口
pub struct TaskManager {
    pub(crate) ctx: Arc<TaskContext>,
    album: DownloadOrchestrator,
    vault: DownloadOrchestrator,
    app_data: DownloadOrchestrator,
    metadata: DownloadOrchestrator,
    pub(crate) batch: BatchJobOrchestrator,
}

impl TaskManager {
    pub fn new(engine: Arc<dyn JobEngine>, kv: Arc<dyn KvStore>, timings: TaskTimings) -> Self {
        let ctx = TaskContext::new(engine, kv, timings);
        Self {
            album: DownloadOrchestrator::new(Arc::clone(&ctx), DownloadType::Album),
            vault: DownloadOrchestrator::new(Arc::clone(&ctx), DownloadType::Vault),
            app_data: DownloadOrchestrator::new(Arc::clone(&ctx), DownloadType::AppData),
            metadata: DownloadOrchestrator::new(Arc::clone(&ctx), DownloadType::Metadata),
            batch: BatchJobOrchestrator::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    pub fn downloads(&self, download_type: DownloadType) -> &DownloadOrchestrator {
        match download_type {
            DownloadType::Album => &self.album,
            DownloadType::Vault => &self.vault,
            DownloadType::AppData => &self.app_data,
            DownloadType::Metadata => &self.metadata,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.ctx.registry
    }

    pub fn timings(&self) -> &TaskTimings {
        &self.ctx.timings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.ctx.registry.subscribe()
    }

    pub fn progress_entries(&self) -> Vec<ProgressEntry> {
        self.ctx.registry.progress_entries()
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.ctx.registry.get(task_id)
    }

    /// 当前的轮询定时器数量
    pub fn active_pollers(&self) -> usize {
        self.ctx.scheduler.active_count()
    }

    // 下载

    pub async fn start_download(&self, resource: ResourceId, resource_name: &str) -> Result<String, TaskError> {
        self.downloads(resource.download_type())
            .start(resource, resource_name)
            .await
    }

    pub fn cancel_download(&self, resource: &ResourceId) -> bool {
        self.downloads(resource.download_type()).cancel(resource)
    }

    pub fn has_active_download(&self, resource: &ResourceId) -> bool {
        self.downloads(resource.download_type()).has_active(resource)
    }

    pub fn cancel_all_downloads(&self) -> usize {
        [&self.album, &self.vault, &self.app_data, &self.metadata]
            .iter()
            .map(|orchestrator| orchestrator.cancel_all())
            .sum()
    }

    pub async fn start_album_download(&self, album_id: u64, album_name: &str) -> Result<String, TaskError> {
        self.album.start(ResourceId::Album(album_id), album_name).await
    }

    pub fn cancel_album_download(&self, album_id: u64) -> bool {
        self.album.cancel(&ResourceId::Album(album_id))
    }

    pub fn has_active_album_download(&self, album_id: u64) -> bool {
        self.album.has_active(&ResourceId::Album(album_id))
    }

    pub async fn start_vault_download(&self) -> Result<String, TaskError> {
        self.vault
            .start(ResourceId::Vault, DownloadType::Vault.display_name())
            .await
    }

    pub fn cancel_vault_download(&self) -> bool {
        self.vault.cancel(&ResourceId::Vault)
    }

    pub fn has_active_vault_download(&self) -> bool {
        self.vault.has_active(&ResourceId::Vault)
    }

    pub async fn start_app_data_download(&self) -> Result<String, TaskError> {
        self.app_data
            .start(ResourceId::AppData, DownloadType::AppData.display_name())
            .await
    }

    pub fn cancel_app_data_download(&self) -> bool {
        self.app_data.cancel(&ResourceId::AppData)
    }

    pub fn has_active_app_data_download(&self) -> bool {
        self.app_data.has_active(&ResourceId::AppData)
    }

    pub async fn start_metadata_download(&self) -> Result<String, TaskError> {
        self.metadata
            .start(ResourceId::Metadata, DownloadType::Metadata.display_name())
            .await
    }

    pub fn cancel_metadata_download(&self) -> bool {
        self.metadata.cancel(&ResourceId::Metadata)
    }

    pub fn has_active_metadata_download(&self) -> bool {
        self.metadata.has_active(&ResourceId::Metadata)
    }

    /// 保存已完成下载的产物
    pub async fn fetch_artifact(&self, task_id: &str, dest_dir: &Path) -> Result<PathBuf, TaskError> {
        let download_type = self
            .ctx
            .registry
            .get(task_id)
            .and_then(|task| task.download_type)
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
        self.downloads(download_type)
            .fetch_artifact(task_id, dest_dir)
            .await
    }

    // 批量任务

    pub async fn add_files_to_album(
        &self,
        album_id: u64,
        file_ids: Vec<String>,
        on_success: Option<SuccessCallback>,
    ) -> Result<String, TaskError> {
        self.batch.add_files(album_id, file_ids, on_success).await
    }

    pub fn has_active_add_files(&self, album_id: u64) -> bool {
        self.batch.has_active(BatchOp::AddFiles, album_id)
    }

    pub async fn delete_album(
        &self,
        album_id: u64,
        delete_files: bool,
        on_success: Option<SuccessCallback>,
    ) -> Result<String, TaskError> {
        self.batch.delete_album(album_id, delete_files, on_success).await
    }

    pub fn has_active_delete_album(&self, album_id: u64) -> bool {
        self.batch.has_active(BatchOp::DeleteAlbum, album_id)
    }

    /// 已持久化的任务记录，不访问远端
    pub fn pending_records(&self) -> Vec<(String, PersistedRecord)> {
        let store = self.ctx.registry.store();
        let mut records = store.load_all(Namespace::Batch);
        records.extend(store.load_all(Namespace::Download));
        records
    }

    /// 停止全部轮询；已持久化的记录保留，下次启动时恢复
    pub fn shutdown(&self) {
        self.ctx.scheduler.detach_all();
    }
}
