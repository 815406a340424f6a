use std::path::Path;

use async_trait::async_trait;

use super::error::ApiError;
use super::models::{JobClass, JobRequest, JobStatusPayload, StartedJob};
use crate::common::models::ResourceId;

/// 远端任务引擎的边界
///
/// 客户端只负责启动、轮询、取消和清理远端任务，真正的文件处理都在服务端完成。
#[async_trait]
pub trait JobEngine: Send + Sync {
    async fn start_job(&self, request: &JobRequest) -> Result<StartedJob, ApiError>;

    async fn get_job_status(
        &self,
        class: JobClass,
        remote_job_id: &str,
    ) -> Result<JobStatusPayload, ApiError>;

    async fn cancel_job(&self, class: JobClass, remote_job_id: &str) -> Result<(), ApiError>;

    /// 删除服务端生成的产物
    async fn cleanup_job(&self, class: JobClass, remote_job_id: &str) -> Result<(), ApiError>;

    /// 资源打包前的字节数
    async fn get_resource_size(&self, resource: &ResourceId) -> Result<u64, ApiError>;

    async fn check_space_available(&self, bytes_required: u64) -> Result<bool, ApiError>;

    /// 把已完成任务的产物写到 `dest`，返回写入的字节数
    async fn fetch_artifact(
        &self,
        class: JobClass,
        remote_job_id: &str,
        dest: &Path,
    ) -> Result<u64, ApiError>;
}
