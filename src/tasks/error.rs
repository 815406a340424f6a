use thiserror::Error;

use crate::common::api::ApiError;
use crate::common::models::ResourceId;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("远端请求失败: {0}")]
    Api(#[from] ApiError),

    #[error("资源 {0} 已有进行中的下载")]
    AlreadyActive(ResourceId),

    #[error("存储空间不足: 需要 {required_bytes} 字节")]
    InsufficientSpace { required_bytes: u64 },

    #[error("无效的请求: {0}")]
    InvalidRequest(String),

    #[error("任务未找到: {0}")]
    TaskNotFound(String),

    #[error("任务 {0} 没有可下载的产物")]
    ArtifactUnavailable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化失败: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("存储锁定失败")]
    Lock,
}
