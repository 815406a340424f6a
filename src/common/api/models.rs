use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::common::models::{DownloadType, ResourceId, TaskKind};

/// 远端任务引擎上的任务类别，对应不同的接口路径
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobClass {
    AddFiles,
    DeleteAlbum,
    AlbumExport,
    VaultExport,
    AppDataExport,
    MetadataExport,
}

impl JobClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobClass::AddFiles => "add_files",
            JobClass::DeleteAlbum => "delete_album",
            JobClass::AlbumExport => "album_export",
            JobClass::VaultExport => "vault_export",
            JobClass::AppDataExport => "app_data_export",
            JobClass::MetadataExport => "metadata_export",
        }
    }

    pub fn for_download(download_type: DownloadType) -> Self {
        match download_type {
            DownloadType::Album => JobClass::AlbumExport,
            DownloadType::Vault => JobClass::VaultExport,
            DownloadType::AppData => JobClass::AppDataExport,
            DownloadType::Metadata => JobClass::MetadataExport,
        }
    }

    /// 批量任务类别；下载类别返回 None
    pub fn for_batch(kind: TaskKind) -> Option<Self> {
        match kind {
            TaskKind::Adding => Some(JobClass::AddFiles),
            TaskKind::Deleting => Some(JobClass::DeleteAlbum),
            TaskKind::Downloading => None,
        }
    }

    pub fn is_download(&self) -> bool {
        !matches!(self, JobClass::AddFiles | JobClass::DeleteAlbum)
    }
}

/// 启动远端任务的请求参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    AddFiles { album_id: u64, file_ids: Vec<String> },
    DeleteAlbum { album_id: u64, delete_files: bool },
    Export(ResourceId),
}

impl JobRequest {
    pub fn class(&self) -> JobClass {
        match self {
            JobRequest::AddFiles { .. } => JobClass::AddFiles,
            JobRequest::DeleteAlbum { .. } => JobClass::DeleteAlbum,
            JobRequest::Export(resource) => JobClass::for_download(resource.download_type()),
        }
    }

    /// 请求体
    pub fn body(&self) -> serde_json::Value {
        match self {
            JobRequest::AddFiles { album_id, file_ids } => serde_json::json!({
                "album_id": album_id,
                "file_ids": file_ids,
            }),
            JobRequest::DeleteAlbum {
                album_id,
                delete_files,
            } => serde_json::json!({
                "album_id": album_id,
                "delete_files": delete_files,
            }),
            JobRequest::Export(ResourceId::Album(album_id)) => serde_json::json!({
                "album_id": album_id,
            }),
            JobRequest::Export(_) => serde_json::json!({}),
        }
    }
}

/// 启动接口的响应
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StartedJob {
    #[serde(rename = "job_id")]
    pub remote_job_id: String,
    #[serde(default)]
    pub total: Option<u64>,
}

/// 远端报告的任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    #[serde(alias = "pending", alias = "queued", alias = "running")]
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchProgress {
    pub status: RemoteState,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExportProgress {
    pub status: RemoteState,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub artifact_name: Option<String>,
}

/// 状态接口的原始响应，按任务类别区分结构
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobStatusPayload {
    AddFiles(BatchProgress),
    DeleteAlbum(BatchProgress),
    AlbumExport(ExportProgress),
    VaultExport(ExportProgress),
    AppDataExport(ExportProgress),
    MetadataExport(ExportProgress),
}

/// 校验后的统一状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: RemoteState,
    pub completed: u64,
    pub total: u64,
    pub progress: u8,
    pub artifact_name: Option<String>,
}

impl JobStatusPayload {
    pub fn class(&self) -> JobClass {
        match self {
            JobStatusPayload::AddFiles(_) => JobClass::AddFiles,
            JobStatusPayload::DeleteAlbum(_) => JobClass::DeleteAlbum,
            JobStatusPayload::AlbumExport(_) => JobClass::AlbumExport,
            JobStatusPayload::VaultExport(_) => JobClass::VaultExport,
            JobStatusPayload::AppDataExport(_) => JobClass::AppDataExport,
            JobStatusPayload::MetadataExport(_) => JobClass::MetadataExport,
        }
    }

    /// 校验响应与所查询的任务类别一致，并转换为统一状态
    pub fn into_status(self, expected: JobClass) -> Result<JobStatus, ApiError> {
        if self.class() != expected {
            return Err(ApiError::InvalidResponse(format!(
                "任务类别不匹配: 期望 {}, 实际 {}",
                expected.as_str(),
                self.class().as_str()
            )));
        }

        match self {
            JobStatusPayload::AddFiles(batch) | JobStatusPayload::DeleteAlbum(batch) => {
                check_counts(batch.completed, batch.total)?;
                let progress = if batch.total > 0 {
                    (batch.completed as u128 * 100 / batch.total as u128) as u8
                } else {
                    0
                };
                Ok(JobStatus {
                    state: batch.status,
                    completed: batch.completed,
                    total: batch.total,
                    progress,
                    artifact_name: None,
                })
            }
            JobStatusPayload::AlbumExport(export)
            | JobStatusPayload::VaultExport(export)
            | JobStatusPayload::AppDataExport(export)
            | JobStatusPayload::MetadataExport(export) => {
                if export.progress > 100 {
                    return Err(ApiError::InvalidResponse(format!(
                        "进度超出范围: {}",
                        export.progress
                    )));
                }
                let completed = export.completed.unwrap_or(0);
                let total = export.total.unwrap_or(0);
                check_counts(completed, total)?;
                Ok(JobStatus {
                    state: export.status,
                    completed,
                    total,
                    progress: export.progress,
                    artifact_name: export.artifact_name,
                })
            }
        }
    }
}

fn check_counts(completed: u64, total: u64) -> Result<(), ApiError> {
    if total > 0 && completed > total {
        return Err(ApiError::InvalidResponse(format!(
            "完成数超过总数: {}/{}",
            completed, total
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SizeResponse {
    pub bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpaceResponse {
    pub available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_payload_derives_percent() {
        let payload: JobStatusPayload = serde_json::from_str(
            r#"{"kind":"add_files","status":"in_progress","completed":3,"total":12}"#,
        )
        .unwrap();
        let status = payload.into_status(JobClass::AddFiles).unwrap();
        assert_eq!(status.state, RemoteState::InProgress);
        assert_eq!(status.progress, 25);
    }

    #[test]
    fn export_payload_keeps_artifact_name() {
        let payload: JobStatusPayload = serde_json::from_str(
            r#"{"kind":"vault_export","status":"completed","progress":100,"artifact_name":"vault.zip"}"#,
        )
        .unwrap();
        let status = payload.into_status(JobClass::VaultExport).unwrap();
        assert_eq!(status.state, RemoteState::Completed);
        assert_eq!(status.artifact_name.as_deref(), Some("vault.zip"));
    }

    #[test]
    fn running_is_an_alias_for_in_progress() {
        let payload: JobStatusPayload =
            serde_json::from_str(r#"{"kind":"metadata_export","status":"running","progress":5}"#)
                .unwrap();
        let status = payload.into_status(JobClass::MetadataExport).unwrap();
        assert_eq!(status.state, RemoteState::InProgress);
    }

    #[test]
    fn mismatched_kind_is_rejected() {
        let payload: JobStatusPayload =
            serde_json::from_str(r#"{"kind":"delete_album","status":"completed"}"#).unwrap();
        assert!(payload.into_status(JobClass::AddFiles).is_err());
    }

    #[test]
    fn inconsistent_counts_are_rejected() {
        let payload: JobStatusPayload = serde_json::from_str(
            r#"{"kind":"add_files","status":"in_progress","completed":9,"total":4}"#,
        )
        .unwrap();
        assert!(payload.into_status(JobClass::AddFiles).is_err());

        let payload: JobStatusPayload =
            serde_json::from_str(r#"{"kind":"album_export","status":"in_progress","progress":140}"#)
                .unwrap();
        assert!(payload.into_status(JobClass::AlbumExport).is_err());
    }

    #[test]
    fn unknown_kind_fails_to_deserialize() {
        let parsed = serde_json::from_str::<JobStatusPayload>(r#"{"kind":"reindex","status":"completed"}"#);
        assert!(parsed.is_err());
    }
}
