use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 任务类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Adding,
    Deleting,
    Downloading,
}

/// 任务在本地的生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Requesting,
    InProgress,
    /// 本地已发起取消，远端尚未确认
    CancelRequested,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskState::Requesting | TaskState::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Requesting => "requesting",
            TaskState::InProgress => "in_progress",
            TaskState::CancelRequested => "cancel_requested",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

/// 下载（导出）类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DownloadType {
    Album,
    Vault,
    AppData,
    Metadata,
}

impl DownloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadType::Album => "album",
            DownloadType::Vault => "vault",
            DownloadType::AppData => "appdata",
            DownloadType::Metadata => "metadata",
        }
    }

    /// 进度提示里展示的名称
    pub fn display_name(&self) -> &'static str {
        match self {
            DownloadType::Album => "Album",
            DownloadType::Vault => "Vault",
            DownloadType::AppData => "App data",
            DownloadType::Metadata => "Metadata",
        }
    }
}

/// 逻辑资源 ID：相册使用数字 ID，其余三类为固定标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    Album(u64),
    Vault,
    AppData,
    Metadata,
}

impl ResourceId {
    pub fn download_type(&self) -> DownloadType {
        match self {
            ResourceId::Album(_) => DownloadType::Album,
            ResourceId::Vault => DownloadType::Vault,
            ResourceId::AppData => DownloadType::AppData,
            ResourceId::Metadata => DownloadType::Metadata,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Album(id) => write!(f, "album:{}", id),
            ResourceId::Vault => write!(f, "vault"),
            ResourceId::AppData => write!(f, "appdata"),
            ResourceId::Metadata => write!(f, "metadata"),
        }
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vault" => Ok(ResourceId::Vault),
            "appdata" => Ok(ResourceId::AppData),
            "metadata" => Ok(ResourceId::Metadata),
            other => {
                // 旧记录里相册 ID 可能没有前缀
                let raw = other.strip_prefix("album:").unwrap_or(other);
                raw.parse::<u64>()
                    .map(ResourceId::Album)
                    .map_err(|_| format!("无效的资源ID: {}", other))
            }
        }
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 注册表中跟踪的一个后台任务
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub label: String,
    pub current: u64,
    pub total: u64,
    pub progress_percent: u8,
    pub remote_job_id: String,
    pub resource_size: Option<u64>,
    pub state: TaskState,
    pub resource_id: Option<ResourceId>,
    pub resource_name: Option<String>,
    pub download_type: Option<DownloadType>,
    pub artifact_name: Option<String>,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
}

impl Task {
    pub fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            label: String::new(),
            current: 0,
            total: 0,
            progress_percent: 0,
            remote_job_id: String::new(),
            resource_size: None,
            state: TaskState::Requesting,
            resource_id: None,
            resource_name: None,
            download_type: None,
            artifact_name: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 剩余未完成的字节数，用于空间准入计算
    pub fn remaining_bytes(&self) -> u64 {
        let Some(size) = self.resource_size else {
            return 0;
        };
        let left = 100u128.saturating_sub(self.progress_percent.min(100) as u128);
        (size as u128 * left / 100) as u64
    }

    /// 合并部分更新
    pub fn apply(&mut self, update: &TaskUpdate) {
        if let Some(label) = &update.label {
            self.label = label.clone();
        }
        if let Some(current) = update.current {
            self.current = current;
        }
        if let Some(total) = update.total {
            self.total = total;
        }
        if let Some(progress) = update.progress_percent {
            self.progress_percent = progress.min(100);
        }
        if let Some(remote_job_id) = &update.remote_job_id {
            self.remote_job_id = remote_job_id.clone();
        }
        if let Some(size) = update.resource_size {
            self.resource_size = Some(size);
        }
        if let Some(state) = update.state {
            self.state = state;
        }
        if let Some(artifact) = &update.artifact_name {
            self.artifact_name = Some(artifact.clone());
        }
        if let Some(resource_id) = update.resource_id {
            self.resource_id = Some(resource_id);
        }
        if let Some(name) = &update.resource_name {
            self.resource_name = Some(name.clone());
        }
        if let Some(download_type) = update.download_type {
            self.download_type = Some(download_type);
        }
    }
}

/// 任务的部分字段更新
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub kind: Option<TaskKind>,
    pub label: Option<String>,
    pub current: Option<u64>,
    pub total: Option<u64>,
    pub progress_percent: Option<u8>,
    pub remote_job_id: Option<String>,
    pub resource_size: Option<u64>,
    pub state: Option<TaskState>,
    pub artifact_name: Option<String>,
    pub resource_id: Option<ResourceId>,
    pub resource_name: Option<String>,
    pub download_type: Option<DownloadType>,
}

impl TaskUpdate {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn state(mut self, state: TaskState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn progress(mut self, current: u64, total: u64, percent: u8) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self.progress_percent = Some(percent);
        self
    }
}

/// 给展示层的只读进度条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEntry {
    pub task_id: String,
    pub kind: TaskKind,
    pub label: String,
    pub current: u64,
    pub total: u64,
    pub percent: u8,
    pub state: TaskState,
}

impl From<&Task> for ProgressEntry {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            kind: task.kind,
            label: task.label.clone(),
            current: task.current,
            total: task.total,
            percent: task.progress_percent,
            state: task.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_round_trips_through_its_string_form() {
        assert_eq!("album:7".parse::<ResourceId>(), Ok(ResourceId::Album(7)));
        assert_eq!("7".parse::<ResourceId>(), Ok(ResourceId::Album(7)));
        assert_eq!("vault".parse::<ResourceId>(), Ok(ResourceId::Vault));
        assert_eq!(ResourceId::AppData.to_string(), "appdata");
        assert!("album:x".parse::<ResourceId>().is_err());
    }

    #[test]
    fn remaining_bytes_scales_with_progress() {
        let mut task = Task::new("t", TaskKind::Downloading);
        assert_eq!(task.remaining_bytes(), 0);

        task.resource_size = Some(2_000_000);
        task.progress_percent = 50;
        assert_eq!(task.remaining_bytes(), 1_000_000);

        task.progress_percent = 100;
        assert_eq!(task.remaining_bytes(), 0);
    }

    #[test]
    fn apply_merges_only_present_fields() {
        let mut task = Task::new("t", TaskKind::Adding);
        task.label = "Adding files to album…".to_string();

        task.apply(&TaskUpdate::default().progress(3, 10, 30));
        assert_eq!(task.label, "Adding files to album…");
        assert_eq!((task.current, task.total, task.progress_percent), (3, 10, 30));

        task.apply(&TaskUpdate::default().state(TaskState::Completed));
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.current, 3);
    }
}
