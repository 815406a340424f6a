//! 相册批量任务：添加文件与删除相册

use futures::future::BoxFuture;

use crate::common::api::models::JobClass;
use crate::common::models::TaskKind;

pub mod orchestrator;

pub use orchestrator::BatchJobOrchestrator;

/// 任务成功后、移除进度之前执行的回调
pub type SuccessCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// 批量任务的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp {
    AddFiles,
    DeleteAlbum,
}

impl BatchOp {
    /// 下载任务不是批量任务，返回 None
    pub fn from_kind(kind: TaskKind) -> Option<Self> {
        match kind {
            TaskKind::Adding => Some(BatchOp::AddFiles),
            TaskKind::Deleting => Some(BatchOp::DeleteAlbum),
            TaskKind::Downloading => None,
        }
    }

    pub fn kind(self) -> TaskKind {
        match self {
            BatchOp::AddFiles => TaskKind::Adding,
            BatchOp::DeleteAlbum => TaskKind::Deleting,
        }
    }

    pub fn class(self) -> JobClass {
        match self {
            BatchOp::AddFiles => JobClass::AddFiles,
            BatchOp::DeleteAlbum => JobClass::DeleteAlbum,
        }
    }

    pub(crate) fn labels(self) -> &'static BatchLabels {
        match self {
            BatchOp::AddFiles => &ADDING,
            BatchOp::DeleteAlbum => &DELETING,
        }
    }
}

/// 各阶段的进度提示
pub(crate) struct BatchLabels {
    pub started: &'static str,
    pub progress: &'static str,
    pub completed: &'static str,
    pub failed: &'static str,
}

static ADDING: BatchLabels = BatchLabels {
    started: "Adding files to album…",
    progress: "Adding files",
    completed: "Files added",
    failed: "Failed to add files",
};

static DELETING: BatchLabels = BatchLabels {
    started: "Deleting album…",
    progress: "Deleting album",
    completed: "Album deleted",
    failed: "Failed to delete album",
};

impl BatchLabels {
    pub fn progress(&self, current: u64, total: u64) -> String {
        format!("{} ({}/{})", self.progress, current, total)
    }
}
