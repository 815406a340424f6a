use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::common::models::{Task, TaskKind, TaskState};
use crate::tasks::error::TaskError;
use crate::tasks::manager::TaskManager;

/// 一次产物保存的结果
pub type FetchOutcome = (String, Result<PathBuf, TaskError>);

/// 在后台保存已完成下载的产物，每个任务只保存一次
///
/// 保存过程不阻塞调用方，事件循环在下载大文件期间仍能响应中断和进度事件。
pub struct ArtifactFetcher {
    manager: Arc<TaskManager>,
    output: Option<PathBuf>,
    fetches: JoinSet<FetchOutcome>,
    seen: HashSet<String>,
}

impl ArtifactFetcher {
    /// `output` 为空时不保存任何产物
    pub fn new(manager: Arc<TaskManager>, output: Option<PathBuf>) -> Self {
        Self {
            manager,
            output,
            fetches: JoinSet::new(),
            seen: HashSet::new(),
        }
    }

    /// 任务刚完成时开始保存，返回是否新开了一次保存
    pub fn on_task(&mut self, task: &Task) -> bool {
        let Some(dir) = &self.output else {
            return false;
        };
        if task.kind != TaskKind::Downloading || task.state != TaskState::Completed {
            return false;
        }
        if !self.seen.insert(task.id.clone()) {
            return false;
        }

        debug!("开始保存产物: {}", task.id);
        let manager = Arc::clone(&self.manager);
        let task_id = task.id.clone();
        let dir = dir.clone();
        self.fetches.spawn(async move {
            let result = manager.fetch_artifact(&task_id, &dir).await;
            (task_id, result)
        });
        true
    }

    /// 事件丢失后按注册表当前内容补齐
    pub fn resync(&mut self, tasks: &[Task]) -> usize {
        tasks.iter().filter(|task| self.on_task(task)).count()
    }

    /// 等待下一次保存结束；没有进行中的保存时返回 None
    pub async fn next(&mut self) -> Option<FetchOutcome> {
        loop {
            match self.fetches.join_next().await? {
                Ok(outcome) => return Some(outcome),
                Err(e) => warn!("保存产物的任务异常退出: {}", e),
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.fetches.len()
    }

    pub fn is_idle(&self) -> bool {
        self.fetches.is_empty()
    }
}
