use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::store::{BatchRecord, DownloadRecord, Namespace, PersistedRecord, PersistentTaskStore};
use crate::common::models::{ProgressEntry, ResourceId, Task, TaskKind, TaskUpdate};

/// 注册表变更通知
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Updated(Task),
    Removed(String),
}

/// 内存中的任务表，进度展示的唯一数据源
///
/// 携带 `remote_job_id` 的写入会同时落盘快照，纯进度更新不会。
pub struct TaskRegistry {
    tasks: DashMap<String, Task>,
    store: Arc<PersistentTaskStore>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskRegistry {
    pub fn new(store: Arc<PersistentTaskStore>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            tasks: DashMap::new(),
            store,
            events,
        }
    }

    pub fn store(&self) -> &Arc<PersistentTaskStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: TaskEvent) {
        // 没有订阅者时发送失败是正常的
        let _ = self.events.send(event);
    }

    fn persist(&self, task: &Task) {
        match record_for(task) {
            Some(record) => self.store.snapshot(&task.id, &record),
            None => warn!("任务 {} 缺少持久化所需的资源信息", task.id),
        }
    }

    pub fn insert(&self, task: Task) {
        debug!("登记任务: {} ({:?})", task.id, task.kind);
        if !task.remote_job_id.is_empty() {
            self.persist(&task);
        }
        self.tasks.insert(task.id.clone(), task.clone());
        self.publish(TaskEvent::Updated(task));
    }

    /// 合并到已有任务，或在提供了 `kind` 时新建任务
    pub fn upsert(&self, id: &str, update: TaskUpdate) -> bool {
        let task = match self.tasks.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().apply(&update);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let Some(kind) = update.kind else {
                    debug!("忽略对不存在任务的更新: {}", id);
                    return false;
                };
                let mut task = Task::new(id, kind);
                task.apply(&update);
                entry.insert(task).clone()
            }
        };

        if update.remote_job_id.is_some() {
            self.persist(&task);
        }
        self.publish(TaskEvent::Updated(task));
        true
    }

    /// 只更新已存在的任务
    pub fn update(&self, id: &str, update: TaskUpdate) -> bool {
        self.update_if(id, |_| true, update)
    }

    /// 当 `predicate` 对当前任务成立时才更新
    pub fn update_if<F>(&self, id: &str, predicate: F, update: TaskUpdate) -> bool
    where
        F: FnOnce(&Task) -> bool,
    {
        let task = {
            let Some(mut task) = self.tasks.get_mut(id) else {
                return false;
            };
            if !predicate(&*task) {
                return false;
            }
            task.apply(&update);
            task.clone()
        };

        if update.remote_job_id.is_some() {
            self.persist(&task);
        }
        self.publish(TaskEvent::Updated(task));
        true
    }

    /// 移除任务并清除其持久化记录
    pub fn remove(&self, id: &str) -> Option<Task> {
        let (_, task) = self.tasks.remove(id)?;
        self.store.evict(Namespace::for_kind(task.kind), id);
        debug!("移除任务: {}", id);
        self.publish(TaskEvent::Removed(id.to_string()));
        Some(task)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).map(|task| task.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 按创建时间排序的全部任务
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|entry| entry.value().clone()).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn progress_entries(&self) -> Vec<ProgressEntry> {
        self.list().iter().map(ProgressEntry::from).collect()
    }

    /// 仍在进行中的下载任务
    pub fn downloads_in_flight(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|entry| entry.kind == TaskKind::Downloading && entry.state.is_in_flight())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn find<F>(&self, predicate: F) -> Option<Task>
    where
        F: Fn(&Task) -> bool,
    {
        self.tasks
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }
}

fn record_for(task: &Task) -> Option<PersistedRecord> {
    match task.kind {
        TaskKind::Downloading => Some(PersistedRecord::Download(DownloadRecord {
            remote_job_id: task.remote_job_id.clone(),
            resource_id: task.resource_id?,
            resource_name: task.resource_name.clone().unwrap_or_default(),
            download_type: task.download_type?,
            timestamp_created: task.created_at,
            resource_size: task.resource_size,
        })),
        TaskKind::Adding | TaskKind::Deleting => Some(PersistedRecord::Batch(BatchRecord {
            remote_job_id: task.remote_job_id.clone(),
            kind: task.kind,
            label: task.label.clone(),
            total: task.total,
            timestamp_created: task.created_at,
            album_id: match task.resource_id {
                Some(ResourceId::Album(id)) => Some(id),
                _ => None,
            },
        })),
    }
}
