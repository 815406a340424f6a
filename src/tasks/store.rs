//! 任务的持久化快照
//!
//! 只保存恢复任务所需的身份信息（远端任务 ID、资源、创建时间），不保存进度和状态：
//! 重启后进度总是从远端重新查询。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::error::StoreError;
use crate::common::api::models::JobClass;
use crate::common::models::{DownloadType, ResourceId, TaskKind};

/// 与进程无关的键值存储
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Lock)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Lock)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Lock)?;
        entries.remove(key);
        Ok(())
    }
}

/// 以单个 JSON 文件保存的键值存储，每次写入都整体落盘
///
/// 在 tokio 运行时内，落盘在阻塞线程池中进行，调用方不会被文件 IO 卡住；
/// 过时的快照会被跳过，文件最终总是最新内容。
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    next_seq: AtomicU64,
    writer: Arc<SnapshotWriter>,
}

#[derive(Debug)]
struct SnapshotWriter {
    write_lock: Mutex<()>,
    written: watch::Sender<u64>,
}

impl SnapshotWriter {
    fn write(&self, path: &Path, seq: u64, data: &[u8]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Lock)?;
        if *self.written.borrow() >= seq {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // 先写临时文件再改名，避免写到一半时进程退出
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        self.written.send_replace(seq);
        Ok(())
    }
}

impl FileKvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("状态文件 {:?} 已损坏，将重新创建: {}", path, e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let (written, _) = watch::channel(0);
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            next_seq: AtomicU64::new(0),
            writer: Arc::new(SnapshotWriter {
                write_lock: Mutex::new(()),
                written,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 等待此前的全部写入落盘
    pub async fn flushed(&self) {
        let target = self.next_seq.load(Ordering::SeqCst);
        let mut written = self.writer.written.subscribe();
        // 发送端由自身持有，不会提前关闭
        let _ = written.wait_for(|seq| *seq >= target).await;
    }

    // 调用时持有 entries 锁，序号顺序与内容顺序一致
    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(entries)?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let Ok(runtime) = Handle::try_current() else {
            return self.writer.write(&self.path, seq, &data);
        };
        let writer = Arc::clone(&self.writer);
        let path = self.path.clone();
        runtime.spawn_blocking(move || {
            if let Err(e) = writer.write(&path, seq, &data) {
                warn!("写入状态文件 {:?} 失败: {}", path, e);
            }
        });
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Lock)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Lock)?;
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Lock)?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Batch,
    Download,
}

impl Namespace {
    pub fn key(&self) -> &'static str {
        match self {
            Namespace::Batch => "vault.batch_tasks",
            Namespace::Download => "vault.download_tasks",
        }
    }

    pub fn for_kind(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Downloading => Namespace::Download,
            TaskKind::Adding | TaskKind::Deleting => Namespace::Batch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub remote_job_id: String,
    pub kind: TaskKind,
    pub label: String,
    pub total: u64,
    pub timestamp_created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub remote_job_id: String,
    pub resource_id: ResourceId,
    pub resource_name: String,
    pub download_type: DownloadType,
    pub timestamp_created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistedRecord {
    Batch(BatchRecord),
    Download(DownloadRecord),
}

impl PersistedRecord {
    pub fn namespace(&self) -> Namespace {
        match self {
            PersistedRecord::Batch(_) => Namespace::Batch,
            PersistedRecord::Download(_) => Namespace::Download,
        }
    }

    pub fn remote_job_id(&self) -> &str {
        match self {
            PersistedRecord::Batch(r) => &r.remote_job_id,
            PersistedRecord::Download(r) => &r.remote_job_id,
        }
    }

    pub fn timestamp_created(&self) -> i64 {
        match self {
            PersistedRecord::Batch(r) => r.timestamp_created,
            PersistedRecord::Download(r) => r.timestamp_created,
        }
    }

    /// 查询远端状态时使用的任务类别
    pub fn class(&self) -> Option<JobClass> {
        match self {
            PersistedRecord::Batch(r) => JobClass::for_batch(r.kind),
            PersistedRecord::Download(r) => Some(JobClass::for_download(r.download_type)),
        }
    }

    /// 记录距 `now_ms` 是否已超过 `max_age_ms`
    pub fn is_older_than(&self, now_ms: i64, max_age_ms: u64) -> bool {
        let max_age_ms = i64::try_from(max_age_ms).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.timestamp_created()) > max_age_ms
    }

    fn to_value(&self) -> Result<Value, StoreError> {
        Ok(match self {
            PersistedRecord::Batch(r) => serde_json::to_value(r)?,
            PersistedRecord::Download(r) => serde_json::to_value(r)?,
        })
    }

    fn from_value(namespace: Namespace, value: Value) -> Result<Self, StoreError> {
        Ok(match namespace {
            Namespace::Batch => PersistedRecord::Batch(serde_json::from_value(value)?),
            Namespace::Download => PersistedRecord::Download(serde_json::from_value(value)?),
        })
    }
}

/// 两个命名空间下的任务快照
///
/// 写入失败只记录日志：持久化是恢复用的辅助信息，不能影响正在运行的任务。
pub struct PersistentTaskStore {
    kv: Arc<dyn KvStore>,
    // 保证同一命名空间的读-改-写不会交错
    write_lock: Mutex<()>,
}

impl PersistentTaskStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    fn read_namespace(&self, namespace: Namespace) -> BTreeMap<String, Value> {
        let raw = match self.kv.get(namespace.key()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                warn!("读取任务快照失败 [{}]: {}", namespace.key(), e);
                return BTreeMap::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!("任务快照已损坏，按空处理 [{}]: {}", namespace.key(), e);
                BTreeMap::new()
            }
        }
    }

    fn write_namespace(
        &self,
        namespace: Namespace,
        map: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError> {
        if map.is_empty() {
            return self.kv.remove(namespace.key());
        }
        self.kv.set(namespace.key(), serde_json::to_string(map)?)
    }

    fn modify<F>(&self, namespace: Namespace, f: F)
    where
        F: FnOnce(&mut BTreeMap<String, Value>) -> bool,
    {
        let Ok(_guard) = self.write_lock.lock() else {
            warn!("任务快照锁定失败");
            return;
        };
        let mut map = self.read_namespace(namespace);
        if !f(&mut map) {
            return;
        }
        if let Err(e) = self.write_namespace(namespace, &map) {
            warn!("写入任务快照失败 [{}]: {}", namespace.key(), e);
        }
    }

    /// 写入（覆盖）一条记录，命名空间由记录类型决定
    pub fn snapshot(&self, task_id: &str, record: &PersistedRecord) {
        let value = match record.to_value() {
            Ok(value) => value,
            Err(e) => {
                warn!("序列化任务快照失败 {}: {}", task_id, e);
                return;
            }
        };
        debug!("保存任务快照: {} [{}]", task_id, record.namespace().key());
        self.modify(record.namespace(), |map| {
            map.insert(task_id.to_string(), value);
            true
        });
    }

    pub fn evict(&self, namespace: Namespace, task_id: &str) {
        self.modify(namespace, |map| map.remove(task_id).is_some());
    }

    /// 读取命名空间内全部记录；无法解析的记录会被直接清除
    pub fn load_all(&self, namespace: Namespace) -> Vec<(String, PersistedRecord)> {
        let map = {
            let Ok(_guard) = self.write_lock.lock() else {
                warn!("任务快照锁定失败");
                return Vec::new();
            };
            self.read_namespace(namespace)
        };

        let mut records = Vec::with_capacity(map.len());
        for (task_id, value) in map {
            match PersistedRecord::from_value(namespace, value) {
                Ok(record) => records.push((task_id, record)),
                Err(e) => {
                    warn!("无法解析的任务快照 {}，已清除: {}", task_id, e);
                    self.evict(namespace, &task_id);
                }
            }
        }
        records
    }
}
