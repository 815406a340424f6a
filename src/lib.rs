//! 媒体库客户端的后台任务子系统
//!
//! 启动服务端的长任务（导出下载、相册批量操作），轮询直至结束，
//! 在进程重启后恢复跟踪，并在下载开始前检查存储空间。

pub mod batch;
pub mod common;
pub mod config;
pub mod downloader;
pub mod tasks;

pub use common::api::{ApiError, JobEngine, VaultClient};
pub use common::models::{DownloadType, ProgressEntry, ResourceId, Task, TaskKind, TaskState};
pub use config::AppConfig;
pub use tasks::{RestoreReport, TaskError, TaskEvent, TaskManager, TaskTimings};
