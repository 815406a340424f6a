use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use futures::FutureExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use vault_tasks::common::logger::PrettyLogger;
use vault_tasks::common::progress::ProgressBoard;
use vault_tasks::downloader::ArtifactFetcher;
use vault_tasks::tasks::{FileKvStore, KvStore, PersistedRecord};
use vault_tasks::{
    AppConfig, DownloadType, ResourceId, TaskEvent, TaskManager, VaultClient,
    log_error, log_info, log_success, log_warning,
};

mod cli;

use cli::{Command, DownloadTarget};

/// 列出已保存的任务记录
fn print_pending(manager: &TaskManager) {
    let records = manager.pending_records();
    if records.is_empty() {
        log_info!("没有已保存的任务");
        return;
    }

    PrettyLogger::title("已保存的任务");
    for (task_id, record) in records {
        let details = match record {
            PersistedRecord::Batch(r) => format!("{:?} {} (远端 {})", r.kind, r.label, r.remote_job_id),
            PersistedRecord::Download(r) => format!(
                "下载 {} [{}] (远端 {})",
                r.resource_name, r.resource_id, r.remote_job_id
            ),
        };
        PrettyLogger::record(task_id, details);
    }
    PrettyLogger::separator();
}

/// 执行子命令，返回下载产物的保存目录
async fn run_command(manager: &TaskManager, command: Command) -> anyhow::Result<Option<PathBuf>> {
    match command {
        Command::Download { target } => {
            let (resource, name, output) = match target {
                DownloadTarget::Album { id, name, output } => (
                    ResourceId::Album(id),
                    name.unwrap_or_else(|| format!("Album {}", id)),
                    output.output,
                ),
                DownloadTarget::Vault { output } => (
                    ResourceId::Vault,
                    DownloadType::Vault.display_name().to_string(),
                    output.output,
                ),
                DownloadTarget::AppData { output } => (
                    ResourceId::AppData,
                    DownloadType::AppData.display_name().to_string(),
                    output.output,
                ),
                DownloadTarget::Metadata { output } => (
                    ResourceId::Metadata,
                    DownloadType::Metadata.display_name().to_string(),
                    output.output,
                ),
            };
            let task_id = manager
                .start_download(resource, &name)
                .await
                .with_context(|| format!("无法开始下载 {}", resource))?;
            debug!("下载任务已创建: {}", task_id);
            Ok(output)
        }
        Command::AddFiles { album, file_ids } => {
            let count = file_ids.len();
            let on_success: vault_tasks::batch::SuccessCallback = Box::new(move || {
                async move { log_success!("已向相册 {} 添加 {} 个文件", album, count) }.boxed()
            });
            manager
                .add_files_to_album(album, file_ids, Some(on_success))
                .await
                .context("无法添加文件")?;
            Ok(None)
        }
        Command::DeleteAlbum {
            album_id,
            delete_files,
        } => {
            let on_success: vault_tasks::batch::SuccessCallback = Box::new(move || {
                async move { log_success!("相册 {} 已删除", album_id) }.boxed()
            });
            manager
                .delete_album(album_id, delete_files, Some(on_success))
                .await
                .context("无法删除相册")?;
            Ok(None)
        }
        Command::Resume | Command::Pending => Ok(None),
    }
}

/// 跟踪全部任务直到注册表为空且产物都已保存
async fn watch(
    manager: Arc<TaskManager>,
    mut events: broadcast::Receiver<TaskEvent>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut board = ProgressBoard::new();
    board.sync(&manager.registry().list());
    if manager.registry().is_empty() {
        log_info!("没有进行中的任务");
        return Ok(());
    }

    let mut fetcher = ArtifactFetcher::new(Arc::clone(&manager), output);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    warn!("再次中断，直接退出");
                    break;
                }
                interrupted = true;
                let cancelled = manager.cancel_all_downloads();
                board.println(format!("{} 已取消 {} 个下载", "⚠".yellow().bold(), cancelled));
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        board.apply(&event);
                        if let TaskEvent::Updated(task) = &event {
                            fetcher.on_task(task);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("进度事件落后 {} 条，重新同步", skipped);
                        let tasks = manager.registry().list();
                        board.sync(&tasks);
                        fetcher.resync(&tasks);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            Some((task_id, result)) = fetcher.next(), if !fetcher.is_idle() => {
                match result {
                    Ok(path) => board.println(format!(
                        "{} 已保存: {}",
                        "📁".blue().bold(),
                        path.display()
                    )),
                    Err(e) => board.println(format!("{} {}: {}", "✗".red().bold(), task_id, e)),
                }
            }
        }

        if manager.registry().is_empty() && fetcher.is_idle() {
            break;
        }
    }

    manager.shutdown();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load(args.config.as_deref())?.with_overrides(
        args.server.clone(),
        args.token.clone(),
        args.state_file.clone(),
    );
    debug!("配置: {:?}", config);

    let kv = Arc::new(
        FileKvStore::open(&config.state_file)
            .with_context(|| format!("无法打开状态文件 {:?}", config.state_file))?,
    );
    let client = VaultClient::new(&config.server_url, config.token.as_deref())?;
    let manager = Arc::new(TaskManager::new(
        Arc::new(client),
        Arc::clone(&kv) as Arc<dyn KvStore>,
        config.timings.clone(),
    ));

    if let Command::Pending = args.command {
        print_pending(&manager);
        return Ok(());
    }

    // 先订阅，恢复出的任务也会显示
    let events = manager.subscribe();
    let report = manager.restore().await;
    if report.resumed > 0 {
        log_info!("已恢复 {} 个未完成的任务", report.resumed);
    }
    if report.stale + report.finished + report.failed > 0 {
        info!(
            "已清除 {} 条过期或已结束的任务记录",
            report.stale + report.finished + report.failed
        );
    }

    let output = match run_command(&manager, args.command).await {
        Ok(output) => output,
        Err(e) => {
            log_error!("{:#}", e);
            if manager.registry().is_empty() {
                return Err(e);
            }
            log_warning!("继续跟踪已有任务");
            None
        }
    };

    watch(Arc::clone(&manager), events, output).await?;
    kv.flushed().await;
    log_success!("全部任务已结束");
    Ok(())
}
