mod common;

use std::sync::Arc;

use chrono::Utc;

use common::{Call, MockEngine, Scripted, advance_ms, batch, export, manager, manager_with_store};
use vault_tasks::common::api::models::{JobClass, RemoteState};
use vault_tasks::tasks::store::{BatchRecord, DownloadRecord, PersistedRecord, PersistentTaskStore};
use vault_tasks::tasks::{MemoryKvStore, RestoreReport};
use vault_tasks::{DownloadType, ResourceId, TaskKind, TaskState};

const HOUR_MS: i64 = 60 * 60 * 1_000;

fn download_record(remote_job_id: &str, resource_id: ResourceId, age_ms: i64) -> PersistedRecord {
    PersistedRecord::Download(DownloadRecord {
        remote_job_id: remote_job_id.to_string(),
        resource_id,
        resource_name: "Holiday".to_string(),
        download_type: resource_id.download_type(),
        timestamp_created: Utc::now().timestamp_millis() - age_ms,
        resource_size: Some(4_000),
    })
}

fn batch_record(remote_job_id: &str, age_ms: i64) -> PersistedRecord {
    PersistedRecord::Batch(BatchRecord {
        remote_job_id: remote_job_id.to_string(),
        kind: TaskKind::Adding,
        label: "Adding files to album…".to_string(),
        total: 4,
        timestamp_created: Utc::now().timestamp_millis() - age_ms,
        album_id: Some(3),
    })
}

fn seed(kv: &Arc<MemoryKvStore>, records: Vec<(&str, PersistedRecord)>) {
    let store = PersistentTaskStore::new(kv.clone());
    for (task_id, record) in records {
        store.snapshot(task_id, &record);
    }
}

#[tokio::test(start_paused = true)]
async fn stale_record_is_evicted_without_a_remote_call() {
    let engine = MockEngine::new();
    let kv = Arc::new(MemoryKvStore::new());
    seed(
        &kv,
        vec![(
            "album_export-old",
            download_record("job-old", ResourceId::Album(7), 3 * HOUR_MS),
        )],
    );
    let manager = manager_with_store(&engine, kv);

    let report = manager.restore().await;
    assert_eq!(
        report,
        RestoreReport {
            stale: 1,
            ..RestoreReport::default()
        }
    );
    assert!(engine.calls().is_empty());
    assert!(manager.pending_records().is_empty());
    assert!(manager.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn only_in_progress_jobs_are_resumed() {
    let engine = MockEngine::new();
    engine.script(
        "job-a",
        vec![
            export(JobClass::AlbumExport, RemoteState::InProgress, 25),
            export(JobClass::AlbumExport, RemoteState::Completed, 100),
        ],
    );
    engine.script("job-b", vec![export(JobClass::VaultExport, RemoteState::Completed, 100)]);
    engine.script("job-c", vec![batch(JobClass::AddFiles, RemoteState::Failed, 1, 4)]);
    engine.script("job-d", vec![Scripted::NotFound]);

    let kv = Arc::new(MemoryKvStore::new());
    seed(
        &kv,
        vec![
            ("album_export-a", download_record("job-a", ResourceId::Album(7), HOUR_MS)),
            ("vault_export-b", download_record("job-b", ResourceId::Vault, 0)),
            ("add_files-c", batch_record("job-c", 0)),
            ("metadata_export-d", download_record("job-d", ResourceId::Metadata, 0)),
        ],
    );
    let manager = manager_with_store(&engine, kv);

    let report = manager.restore().await;
    assert_eq!(
        report,
        RestoreReport {
            resumed: 1,
            finished: 3,
            ..RestoreReport::default()
        }
    );

    let task = manager.task("album_export-a").unwrap();
    assert_eq!(task.state, TaskState::InProgress);
    assert_eq!(task.progress_percent, 25);
    assert_eq!(task.label, "Preparing Holiday (25%)");
    assert_eq!(task.resource_size, Some(4_000));
    assert_eq!(task.download_type, Some(DownloadType::Album));
    assert!(manager.has_active_album_download(7));
    assert!(!manager.has_active_vault_download());
    assert_eq!(manager.registry().len(), 1);
    assert_eq!(manager.active_pollers(), 1);

    let pending = manager.pending_records();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, "album_export-a");

    // 恢复后的任务照常结束
    advance_ms(1_100).await;
    assert_eq!(manager.task("album_export-a").unwrap().state, TaskState::Completed);
    assert!(!manager.has_active_album_download(7));
}

#[tokio::test(start_paused = true)]
async fn restoring_twice_does_not_duplicate_timers() {
    let engine = MockEngine::new();
    let kv = Arc::new(MemoryKvStore::new());
    seed(
        &kv,
        vec![("app_data_export-a", download_record("job-a", ResourceId::AppData, 0))],
    );
    let manager = manager_with_store(&engine, kv);

    assert_eq!(manager.restore().await.resumed, 1);
    let second = manager.restore().await;
    assert_eq!(second, RestoreReport::default());
    assert_eq!(manager.active_pollers(), 1);

    advance_ms(3_500).await;
    let polls = engine.count(|c| *c == Call::Status(JobClass::AppDataExport, "job-a".to_string()));
    // 恢复时一次，之后每秒一次
    assert_eq!(polls, 1 + 3);
}

#[tokio::test(start_paused = true)]
async fn record_for_a_resource_with_another_live_download_is_dropped() {
    let engine = MockEngine::new();
    let (manager, kv) = manager(&engine);
    manager.start_album_download(5, "Five").await.unwrap();

    seed(
        &kv,
        vec![("album_export-other", download_record("job-x", ResourceId::Album(5), 0))],
    );
    let report = manager.restore().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.resumed, 0);
    assert!(manager.task("album_export-other").is_none());
    assert_eq!(manager.pending_records().len(), 1);
    assert_eq!(manager.active_pollers(), 1);
}

#[tokio::test(start_paused = true)]
async fn query_errors_fail_closed() {
    let engine = MockEngine::new();
    engine.script("job-a", vec![Scripted::Unavailable]);
    let kv = Arc::new(MemoryKvStore::new());
    seed(&kv, vec![("add_files-a", batch_record("job-a", 0))]);
    let manager = manager_with_store(&engine, kv);

    let report = manager.restore().await;
    assert_eq!(report.failed, 1);
    assert!(manager.pending_records().is_empty());
    assert!(manager.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resumed_batch_job_finishes_without_a_callback() {
    let engine = MockEngine::new();
    engine.script(
        "job-a",
        vec![
            batch(JobClass::AddFiles, RemoteState::InProgress, 2, 4),
            batch(JobClass::AddFiles, RemoteState::Completed, 4, 4),
        ],
    );
    let kv = Arc::new(MemoryKvStore::new());
    seed(&kv, vec![("add_files-a", batch_record("job-a", 10 * 60 * 1_000))]);
    let manager = manager_with_store(&engine, kv);

    assert_eq!(manager.restore().await.resumed, 1);
    let task = manager.task("add_files-a").unwrap();
    assert_eq!(task.label, "Adding files (2/4)");
    assert!(manager.has_active_add_files(3));

    advance_ms(1_100).await;
    assert_eq!(manager.task("add_files-a").unwrap().label, "Files added");

    advance_ms(2_000).await;
    assert!(manager.task("add_files-a").is_none());
    assert!(manager.pending_records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn batch_records_use_the_shorter_staleness_ceiling() {
    let engine = MockEngine::new();
    let kv = Arc::new(MemoryKvStore::new());
    seed(
        &kv,
        vec![
            ("add_files-old", batch_record("job-a", HOUR_MS + 60_000)),
            ("vault_export-young", download_record("job-b", ResourceId::Vault, HOUR_MS + 60_000)),
        ],
    );
    let manager = manager_with_store(&engine, kv);

    let report = manager.restore().await;
    assert_eq!(report.stale, 1);
    assert_eq!(report.resumed, 1);
    assert!(manager.has_active_vault_download());
}
