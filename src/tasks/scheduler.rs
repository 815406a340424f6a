//! 每个任务一个轮询定时器和一个硬超时定时器
//!
//! 定时器句柄按任务 ID 登记，对同一任务重复 `attach` 只会返回已有句柄，
//! 这样恢复流程或界面重复挂载都不会让同一个远端任务被轮询两次。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::timings::PollPolicy;
use crate::common::api::ApiError;
use crate::common::api::models::JobStatus;

/// 一次轮询之后是否继续
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Finished,
}

/// 各任务类别的轮询逻辑
#[async_trait]
pub trait TickHandler: Send + Sync {
    /// 查询远端状态
    async fn poll(&self) -> Result<JobStatus, ApiError>;

    /// 应用一次成功的轮询结果；返回 `Finished` 时定时器随之撤销
    fn on_status(&self, status: JobStatus) -> TickFlow;

    /// 定时器已撤销但请求仍然返回了结果
    fn on_late_status(&self, _status: JobStatus) {}

    /// 硬超时触发，不再做最后一次状态确认
    fn on_ceiling(&self);
}

#[derive(Debug, Clone)]
pub struct TimerHandle {
    task_id: String,
    generation: u64,
    token: CancellationToken,
}

impl TimerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
pub struct PollingScheduler {
    timers: DashMap<String, TimerHandle>,
    next_generation: AtomicU64,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始轮询；同一任务已在轮询时直接返回已有句柄
    pub fn attach(
        self: &Arc<Self>,
        task_id: &str,
        remote_job_id: &str,
        policy: PollPolicy,
        handler: Arc<dyn TickHandler>,
    ) -> TimerHandle {
        let handle = match self.timers.entry(task_id.to_string()) {
            Entry::Occupied(entry) => {
                debug!("任务 {} 已在轮询中，忽略重复挂载", task_id);
                return entry.get().clone();
            }
            Entry::Vacant(entry) => {
                let handle = TimerHandle {
                    task_id: task_id.to_string(),
                    generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                    token: CancellationToken::new(),
                };
                entry.insert(handle.clone());
                handle
            }
        };

        debug!(
            "开始轮询任务 {} (远端 {}), 间隔 {:?}, 超时 {:?}",
            task_id, remote_job_id, policy.interval, policy.ceiling
        );

        tokio::spawn(Self::run_poll_loop(
            Arc::clone(self),
            handle.clone(),
            policy.interval,
            Arc::clone(&handler),
        ));
        tokio::spawn(Self::run_ceiling(
            Arc::clone(self),
            handle.clone(),
            policy.ceiling,
            handler,
        ));

        handle
    }

    /// 立即停止轮询与超时定时器
    pub fn detach(&self, task_id: &str) -> bool {
        match self.timers.remove(task_id) {
            Some((_, handle)) => {
                handle.token.cancel();
                debug!("停止轮询任务 {}", task_id);
                true
            }
            None => false,
        }
    }

    pub fn detach_all(&self) {
        let ids: Vec<String> = self.timers.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            self.detach(&id);
        }
    }

    pub fn is_attached(&self, task_id: &str) -> bool {
        self.timers.contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    // 只撤销属于这个句柄的登记，避免误删同 ID 的新定时器
    fn release(&self, handle: &TimerHandle) -> bool {
        let removed = self
            .timers
            .remove_if(&handle.task_id, |_, current| current.generation == handle.generation)
            .is_some();
        handle.token.cancel();
        removed
    }

    async fn run_poll_loop(
        scheduler: Arc<Self>,
        handle: TimerHandle,
        interval: Duration,
        handler: Arc<dyn TickHandler>,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = handle.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = handler.poll().await;

            if handle.token.is_cancelled() {
                if let Ok(status) = result {
                    handler.on_late_status(status);
                }
                break;
            }

            match result {
                Ok(status) => {
                    if handler.on_status(status) == TickFlow::Finished {
                        scheduler.release(&handle);
                        break;
                    }
                }
                Err(e) => {
                    // 临时错误不改变状态，下一次照常轮询
                    debug!("轮询任务 {} 失败: {}", handle.task_id, e);
                }
            }
        }
    }

    async fn run_ceiling(
        scheduler: Arc<Self>,
        handle: TimerHandle,
        ceiling: Duration,
        handler: Arc<dyn TickHandler>,
    ) {
        tokio::select! {
            _ = handle.token.cancelled() => {}
            _ = tokio::time::sleep(ceiling) => {
                if scheduler.release(&handle) {
                    warn!("任务 {} 超过 {:?} 仍未结束，停止跟踪", handle.task_id, ceiling);
                    handler.on_ceiling();
                }
            }
        }
    }
}
