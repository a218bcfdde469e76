//! 多账号调度
//!
//! 每个账号一个独立的 tokio 任务，互不影响。可选的信号量限制同时运行的账号数，
//! 共享的停止信号由 [`RaceOrchestrator::stop`] 或代理池过期触发

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::controller::{AccountRaceController, RaceContext};
use super::outcome::{AccountReport, RaceOutcome};
use super::stats::{RaceStats, Scoreboard};
use crate::claim::ClaimApi;
use crate::model::account::Account;
use crate::model::config::Config;
use crate::pool::ProxyHealthPool;
use crate::recorder::OutcomeRecorder;

/// 多账号调度器
pub struct RaceOrchestrator {
    ctx: Arc<RaceContext>,
    pool: Option<Arc<ProxyHealthPool>>,
    recorder: Option<Arc<dyn OutcomeRecorder>>,
    stop: CancellationToken,
    /// 0 表示不限
    max_concurrent: usize,
    /// None 表示不输出进度日志
    progress_interval: Option<Duration>,
}

impl RaceOrchestrator {
    pub fn new(api: Arc<dyn ClaimApi>, config: &Config) -> Self {
        Self {
            ctx: Arc::new(RaceContext::from_config(api, config)),
            pool: None,
            recorder: None,
            stop: CancellationToken::new(),
            max_concurrent: config.max_concurrent_accounts,
            progress_interval: (config.progress_interval_secs > 0)
                .then(|| Duration::from_secs(config.progress_interval_secs)),
        }
    }

    /// 关联代理池，代理池过期时停止全部账号
    pub fn with_pool(mut self, pool: Arc<ProxyHealthPool>) -> Self {
        let stop = self.stop.clone();
        pool.on_expire(move || stop.cancel());
        self.pool = Some(pool);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn OutcomeRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// 共享的停止信号
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// 停止所有账号并关闭代理池过期监控
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::warn!("收到停止信号，正在中断所有账号");
        }
        self.stop.cancel();
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }

    /// 运行所有账号直到全部产生结果
    pub async fn run(&self, accounts: Vec<Account>) -> RaceStats {
        let started = Instant::now();
        let scoreboard = Scoreboard::new(accounts.len());
        let ids: Vec<String> = accounts.iter().map(|a| a.id.clone()).collect();

        let _monitor = self.pool.as_ref().and_then(|pool| pool.spawn_expiry_monitor());
        let semaphore = (self.max_concurrent > 0).then(|| Arc::new(Semaphore::new(self.max_concurrent)));

        tracing::info!(
            "开始抢票: {} 个账号，并发上限 {}",
            accounts.len(),
            if self.max_concurrent == 0 {
                "不限".to_string()
            } else {
                self.max_concurrent.to_string()
            }
        );

        let mut tasks = JoinSet::new();
        for account in accounts {
            tasks.spawn(Self::run_account(
                Arc::new(account),
                Arc::clone(&self.ctx),
                self.stop.clone(),
                semaphore.clone(),
            ));
        }

        let period = self.progress_interval.unwrap_or(Duration::from_secs(3600));
        let mut progress = tokio::time::interval_at(Instant::now() + period, period);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(report)) => self.finalize(&scoreboard, report),
                    Some(Err(e)) => tracing::error!("账号任务异常退出: {}", e),
                    None => break,
                },
                _ = progress.tick(), if self.progress_interval.is_some() => {
                    let stats = scoreboard.snapshot();
                    tracing::info!(
                        "进度: {}/{} 已结束，其中完成 {}",
                        stats.finished(),
                        stats.total,
                        stats.completed()
                    );
                }
            }
        }

        // 任务异常退出的账号同样需要一个结果
        for id in ids.iter().filter(|id| !scoreboard.is_recorded(id)) {
            self.finalize(
                &scoreboard,
                AccountReport::without_run(id.clone(), RaceOutcome::Error, Some("任务异常退出".to_string())),
            );
        }

        if let Some(pool) = &self.pool {
            pool.shutdown();
            tracing::info!("代理池状态: {:?}", pool.stats());
        }

        let stats = scoreboard.snapshot();
        tracing::info!("抢票结束，耗时 {:?}: {}", started.elapsed(), stats);
        stats
    }

    async fn run_account(
        account: Arc<Account>,
        ctx: Arc<RaceContext>,
        stop: CancellationToken,
        semaphore: Option<Arc<Semaphore>>,
    ) -> AccountReport {
        let _permit = match semaphore {
            Some(semaphore) => tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    return AccountReport::without_run(
                        account.id.clone(),
                        RaceOutcome::Interrupted,
                        Some("等待调度时收到停止信号".to_string()),
                    );
                }
                permit = semaphore.acquire_owned() => permit.ok(),
            },
            None => None,
        };

        let id = account.id.clone();
        let controller = AccountRaceController::new(account, ctx, stop);
        match AssertUnwindSafe(controller.run()).catch_unwind().await {
            Ok(report) => report,
            Err(_) => {
                tracing::error!("账号 {} 的控制器发生 panic", id);
                AccountReport::without_run(id, RaceOutcome::Error, Some("控制器发生 panic".to_string()))
            }
        }
    }

    fn finalize(&self, scoreboard: &Scoreboard, report: AccountReport) {
        if !scoreboard.record(&report.account_id, report.outcome) {
            tracing::warn!("账号 {} 已有结果，忽略重复上报", report.account_id);
            return;
        }
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record(&report) {
                tracing::warn!("写入账号 {} 的审计日志失败: {}", report.account_id, e);
            }
        }
    }
}
