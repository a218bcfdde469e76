//! 提交竞速
//!
//! 按固定间隔一轮轮地为每个档位并发发出提交请求，不等待上一轮返回。
//! 第一个成功（或重复提交）的结果胜出，之后不再发起新的轮次，
//! 已发出的请求允许自然结束，但结果会被丢弃

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::outcome::{AttemptReport, SubmitOutcome};
use crate::claim::model::{ClaimTask, ResponseRules, SubmitVerdict, Ticket};
use crate::claim::ClaimApi;
use crate::error::{RaceError, RaceResult};
use crate::model::account::Account;
use crate::model::config::Config;

/// 竞速参数
#[derive(Debug, Clone)]
pub struct RaceSettings {
    /// 轮次间隔
    pub round_interval: Duration,
    /// 单次竞速的硬超时
    pub timeout: Duration,
    /// 每个档位允许同时在途的请求数
    pub max_in_flight_per_task: usize,
}

impl RaceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            round_interval: Duration::from_millis(config.submit_round_interval_ms),
            timeout: Duration::from_secs(config.race_timeout_secs),
            max_in_flight_per_task: config.max_in_flight_per_task,
        }
    }
}

/// 单次提交请求的返回
struct AttemptResult {
    task: usize,
    round: u32,
    latency: Duration,
    result: RaceResult<(SubmitVerdict, Option<String>, Option<String>)>,
}

/// 提交竞速
pub struct SubmissionRace {
    api: Arc<dyn ClaimApi>,
    rules: Arc<ResponseRules>,
    settings: RaceSettings,
}

impl SubmissionRace {
    pub fn new(api: Arc<dyn ClaimApi>, rules: Arc<ResponseRules>, settings: RaceSettings) -> Self {
        Self {
            api,
            rules,
            settings,
        }
    }

    /// 运行一次竞速直到产生唯一的结果
    pub async fn run(
        &self,
        account: Arc<Account>,
        tasks: Vec<ClaimTask>,
        ticket: Ticket,
        stop: &CancellationToken,
    ) -> SubmitOutcome {
        if tasks.is_empty() {
            return SubmitOutcome::Error(RaceError::NothingToClaim);
        }

        let tasks: Arc<[ClaimTask]> = tasks.into();
        let completed = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = self.settings.max_in_flight_per_task.max(2) * tasks.len();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let deadline = tokio::time::sleep(self.settings.timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(self.settings.round_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let started = Instant::now();
        let mut round = 0u32;
        let mut launched = 0u32;

        tracing::info!(
            "账号 {} 开始提交竞速，共 {} 个档位",
            account.display_name(),
            tasks.len()
        );
        tracing::debug!("账号 {} 竞速票据: {:?}", account.display_name(), ticket);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break SubmitOutcome::Interrupted,
                // 已经到达的结果优先于超时
                Some(result) = rx.recv() => {
                    if let Some(outcome) = self.settle(&account, &tasks, result) {
                        break outcome;
                    }
                }
                _ = &mut deadline => break SubmitOutcome::Timeout,
                _ = ticker.tick() => {
                    if completed.load(Ordering::SeqCst) {
                        continue;
                    }
                    if in_flight.load(Ordering::SeqCst) + tasks.len() > max_in_flight {
                        tracing::debug!("账号 {} 在途请求过多，跳过本轮", account.display_name());
                        continue;
                    }
                    round += 1;
                    for index in 0..tasks.len() {
                        self.launch(&account, &tasks, index, round, &completed, &in_flight, &tx);
                        launched += 1;
                    }
                }
            }
        };
        completed.store(true, Ordering::SeqCst);

        tracing::info!(
            "账号 {} 提交竞速结束: {}，共 {} 轮 {} 次请求，耗时 {:?}",
            account.display_name(),
            describe(&outcome),
            round,
            launched,
            started.elapsed()
        );
        outcome
    }

    /// 发出一次提交，使用任务自带的票据
    #[allow(clippy::too_many_arguments)]
    fn launch(
        &self,
        account: &Arc<Account>,
        tasks: &Arc<[ClaimTask]>,
        index: usize,
        round: u32,
        completed: &Arc<AtomicBool>,
        in_flight: &Arc<AtomicUsize>,
        tx: &mpsc::UnboundedSender<AttemptResult>,
    ) {
        let api = Arc::clone(&self.api);
        let rules = Arc::clone(&self.rules);
        let account = Arc::clone(account);
        let tasks = Arc::clone(tasks);
        let completed = Arc::clone(completed);
        let in_flight = Arc::clone(in_flight);
        let tx = tx.clone();

        in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let task = &tasks[index];
            let started = Instant::now();
            let response = api
                .submit_claim(&account, &task.ticket, std::slice::from_ref(&task.slot_id))
                .await;
            in_flight.fetch_sub(1, Ordering::SeqCst);

            if completed.load(Ordering::SeqCst) {
                tracing::debug!(
                    "账号 {} 竞速已结束，丢弃档位 {} 第 {} 轮的迟到结果",
                    task.account_id,
                    task.category,
                    round
                );
                return;
            }

            let result = response.map(|r| {
                (
                    rules.classify_submit(&r),
                    r.effective_code().map(str::to_string),
                    r.effective_message().map(str::to_string),
                )
            });
            // 接收端已退出说明竞速结束
            let _ = tx.send(AttemptResult {
                task: index,
                round,
                latency: started.elapsed(),
                result,
            });
        });
    }

    /// 处理一次返回，产生终态时返回 Some
    fn settle(
        &self,
        account: &Account,
        tasks: &[ClaimTask],
        attempt: AttemptResult,
    ) -> Option<SubmitOutcome> {
        let task = &tasks[attempt.task];
        let (verdict, code, message) = match attempt.result {
            Ok(parts) => parts,
            Err(e) if e.is_global() => return Some(SubmitOutcome::Error(e)),
            Err(e) => {
                tracing::debug!(
                    "账号 {} 档位 {} 第 {} 轮请求失败: {}",
                    account.display_name(),
                    task.category,
                    attempt.round,
                    e
                );
                return None;
            }
        };

        let report = || AttemptReport {
            category: task.category.clone(),
            slot_id: task.slot_id.clone(),
            round: attempt.round,
            code: code.clone(),
            message: message.clone(),
            latency: attempt.latency,
        };

        if !verdict.is_terminal() {
            tracing::debug!(
                "账号 {} 档位 {} 第 {} 轮未成功: {}",
                account.display_name(),
                task.category,
                attempt.round,
                message.as_deref().unwrap_or("-")
            );
            return None;
        }

        Some(match verdict {
            SubmitVerdict::Submitted => SubmitOutcome::Submitted(report()),
            SubmitVerdict::Duplicate => SubmitOutcome::Duplicate(report()),
            _ => {
                tracing::warn!(
                    "账号 {} 提交时票据失效: {}",
                    account.display_name(),
                    message.as_deref().unwrap_or("-")
                );
                SubmitOutcome::TicketInvalid
            }
        })
    }
}

fn describe(outcome: &SubmitOutcome) -> String {
    match outcome {
        SubmitOutcome::Submitted(r) => format!("成功（档位 {}，第 {} 轮）", r.category, r.round),
        SubmitOutcome::Duplicate(r) => format!("重复提交（档位 {}）", r.category),
        SubmitOutcome::TicketInvalid => "票据失效".to_string(),
        SubmitOutcome::Timeout => "超时".to_string(),
        SubmitOutcome::Interrupted => "中断".to_string(),
        SubmitOutcome::Error(e) => format!("错误: {}", e),
    }
}
