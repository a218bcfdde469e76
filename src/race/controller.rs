//! 单账号抢票状态机
//!
//! ```text
//! AcquiringTicket ──► Validating ──► Racing ──► Done
//!        ▲                │             │
//!        └──── 拒绝 ──────┘             │
//!        └──── 票据失效 ────────────────┘
//! ```
//!
//! 任意状态收到停止信号都会进入 `Stopped`

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::acquirer::{AcquireSettings, TicketAcquirer};
use super::outcome::{AccountReport, AttemptReport, RaceOutcome, SubmitOutcome};
use super::rate_limit::RateLimiter;
use super::submission::{RaceSettings, SubmissionRace};
use super::validator::TicketValidator;
use crate::claim::model::{ClaimTask, ResponseRules, Ticket};
use crate::claim::ClaimApi;
use crate::error::RaceError;
use crate::model::account::{Account, AccountStatus};
use crate::model::config::Config;

/// 状态机参数
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub ticket_timeout: Duration,
    pub validation_retry_delay: Duration,
    /// 票据超过该时长未确认即重新校验
    pub ticket_ttl: Duration,
    /// 连续超时或出错的竞速次数上限，0 表示不限
    pub max_race_retries: u32,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ticket_timeout: Duration::from_secs(config.ticket_timeout_secs),
            validation_retry_delay: Duration::from_millis(config.validation_retry_delay_ms),
            ticket_ttl: Duration::from_secs(config.ticket_ttl_secs),
            max_race_retries: config.max_race_retries,
        }
    }
}

/// 所有账号共享的组件
pub struct RaceContext {
    pub acquirer: TicketAcquirer,
    pub validator: TicketValidator,
    pub race: SubmissionRace,
    pub settings: ControllerSettings,
}

impl RaceContext {
    /// 按配置组装，票据获取和校验共用同一个限流器
    pub fn from_config(api: Arc<dyn ClaimApi>, config: &Config) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.requests_per_second));
        let rules = Arc::new(ResponseRules::from_config(config));
        Self {
            acquirer: TicketAcquirer::new(
                Arc::clone(&api),
                Arc::clone(&limiter),
                Arc::clone(&rules),
                AcquireSettings::from_config(config),
            ),
            validator: TicketValidator::new(Arc::clone(&api), limiter),
            race: SubmissionRace::new(api, rules, RaceSettings::from_config(config)),
            settings: ControllerSettings::from_config(config),
        }
    }
}

/// 状态机的状态
#[derive(Debug)]
pub enum RaceState {
    AcquiringTicket,
    Validating(Ticket),
    Racing(Ticket),
    Done(RaceOutcome),
    Stopped,
}

/// 单账号控制器
///
/// 状态、最近错误等都只在控制器内部可见，对外只产出 [`AccountReport`]
pub struct AccountRaceController {
    account: Arc<Account>,
    ctx: Arc<RaceContext>,
    stop: CancellationToken,
    status: AccountStatus,
    last_error: Option<RaceError>,
    tickets_used: u32,
    races_run: u32,
    race_failures: u32,
    winner: Option<AttemptReport>,
}

impl AccountRaceController {
    pub fn new(account: Arc<Account>, ctx: Arc<RaceContext>, stop: CancellationToken) -> Self {
        Self {
            account,
            ctx,
            stop,
            status: AccountStatus::Pending,
            last_error: None,
            tickets_used: 0,
            races_run: 0,
            race_failures: 0,
            winner: None,
        }
    }

    /// 运行到终态并生成报告
    pub async fn run(mut self) -> AccountReport {
        let started = Instant::now();

        let mut state = if self.account.claim_targets().is_empty() {
            tracing::warn!("账号 {} 没有可提交的档位", self.account.display_name());
            self.last_error = Some(RaceError::NothingToClaim);
            RaceState::Done(RaceOutcome::Error)
        } else {
            RaceState::AcquiringTicket
        };

        loop {
            if self.stop.is_cancelled()
                && !matches!(state, RaceState::Done(_) | RaceState::Stopped)
            {
                state = RaceState::Stopped;
            }

            state = match state {
                RaceState::AcquiringTicket => self.on_acquiring().await,
                RaceState::Validating(ticket) => self.on_validating(ticket).await,
                RaceState::Racing(ticket) => self.on_racing(ticket).await,
                RaceState::Done(outcome) => {
                    self.set_status(AccountStatus::Done);
                    return self.finish(outcome, started);
                }
                RaceState::Stopped => {
                    self.set_status(AccountStatus::Stopped);
                    return self.finish(RaceOutcome::Interrupted, started);
                }
            };
        }
    }

    async fn on_acquiring(&mut self) -> RaceState {
        self.set_status(AccountStatus::AcquiringTicket);
        let result = self
            .ctx
            .acquirer
            .acquire_ticket(&self.account, self.ctx.settings.ticket_timeout, &self.stop)
            .await;

        match result {
            Ok(ticket) => {
                self.tickets_used += 1;
                RaceState::Validating(ticket)
            }
            Err(e) => self.fail(e),
        }
    }

    async fn on_validating(&mut self, mut ticket: Ticket) -> RaceState {
        self.set_status(AccountStatus::Validating);
        let result = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return RaceState::Stopped,
            result = self.ctx.validator.validate(&self.account, &ticket) => result,
        };

        let validation = match result {
            Ok(validation) => validation,
            Err(e) => return self.fail(e),
        };
        if validation.accepted {
            ticket.mark_checked();
            return RaceState::Racing(ticket);
        }

        self.last_error = validation.to_error();
        if validation.retryable {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return RaceState::Stopped,
                _ = tokio::time::sleep(self.ctx.settings.validation_retry_delay) => {}
            }
        }
        RaceState::AcquiringTicket
    }

    async fn on_racing(&mut self, ticket: Ticket) -> RaceState {
        self.set_status(AccountStatus::Racing);
        self.races_run += 1;

        let tasks = ClaimTask::for_account(&self.account, &ticket);
        let started = Instant::now();
        let outcome = self
            .ctx
            .race
            .run(Arc::clone(&self.account), tasks, ticket.clone(), &self.stop)
            .await;

        match outcome {
            SubmitOutcome::Submitted(report) => {
                self.winner = Some(report);
                RaceState::Done(RaceOutcome::Submitted)
            }
            SubmitOutcome::Duplicate(report) => {
                tracing::info!(
                    "账号 {} 已持有档位 {}，按完成处理",
                    self.account.display_name(),
                    report.category
                );
                self.winner = Some(report);
                RaceState::Done(RaceOutcome::Duplicate)
            }
            SubmitOutcome::TicketInvalid => {
                self.last_error = Some(RaceError::TokenExpiredMidRace);
                self.race_failures = 0;
                RaceState::AcquiringTicket
            }
            SubmitOutcome::Interrupted => RaceState::Stopped,
            SubmitOutcome::Timeout => {
                let error = RaceError::CapacityTimeout {
                    stage: "race",
                    attempts: self.races_run,
                    elapsed: started.elapsed(),
                };
                self.retry_race(ticket, error, RaceOutcome::TimedOut)
            }
            SubmitOutcome::Error(e) if e.is_global() => self.fail(e),
            SubmitOutcome::Error(RaceError::NothingToClaim) => {
                self.last_error = Some(RaceError::NothingToClaim);
                RaceState::Done(RaceOutcome::Error)
            }
            SubmitOutcome::Error(e) => self.retry_race(ticket, e, RaceOutcome::Error),
        }
    }

    /// 非终态的竞速结果：同一张票据再来一次，连续失败过多则放弃
    fn retry_race(&mut self, ticket: Ticket, error: RaceError, give_up: RaceOutcome) -> RaceState {
        self.race_failures += 1;
        tracing::warn!(
            "账号 {} 第 {} 次竞速未完成: {}",
            self.account.display_name(),
            self.race_failures,
            error
        );
        self.last_error = Some(error);

        let limit = self.ctx.settings.max_race_retries;
        if limit > 0 && self.race_failures >= limit {
            tracing::warn!(
                "账号 {} 连续 {} 次竞速未完成，放弃",
                self.account.display_name(),
                self.race_failures
            );
            return RaceState::Done(give_up);
        }

        if ticket.is_stale(self.ctx.settings.ticket_ttl) {
            tracing::info!("账号 {} 票据已陈旧，重新校验", self.account.display_name());
            RaceState::Validating(ticket)
        } else {
            RaceState::Racing(ticket)
        }
    }

    /// 阶段错误转换为下一状态
    fn fail(&mut self, error: RaceError) -> RaceState {
        let next = match &error {
            RaceError::Stopped => RaceState::Stopped,
            RaceError::PoolExpired => {
                tracing::error!(
                    "账号 {} 遇到代理池过期，停止全部账号",
                    self.account.display_name()
                );
                self.stop.cancel();
                RaceState::Stopped
            }
            RaceError::CapacityTimeout { .. } => RaceState::Done(RaceOutcome::TimedOut),
            _ => RaceState::Done(RaceOutcome::Error),
        };
        if error != RaceError::Stopped {
            self.last_error = Some(error);
        }
        next
    }

    fn set_status(&mut self, status: AccountStatus) {
        if self.status != status {
            tracing::debug!(
                "账号 {} 状态: {} -> {}",
                self.account.display_name(),
                self.status,
                status
            );
            self.status = status;
        }
    }

    fn finish(self, outcome: RaceOutcome, started: Instant) -> AccountReport {
        let elapsed = started.elapsed();
        match &self.last_error {
            Some(e) if !outcome.is_completed() => tracing::warn!(
                "账号 {} 结束: {}，最近错误: {}，耗时 {:?}",
                self.account.display_name(),
                outcome,
                e,
                elapsed
            ),
            _ => tracing::info!(
                "账号 {} 结束: {}，票据 {} 张，竞速 {} 次，耗时 {:?}",
                self.account.display_name(),
                outcome,
                self.tickets_used,
                self.races_run,
                elapsed
            ),
        }

        AccountReport {
            account_id: self.account.id.clone(),
            outcome,
            last_error: self.last_error.map(|e| e.to_string()),
            tickets_used: self.tickets_used,
            races_run: self.races_run,
            winner: self.winner,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::testing::{accepted, rejected, transient, ScriptedApi, Step};

    fn config() -> Config {
        let mut config = Config::default();
        config.requests_per_second = 100;
        config.ticket_retry_interval_ms = 100;
        config.rate_limited_backoff_ms = 500;
        config.ticket_timeout_secs = 5;
        config.validation_retry_delay_ms = 300;
        config.submit_round_interval_ms = 200;
        config.race_timeout_secs = 1;
        config.max_race_retries = 2;
        config.ticket_ttl_secs = 60;
        config.duplicate_codes = vec!["40901".to_string()];
        config.ticket_invalid_codes = vec!["40101".to_string()];
        config
    }

    fn account() -> Arc<Account> {
        Arc::new(Account::new("u1", "tok").with_slot("gold", "g-1"))
    }

    async fn run_with(api: Arc<ScriptedApi>, config: &Config, stop: CancellationToken) -> AccountReport {
        let ctx = Arc::new(RaceContext::from_config(api, config));
        AccountRaceController::new(account(), ctx, stop).run().await
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path() {
        let api = Arc::new(ScriptedApi::new());
        api.push_submit("g-1", Step::now(accepted()));

        let report = run_with(api.clone(), &config(), CancellationToken::new()).await;
        assert_eq!(report.outcome, RaceOutcome::Submitted);
        assert_eq!(report.tickets_used, 1);
        assert_eq!(report.races_run, 1);
        assert_eq!(report.winner.unwrap().slot_id, "g-1");
        assert_eq!(api.events(), vec!["ticket", "validate", "submit:g-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_validation_reacquires_before_submit() {
        let api = Arc::new(ScriptedApi::new());
        api.push_validation(Step::now(rejected(Some("403"), "ticket used")));
        api.push_submit("g-1", Step::now(accepted()));

        let report = run_with(api.clone(), &config(), CancellationToken::new()).await;
        assert_eq!(report.outcome, RaceOutcome::Submitted);
        assert_eq!(report.tickets_used, 2);

        let events = api.events();
        let second_ticket = events
            .iter()
            .enumerate()
            .filter(|(_, e)| *e == "ticket")
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        let first_submit = events.iter().position(|e| e.starts_with("submit")).unwrap();
        assert!(second_ticket < first_submit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_validation_waits_before_reacquire() {
        let api = Arc::new(ScriptedApi::new());
        api.push_validation(Step::now(transient()));
        api.push_submit("g-1", Step::now(accepted()));
        let start = Instant::now();

        let report = run_with(api.clone(), &config(), CancellationToken::new()).await;
        assert_eq!(report.outcome, RaceOutcome::Submitted);
        assert_eq!(api.tickets(), 2);
        assert!(Instant::now() - start >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_is_done() {
        let api = Arc::new(ScriptedApi::new());
        api.push_submit("g-1", Step::now(rejected(Some("40901"), "already held")));

        let report = run_with(api, &config(), CancellationToken::new()).await;
        assert_eq!(report.outcome, RaceOutcome::Duplicate);
        assert!(report.outcome.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_invalid_reacquires() {
        let api = Arc::new(ScriptedApi::new());
        api.push_submit("g-1", Step::now(rejected(Some("40101"), "ticket expired")));
        api.push_submit("g-1", Step::now(accepted()));

        let report = run_with(api.clone(), &config(), CancellationToken::new()).await;
        assert_eq!(report.outcome, RaceOutcome::Submitted);
        assert_eq!(report.tickets_used, 2);
        assert_eq!(report.races_run, 2);
        assert_eq!(
            api.events(),
            vec!["ticket", "validate", "submit:g-1", "ticket", "validate", "submit:g-1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_timeout() {
        let api = Arc::new(ScriptedApi::new().with_ticket_default(Step::now(transient())));
        let start = Instant::now();

        let report = run_with(api.clone(), &config(), CancellationToken::new()).await;
        assert_eq!(report.outcome, RaceOutcome::TimedOut);
        assert_eq!(report.tickets_used, 0);
        assert_eq!(api.submits(), 0);
        assert!(Instant::now() - start >= Duration::from_secs(5));
        assert!(report.last_error.unwrap().contains("ticket"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_race_retries() {
        let api = Arc::new(ScriptedApi::new());

        let report = run_with(api.clone(), &config(), CancellationToken::new()).await;
        assert_eq!(report.outcome, RaceOutcome::TimedOut);
        assert_eq!(report.races_run, 2);
        assert_eq!(report.tickets_used, 1);
        assert_eq!(api.validations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ticket_is_revalidated() {
        let api = Arc::new(ScriptedApi::new());
        let mut config = config();
        config.ticket_ttl_secs = 1;

        let report = run_with(api.clone(), &config, CancellationToken::new()).await;
        assert_eq!(report.outcome, RaceOutcome::TimedOut);
        assert_eq!(api.validations(), 2);
        assert_eq!(api.tickets(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_makes_no_calls() {
        let api = Arc::new(ScriptedApi::new());
        let stop = CancellationToken::new();
        stop.cancel();

        let report = run_with(api.clone(), &config(), stop).await;
        assert_eq!(report.outcome, RaceOutcome::Interrupted);
        assert!(api.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_race() {
        let api = Arc::new(ScriptedApi::new());
        let mut config = config();
        config.race_timeout_secs = 60;
        let stop = CancellationToken::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let report = run_with(api.clone(), &config, stop).await;
        assert_eq!(report.outcome, RaceOutcome::Interrupted);
        let calls = api.submits();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.submits(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_expiry_cancels_global_stop() {
        let api = Arc::new(ScriptedApi::new());
        api.push_ticket(Step::now(Err(RaceError::PoolExpired)));
        let stop = CancellationToken::new();

        let report = run_with(api, &config(), stop.clone()).await;
        assert_eq!(report.outcome, RaceOutcome::Interrupted);
        assert!(stop.is_cancelled());
        assert_eq!(report.last_error.as_deref(), Some("代理池已过期"));
    }

    #[tokio::test]
    async fn test_no_targets_is_error_without_calls() {
        let api = Arc::new(ScriptedApi::new());
        let ctx = Arc::new(RaceContext::from_config(api.clone(), &config()));
        let mut account = Account::new("u2", "tok");
        account.categories.push("gold".to_string());

        let report = AccountRaceController::new(Arc::new(account), ctx, CancellationToken::new())
            .run()
            .await;
        assert_eq!(report.outcome, RaceOutcome::Error);
        assert!(api.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_config_keeps_racing_until_stopped() {
        let api = Arc::new(ScriptedApi::new());
        api.set_submit_default(Step::now(transient()));
        let mut config = Config::default();
        config.race_timeout_secs = 1;

        let stop = CancellationToken::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5500)).await;
            trigger.cancel();
        });

        let report = run_with(api.clone(), &config, stop).await;
        assert_eq!(report.outcome, RaceOutcome::Interrupted);
        assert!(report.races_run >= 5, "only {} races", report.races_run);
        assert_eq!(report.tickets_used, 1);
    }
}
