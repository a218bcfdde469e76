//! 票据获取
//!
//! 在限流约束下反复请求票据，直到拿到格式正确的票据或超时。
//! 没有重试次数上限，唯一的边界是调用方给出的总超时

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::rate_limit::RateLimiter;
use crate::claim::model::{ResponseRules, Ticket};
use crate::claim::ClaimApi;
use crate::error::{RaceError, RaceResult};
use crate::model::account::Account;
use crate::model::config::Config;

/// 票据获取的退避参数
#[derive(Debug, Clone)]
pub struct AcquireSettings {
    /// 普通失败后的等待
    pub retry_interval: Duration,
    /// 被限流后的等待
    pub rate_limited_backoff: Duration,
    /// 代理池无可用线路时的等待
    pub pool_exhausted_delay: Duration,
}

impl AcquireSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry_interval: Duration::from_millis(config.ticket_retry_interval_ms),
            rate_limited_backoff: Duration::from_millis(config.rate_limited_backoff_ms),
            pool_exhausted_delay: Duration::from_millis(config.pool_exhausted_delay_ms),
        }
    }
}

/// 票据获取器
pub struct TicketAcquirer {
    api: Arc<dyn ClaimApi>,
    limiter: Arc<RateLimiter>,
    rules: Arc<ResponseRules>,
    settings: AcquireSettings,
}

impl TicketAcquirer {
    pub fn new(
        api: Arc<dyn ClaimApi>,
        limiter: Arc<RateLimiter>,
        rules: Arc<ResponseRules>,
        settings: AcquireSettings,
    ) -> Self {
        Self {
            api,
            limiter,
            rules,
            settings,
        }
    }

    /// 获取一张有效票据
    ///
    /// 超时从调用开始计算，超时错误中的尝试次数等于实际发出的请求数
    pub async fn acquire_ticket(
        &self,
        account: &Account,
        timeout: Duration,
        stop: &CancellationToken,
    ) -> RaceResult<Ticket> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut attempts = 0u32;

        loop {
            let step = tokio::select! {
                biased;
                _ = stop.cancelled() => return Err(RaceError::Stopped),
                step = tokio::time::timeout_at(deadline, self.attempt(account, &mut attempts)) => step,
            };

            match step {
                Ok(Ok(Some(ticket))) => {
                    tracing::info!(
                        "账号 {} 获取票据成功，尝试 {} 次，耗时 {:?}",
                        account.display_name(),
                        attempts,
                        start.elapsed()
                    );
                    return Ok(ticket);
                }
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    let elapsed = start.elapsed();
                    tracing::warn!(
                        "账号 {} 获取票据超时，尝试 {} 次，耗时 {:?}",
                        account.display_name(),
                        attempts,
                        elapsed
                    );
                    return Err(RaceError::CapacityTimeout {
                        stage: "ticket",
                        attempts,
                        elapsed,
                    });
                }
            }
        }
    }

    /// 单次尝试，失败时在返回前完成退避
    ///
    /// 返回 `Ok(None)` 表示需要继续重试，`Err` 只用于全局错误
    async fn attempt(&self, account: &Account, attempts: &mut u32) -> RaceResult<Option<Ticket>> {
        self.limiter.acquire(&account.id).await;
        *attempts += 1;

        let backoff = match self.api.request_ticket(account).await {
            Ok(response) => {
                let ticket = response
                    .data
                    .as_ref()
                    .and_then(|d| d.ticket.as_deref())
                    .filter(|_| response.success)
                    .and_then(Ticket::parse);
                if let Some(ticket) = ticket {
                    return Ok(Some(ticket));
                }

                if self.rules.is_rate_limited(&response) {
                    tracing::warn!("账号 {} 获取票据被限流", account.display_name());
                    self.settings.rate_limited_backoff
                } else {
                    tracing::debug!(
                        "账号 {} 票据响应无效: {}",
                        account.display_name(),
                        response.message.as_deref().unwrap_or("-")
                    );
                    self.settings.retry_interval
                }
            }
            Err(e) if e.is_global() => return Err(e),
            Err(e) if e.is_rate_limited() => {
                tracing::warn!("账号 {} 获取票据被限流: {}", account.display_name(), e);
                self.settings.rate_limited_backoff
            }
            Err(RaceError::PoolExhausted(msg)) => {
                tracing::warn!("账号 {} 暂无可用代理: {}", account.display_name(), msg);
                self.settings.pool_exhausted_delay
            }
            Err(e) => {
                tracing::debug!("账号 {} 获取票据失败: {}", account.display_name(), e);
                self.settings.retry_interval
            }
        };

        tokio::time::sleep(backoff).await;
        Ok(None)
    }
}
