//! 票据校验

use std::sync::Arc;

use super::rate_limit::RateLimiter;
use crate::claim::model::Ticket;
use crate::claim::ClaimApi;
use crate::error::{RaceError, RaceResult};
use crate::model::account::Account;

/// 校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub accepted: bool,
    /// 传输失败或响应无法解析时为 true；服务端明确拒绝时为 false
    pub retryable: bool,
    pub reason: Option<String>,
}

impl Validation {
    fn accepted() -> Self {
        Self {
            accepted: true,
            retryable: false,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            retryable: false,
            reason: Some(reason.into()),
        }
    }

    fn retry(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            retryable: true,
            reason: Some(reason.into()),
        }
    }

    /// 转换为错误描述，供调用方记录
    pub fn to_error(&self) -> Option<RaceError> {
        if self.accepted {
            return None;
        }
        let reason = self.reason.clone().unwrap_or_default();
        Some(if self.retryable {
            RaceError::Transient(reason)
        } else {
            RaceError::TokenRejected(reason)
        })
    }
}

/// 票据校验器
pub struct TicketValidator {
    api: Arc<dyn ClaimApi>,
    limiter: Arc<RateLimiter>,
}

impl TicketValidator {
    pub fn new(api: Arc<dyn ClaimApi>, limiter: Arc<RateLimiter>) -> Self {
        Self { api, limiter }
    }

    /// 提交一次校验
    ///
    /// 除非服务端明确表示失败，否则视为通过。只有代理池过期会返回 `Err`
    pub async fn validate(&self, account: &Account, ticket: &Ticket) -> RaceResult<Validation> {
        self.limiter.acquire(&account.id).await;

        let validation = match self.api.validate_ticket(account, ticket).await {
            Ok(response) if response.is_explicit_failure() => Validation::rejected(
                response
                    .effective_message()
                    .or(response.effective_code())
                    .unwrap_or("校验未通过"),
            ),
            Ok(_) => Validation::accepted(),
            Err(e) if e.is_global() => return Err(e),
            Err(e) => Validation::retry(e.to_string()),
        };

        if validation.accepted {
            tracing::info!("账号 {} 票据校验通过", account.display_name());
        } else {
            tracing::warn!(
                "账号 {} 票据校验未通过: {}",
                account.display_name(),
                validation.reason.as_deref().unwrap_or("-")
            );
        }
        Ok(validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::model::{ApiResponse, Verdict};
    use crate::race::testing::{accepted, rejected, transient, ScriptedApi, Step};

    fn validator(api: Arc<ScriptedApi>) -> TicketValidator {
        TicketValidator::new(api, Arc::new(RateLimiter::new(10)))
    }

    fn ticket() -> Ticket {
        Ticket::parse("tk").unwrap()
    }

    #[tokio::test]
    async fn test_accepted() {
        let api = Arc::new(ScriptedApi::new());
        api.push_validation(Step::now(accepted()));
        let v = validator(api.clone())
            .validate(&Account::new("u1", "t"), &ticket())
            .await
            .unwrap();
        assert!(v.accepted);
        assert!(v.to_error().is_none());
        assert_eq!(api.validations(), 1);
    }

    #[tokio::test]
    async fn test_missing_verdict_counts_as_accepted() {
        let api = Arc::new(ScriptedApi::new());
        api.push_validation(Step::now(Ok(ApiResponse {
            success: true,
            data: None::<Verdict>,
            code: None,
            message: None,
        })));
        let v = validator(api)
            .validate(&Account::new("u1", "t"), &ticket())
            .await
            .unwrap();
        assert!(v.accepted);
    }

    #[tokio::test]
    async fn test_explicit_rejection() {
        let api = Arc::new(ScriptedApi::new());
        api.push_validation(Step::now(rejected(Some("403"), "ticket used")));
        let v = validator(api)
            .validate(&Account::new("u1", "t"), &ticket())
            .await
            .unwrap();
        assert!(!v.accepted);
        assert!(!v.retryable);
        assert_eq!(v.reason.as_deref(), Some("ticket used"));
        assert!(matches!(v.to_error(), Some(RaceError::TokenRejected(_))));
    }

    #[tokio::test]
    async fn test_outer_failure_rejects() {
        let api = Arc::new(ScriptedApi::new());
        api.push_validation(Step::now(Ok(ApiResponse::fail(Some("E1"), "bad"))));
        let v = validator(api)
            .validate(&Account::new("u1", "t"), &ticket())
            .await
            .unwrap();
        assert!(!v.accepted);
    }

    #[tokio::test]
    async fn test_transport_error_is_retryable() {
        let api = Arc::new(ScriptedApi::new());
        api.push_validation(Step::now(transient()));
        let v = validator(api)
            .validate(&Account::new("u1", "t"), &ticket())
            .await
            .unwrap();
        assert!(!v.accepted);
        assert!(v.retryable);
    }

    #[tokio::test]
    async fn test_pool_expired_propagates() {
        let api = Arc::new(ScriptedApi::new());
        api.push_validation(Step::now(Err(RaceError::PoolExpired)));
        let err = validator(api)
            .validate(&Account::new("u1", "t"), &ticket())
            .await
            .unwrap_err();
        assert_eq!(err, RaceError::PoolExpired);
    }
}
