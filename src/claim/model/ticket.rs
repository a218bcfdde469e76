//! 票据与提交任务

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// 单次有效的准入票据
///
/// 过期时间由服务端决定且不可知，这里只记录最近一次确认有效的时间用于判断是否陈旧
#[derive(Clone)]
pub struct Ticket {
    value: Arc<str>,
    checked_at: Instant,
}

impl Ticket {
    /// 校验并包装服务端返回的票据
    ///
    /// 票据必须非空，且只包含可见 ASCII 字符
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_graphic()) {
            return None;
        }
        Some(Self {
            value: Arc::from(raw),
            checked_at: Instant::now(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// 距离获取或最近一次校验通过的时长
    pub fn age(&self) -> Duration {
        self.checked_at.elapsed()
    }

    /// 校验通过后刷新时间
    pub fn mark_checked(&mut self) {
        self.checked_at = Instant::now();
    }

    /// 超过 ttl 视为陈旧
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.value.chars().take(6).collect();
        f.debug_struct("Ticket")
            .field("value", &format_args!("{}***", prefix))
            .field("age", &self.age())
            .finish()
    }
}

/// 单个档位的提交任务
///
/// 每次竞速重新构造，不做持久化
#[derive(Debug, Clone)]
pub struct ClaimTask {
    pub category: String,
    pub slot_id: String,
    pub account_id: String,
    pub ticket: Ticket,
}

impl ClaimTask {
    /// 为账号的每个可提交档位生成任务
    pub fn for_account(account: &crate::model::account::Account, ticket: &Ticket) -> Vec<Self> {
        account
            .claim_targets()
            .into_iter()
            .map(|(category, slot_id)| Self {
                category,
                slot_id,
                account_id: account.id.clone(),
                ticket: ticket.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::account::Account;

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Ticket::parse("").is_none());
        assert!(Ticket::parse("   ").is_none());
        assert!(Ticket::parse("ab cd").is_none());
        assert!(Ticket::parse("票据").is_none());
        assert_eq!(Ticket::parse(" tk-123 ").unwrap().as_str(), "tk-123");
    }

    #[test]
    fn test_debug_masks_value() {
        let ticket = Ticket::parse("secret-ticket-value").unwrap();
        let text = format!("{:?}", ticket);
        assert!(text.contains("secret***"));
        assert!(!text.contains("secret-ticket-value"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness() {
        let ticket = Ticket::parse("tk").unwrap();
        assert!(!ticket.is_stale(Duration::from_secs(10)));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(ticket.is_stale(Duration::from_secs(10)));

        let mut ticket = ticket;
        ticket.mark_checked();
        assert!(!ticket.is_stale(Duration::from_secs(10)));
    }

    #[test]
    fn test_tasks_for_account() {
        let account = Account::new("u1", "tok")
            .with_slot("gold", "g-1")
            .with_slot("silver", "s-1");
        let ticket = Ticket::parse("tk").unwrap();
        let tasks = ClaimTask::for_account(&account, &ticket);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].category, "gold");
        assert_eq!(tasks[1].slot_id, "s-1");
        assert!(tasks.iter().all(|t| t.account_id == "u1"));
    }
}
