//! 竞速结果类型

use std::time::Duration;

use serde::Serialize;

use crate::error::RaceError;

/// 单个账号的最终结果，每个账号恰好产生一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceOutcome {
    /// 提交成功
    Submitted,
    /// 已持有该档位，等同成功
    Duplicate,
    /// 被停止
    Interrupted,
    /// 阶段超时
    TimedOut,
    /// 其他错误
    Error,
}

impl RaceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Duplicate => "duplicate",
            Self::Interrupted => "interrupted",
            Self::TimedOut => "timed_out",
            Self::Error => "error",
        }
    }

    /// 成功和重复提交都算完成
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Submitted | Self::Duplicate)
    }
}

impl std::fmt::Display for RaceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 胜出的那次提交
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub category: String,
    pub slot_id: String,
    /// 发出该请求的轮次，从 1 开始
    pub round: u32,
    pub code: Option<String>,
    pub message: Option<String>,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
}

/// 一次提交竞速的结果
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Submitted(AttemptReport),
    Duplicate(AttemptReport),
    /// 票据失效，需要重新获取
    TicketInvalid,
    Timeout,
    /// 收到停止信号
    Interrupted,
    Error(RaceError),
}

/// 账号最终报告
#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account_id: String,
    pub outcome: RaceOutcome,
    pub last_error: Option<String>,
    pub tickets_used: u32,
    pub races_run: u32,
    pub winner: Option<AttemptReport>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl AccountReport {
    /// 未开始就结束的账号
    pub fn without_run(account_id: impl Into<String>, outcome: RaceOutcome, reason: Option<String>) -> Self {
        Self {
            account_id: account_id.into(),
            outcome,
            last_error: reason,
            tickets_used: 0,
            races_run: 0,
            winner: None,
            elapsed: Duration::ZERO,
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
