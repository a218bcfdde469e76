//! 抢票流程错误类型

use std::time::Duration;
use thiserror::Error;

/// 抢票各阶段的错误
///
/// 阶段内错误不会越过 [`AccountRaceController`](crate::race::AccountRaceController)，
/// 只有 `PoolExpired` 会升级为全局停止信号
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaceError {
    /// 网络层瞬时错误（连接失败、非 2xx、响应体无法解析）
    #[error("网络错误: {0}")]
    Transient(String),

    /// 请求过于频繁
    #[error("请求过于频繁: {0}")]
    RateLimited(String),

    /// 票据校验被拒绝
    #[error("票据被拒绝: {0}")]
    TokenRejected(String),

    /// 提交过程中票据失效
    #[error("提交过程中票据失效")]
    TokenExpiredMidRace,

    /// 阶段超时
    #[error("{stage} 阶段超时: 共尝试 {attempts} 次，耗时 {elapsed:?}")]
    CapacityTimeout {
        stage: &'static str,
        attempts: u32,
        elapsed: Duration,
    },

    /// 没有可用代理
    #[error("代理池不可用: {0}")]
    PoolExhausted(String),

    /// 代理池已过期
    #[error("代理池已过期")]
    PoolExpired,

    /// 账号没有可提交的档位
    #[error("没有可提交的档位")]
    NothingToClaim,

    /// 收到停止信号
    #[error("已停止")]
    Stopped,
}

impl RaceError {
    /// 是否需要按限流退避
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// 是否为全局致命错误
    pub fn is_global(&self) -> bool {
        matches!(self, Self::PoolExpired)
    }
}

pub type RaceResult<T> = Result<T, RaceError>;
