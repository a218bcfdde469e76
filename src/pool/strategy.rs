//! 代理选择策略

use serde::{Deserialize, Serialize};

/// 选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// 轮询
    #[default]
    RoundRobin,
    /// 随机
    Random,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::Random => "random",
        }
    }

    /// 本次选择的起始下标
    pub(crate) fn start_index(&self, cursor: usize, len: usize) -> usize {
        match self {
            Self::RoundRobin => cursor % len,
            Self::Random => fastrand::usize(..len),
        }
    }
}
