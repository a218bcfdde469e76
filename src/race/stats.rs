//! 结果汇总

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use super::outcome::RaceOutcome;

/// 汇总统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RaceStats {
    pub total: usize,
    pub submitted: usize,
    pub duplicate: usize,
    pub interrupted: usize,
    pub timed_out: usize,
    pub error: usize,
}

impl RaceStats {
    /// 已完成（成功 + 重复提交）
    pub fn completed(&self) -> usize {
        self.submitted + self.duplicate
    }

    /// 已产生结果的账号数
    pub fn finished(&self) -> usize {
        self.completed() + self.interrupted + self.timed_out + self.error
    }
}

impl std::fmt::Display for RaceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "共 {} 个账号：成功 {}，重复提交 {}，中断 {}，超时 {}，错误 {}",
            self.total, self.submitted, self.duplicate, self.interrupted, self.timed_out, self.error
        )
    }
}

/// 并发安全的结果记分板
///
/// 每个账号只记录第一次上报的结果
#[derive(Debug)]
pub struct Scoreboard {
    total: usize,
    recorded: Mutex<HashSet<String>>,
    submitted: AtomicUsize,
    duplicate: AtomicUsize,
    interrupted: AtomicUsize,
    timed_out: AtomicUsize,
    error: AtomicUsize,
}

impl Scoreboard {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            recorded: Mutex::new(HashSet::with_capacity(total)),
            submitted: AtomicUsize::new(0),
            duplicate: AtomicUsize::new(0),
            interrupted: AtomicUsize::new(0),
            timed_out: AtomicUsize::new(0),
            error: AtomicUsize::new(0),
        }
    }

    /// 记录结果，账号已有结果时返回 false 且不计数
    pub fn record(&self, account_id: &str, outcome: RaceOutcome) -> bool {
        let inserted = self
            .recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account_id.to_string());
        if !inserted {
            return false;
        }

        let counter = match outcome {
            RaceOutcome::Submitted => &self.submitted,
            RaceOutcome::Duplicate => &self.duplicate,
            RaceOutcome::Interrupted => &self.interrupted,
            RaceOutcome::TimedOut => &self.timed_out,
            RaceOutcome::Error => &self.error,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn is_recorded(&self, account_id: &str) -> bool {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(account_id)
    }

    pub fn snapshot(&self) -> RaceStats {
        RaceStats {
            total: self.total,
            submitted: self.submitted.load(Ordering::SeqCst),
            duplicate: self.duplicate.load(Ordering::SeqCst),
            interrupted: self.interrupted.load(Ordering::SeqCst),
            timed_out: self.timed_out.load(Ordering::SeqCst),
            error: self.error.load(Ordering::SeqCst),
        }
    }
}
