//! 单账号滑动窗口限流
//!
//! 每个账号独立计数，没有全局上限。窗口被打满过一次之后，
//! 相邻两次放行之间至少间隔 `window / N`，把突发请求摊平

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Bucket {
    grants: VecDeque<Instant>,
    saturated: bool,
}

/// 滑动窗口限流器
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    spacing: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// 创建限流器，`per_second` 为每个账号每秒最大请求数
    pub fn new(per_second: usize) -> Self {
        Self::with_window(per_second, Duration::from_secs(1))
    }

    pub fn with_window(max_per_window: usize, window: Duration) -> Self {
        let max_per_window = max_per_window.max(1);
        Self {
            max_per_window,
            window,
            spacing: window / max_per_window as u32,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// 等待直到该账号可以发出下一个请求
    ///
    /// 只阻塞当前调用方，不影响其他账号
    pub async fn acquire(&self, account_id: &str) {
        loop {
            let ready_at = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets.entry(account_id.to_string()).or_default();
                let now = Instant::now();

                while bucket
                    .grants
                    .front()
                    .is_some_and(|t| *t + self.window <= now)
                {
                    bucket.grants.pop_front();
                }

                let mut ready_at = now;
                if bucket.grants.len() >= self.max_per_window {
                    if let Some(oldest) = bucket.grants.front() {
                        ready_at = ready_at.max(*oldest + self.window);
                    }
                }
                if bucket.saturated {
                    if let Some(last) = bucket.grants.back() {
                        ready_at = ready_at.max(*last + self.spacing);
                    }
                }

                if ready_at <= now {
                    bucket.grants.push_back(now);
                    if bucket.grants.len() >= self.max_per_window {
                        bucket.saturated = true;
                    }
                    return;
                }
                ready_at
            };

            tokio::time::sleep_until(ready_at).await;
        }
    }
}
