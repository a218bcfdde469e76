//! 代理健康池
//!
//! 为每次出站请求提供一条代理线路，跟踪失败次数，并在过期时间到达后整体失效

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::route::ProxyRoute;
use super::strategy::SelectionStrategy;
use crate::error::{RaceError, RaceResult};

type ExpiryCallback = Box<dyn FnOnce() + Send>;

/// 代理池统计
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub usable: usize,
    pub expired: bool,
    pub strategy: &'static str,
}

/// 代理健康池
///
/// 过期时间是硬约束：过期后 `next_route` 对所有调用都返回 `PoolExpired`
pub struct ProxyHealthPool {
    routes: Vec<Arc<ProxyRoute>>,
    strategy: SelectionStrategy,
    cursor: AtomicUsize,
    deadline: Option<Instant>,
    expired: AtomicBool,
    on_expire: Mutex<Option<ExpiryCallback>>,
    shutdown: CancellationToken,
}

impl ProxyHealthPool {
    /// 创建代理池
    ///
    /// `lifetime` 为空表示永不过期
    pub fn new(
        routes: Vec<ProxyRoute>,
        strategy: SelectionStrategy,
        lifetime: Option<Duration>,
    ) -> Self {
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
            strategy,
            cursor: AtomicUsize::new(0),
            deadline: lifetime.map(|d| Instant::now() + d),
            expired: AtomicBool::new(false),
            on_expire: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 检查是否已过期
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// 选择下一条可用线路
    pub fn next_route(&self) -> RaceResult<Arc<ProxyRoute>> {
        if self.is_expired() {
            self.expire();
            return Err(RaceError::PoolExpired);
        }
        if self.is_empty() {
            return Err(RaceError::PoolExhausted("pool empty".to_string()));
        }

        if let Some(route) = self.pick() {
            return Ok(route);
        }

        // 所有线路都达到失败上限时重置一次计数，避免永久饿死
        tracing::warn!("所有代理均已达到失败上限，重置失败计数");
        for route in &self.routes {
            route.reset_failures();
        }

        self.pick()
            .ok_or_else(|| RaceError::PoolExhausted("no usable route".to_string()))
    }

    fn pick(&self) -> Option<Arc<ProxyRoute>> {
        let len = self.routes.len();
        let start = self
            .strategy
            .start_index(self.cursor.fetch_add(1, Ordering::Relaxed), len);

        (0..len)
            .map(|offset| &self.routes[(start + offset) % len])
            .find(|route| route.is_usable())
            .cloned()
    }

    /// 标记线路失败
    pub fn mark_failed(&self, route: &ProxyRoute) {
        let failures = route.record_failure();
        if failures == route.max_failures {
            tracing::warn!("代理 {} 连续失败 {} 次，暂停使用", route, failures);
        } else {
            tracing::debug!("代理 {} 失败次数: {}", route, failures);
        }
    }

    /// 标记线路成功，清零失败计数
    pub fn mark_succeeded(&self, route: &ProxyRoute) {
        if route.failure_count() > 0 {
            route.reset_failures();
        }
    }

    /// 注册过期回调
    ///
    /// 如果代理池已经过期，回调立即执行
    pub fn on_expire<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.expired.load(Ordering::SeqCst) {
            callback();
            return;
        }
        let mut slot = self.on_expire.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Box::new(callback));
    }

    /// 令代理池立即过期：禁用所有线路并触发过期回调（仅一次）
    pub fn expire(&self) {
        if self.expired.swap(true, Ordering::SeqCst) {
            return;
        }
        for route in &self.routes {
            route.disable();
        }
        tracing::error!("代理池已过期，共禁用 {} 条线路", self.len());

        let callback = self
            .on_expire
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// 启动后台过期监控
    ///
    /// 没有配置过期时间时返回 None
    pub fn spawn_expiry_monitor(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let deadline = self.deadline()?;
        let pool = Arc::clone(self);
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("代理池过期监控已停止");
                }
                _ = tokio::time::sleep_until(deadline) => {
                    pool.expire();
                }
            }
        }))
    }

    /// 停止后台监控
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.len(),
            usable: self.routes.iter().filter(|r| r.is_usable()).count(),
            expired: self.is_expired(),
            strategy: self.strategy.as_str(),
        }
    }
}
