//! 代理池模块
//!
//! 提供代理线路管理、轮询选择、失败追踪和过期控制功能

pub mod manager;
pub mod route;
pub mod strategy;

pub use manager::{PoolStats, ProxyHealthPool};
pub use route::ProxyRoute;
pub use strategy::SelectionStrategy;
