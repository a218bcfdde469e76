//! 抢票服务接入模块
//!
//! - `api`: 接口抽象
//! - `model`: 请求响应模型与分类规则
//! - `provider`: 基于 reqwest 的实现

pub mod api;
pub mod model;
pub mod provider;

pub use api::ClaimApi;
pub use provider::HttpClaimApi;
