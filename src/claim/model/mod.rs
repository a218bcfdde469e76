//! 抢票接口数据模型
//!
//! - `envelope`: 响应外壳
//! - `ticket`: 票据与提交任务
//! - `classify`: 响应分类规则

pub mod classify;
pub mod envelope;
pub mod ticket;

pub use classify::{ResponseRules, SubmitVerdict};
pub use envelope::{ApiResponse, TicketData, Verdict};
pub use ticket::{ClaimTask, Ticket};
