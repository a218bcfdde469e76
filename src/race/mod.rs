//! 抢票核心流程
//!
//! - `rate_limit`: 按账号的滑动窗口限流
//! - `acquirer`: 票据获取
//! - `validator`: 票据校验
//! - `submission`: 多档位提交竞速
//! - `controller`: 单账号状态机
//! - `orchestrator`: 多账号调度
//! - `outcome` / `stats`: 结果与汇总

pub mod acquirer;
pub mod controller;
pub mod orchestrator;
pub mod outcome;
pub mod rate_limit;
pub mod stats;
pub mod submission;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use acquirer::TicketAcquirer;
pub use controller::{AccountRaceController, RaceContext, RaceState};
pub use orchestrator::RaceOrchestrator;
pub use outcome::{AccountReport, AttemptReport, RaceOutcome, SubmitOutcome};
pub use rate_limit::RateLimiter;
pub use stats::{RaceStats, Scoreboard};
pub use submission::SubmissionRace;
pub use validator::{TicketValidator, Validation};
