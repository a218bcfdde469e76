//! 抢票接口抽象

use async_trait::async_trait;

use super::model::{ApiResponse, Ticket, TicketData, Verdict};
use crate::error::RaceResult;
use crate::model::account::Account;

/// 抢票服务的三个接口
///
/// `Err` 只表示传输层失败（网络、限流、代理池），
/// 业务层拒绝通过 `Ok` 中 `success: false` 返回
#[async_trait]
pub trait ClaimApi: Send + Sync {
    /// 获取票据
    async fn request_ticket(&self, account: &Account) -> RaceResult<ApiResponse<TicketData>>;

    /// 校验票据
    async fn validate_ticket(
        &self,
        account: &Account,
        ticket: &Ticket,
    ) -> RaceResult<ApiResponse<Verdict>>;

    /// 提交抢位请求
    async fn submit_claim(
        &self,
        account: &Account,
        ticket: &Ticket,
        category_ids: &[String],
    ) -> RaceResult<ApiResponse<Verdict>>;
}
