//! 抢票 API Provider
//!
//! 基于 reqwest 的 [`ClaimApi`] 实现，每次请求从代理池取一条线路

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::api::ClaimApi;
use super::model::{ApiResponse, Ticket, TicketData, Verdict};
use crate::error::{RaceError, RaceResult};
use crate::http_client::{ClientCache, ProxyConfig};
use crate::model::account::Account;
use crate::model::config::Config;
use crate::pool::{ProxyHealthPool, ProxyRoute};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_6_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmptyBody {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateBody<'a> {
    ticket: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    ticket: &'a str,
    category_ids: &'a [String],
}

/// 抢票 API Provider
pub struct HttpClaimApi {
    base_url: String,
    ticket_path: String,
    validate_path: String,
    submit_path: String,
    clients: ClientCache,
    pool: Option<Arc<ProxyHealthPool>>,
}

impl HttpClaimApi {
    /// 根据配置创建 Provider
    ///
    /// 传入代理池时每个请求走代理池线路，否则使用配置中的固定代理（可选）直连
    pub fn new(config: &Config, pool: Option<Arc<ProxyHealthPool>>) -> anyhow::Result<Self> {
        let direct_proxy = config.proxy_url.as_ref().map(|url| {
            let proxy = ProxyConfig::new(url);
            match (&config.proxy_username, &config.proxy_password) {
                (Some(user), Some(pass)) => proxy.with_auth(user, pass),
                _ => proxy,
            }
        });
        let clients = ClientCache::new(
            direct_proxy.as_ref(),
            Duration::from_secs(config.request_timeout_secs),
        )?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ticket_path: config.ticket_path.clone(),
            validate_path: config.validate_path.clone(),
            submit_path: config.submit_path.clone(),
            clients,
            pool,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 构建请求头
    fn build_headers(token: &str) -> RaceResult<HeaderMap> {
        let invalid = |e: reqwest::header::InvalidHeaderValue| {
            RaceError::Transient(format!("请求头无效: {}", e))
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(USER_AGENTS[fastrand::usize(..USER_AGENTS.len())]),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).map_err(invalid)?,
        );
        headers.insert(
            "x-request-id",
            HeaderValue::from_str(&Uuid::new_v4().to_string()).map_err(invalid)?,
        );
        Ok(headers)
    }

    fn fail_route(&self, route: Option<&Arc<ProxyRoute>>) {
        if let (Some(pool), Some(route)) = (&self.pool, route) {
            pool.mark_failed(route);
        }
    }

    fn pool_expired(&self) -> bool {
        self.pool.as_ref().is_some_and(|p| p.is_expired())
    }

    /// 发送 POST 请求并解析响应
    async fn post<B, T>(&self, account: &Account, path: &str, body: &B) -> RaceResult<ApiResponse<T>>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let route = match &self.pool {
            Some(pool) => Some(pool.next_route()?),
            None => None,
        };
        let client = match &route {
            Some(route) => self
                .clients
                .for_route(route)
                .map_err(|e| RaceError::Transient(format!("创建 HTTP 客户端失败: {}", e)))?,
            None => self.clients.direct(),
        };
        let headers = Self::build_headers(&account.token)?;

        let result = client
            .post(self.url(path))
            .headers(headers)
            .json(body)
            .send()
            .await;

        // 代理池过期后返回的结果一律不可信
        if self.pool_expired() {
            return Err(RaceError::PoolExpired);
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.fail_route(route.as_ref());
                return Err(RaceError::Transient(e.to_string()));
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RaceError::RateLimited(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            self.fail_route(route.as_ref());
            let body = response.text().await.unwrap_or_default();
            return Err(RaceError::Transient(format!("HTTP {} {}", status, body)));
        }

        let parsed = match response.text().await {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| RaceError::Transient(format!("响应解析失败: {}", e))),
            Err(e) => Err(RaceError::Transient(e.to_string())),
        };
        match &parsed {
            Ok(_) => {
                if let (Some(pool), Some(route)) = (&self.pool, &route) {
                    pool.mark_succeeded(route);
                }
            }
            Err(_) => self.fail_route(route.as_ref()),
        }
        parsed
    }
}

#[async_trait]
impl ClaimApi for HttpClaimApi {
    async fn request_ticket(&self, account: &Account) -> RaceResult<ApiResponse<TicketData>> {
        self.post(account, &self.ticket_path, &EmptyBody {}).await
    }

    async fn validate_ticket(
        &self,
        account: &Account,
        ticket: &Ticket,
    ) -> RaceResult<ApiResponse<Verdict>> {
        let body = ValidateBody {
            ticket: ticket.as_str(),
        };
        self.post(account, &self.validate_path, &body).await
    }

    async fn submit_claim(
        &self,
        account: &Account,
        ticket: &Ticket,
        category_ids: &[String],
    ) -> RaceResult<ApiResponse<Verdict>> {
        let body = SubmitBody {
            ticket: ticket.as_str(),
            category_ids,
        };
        self.post(account, &self.submit_path, &body).await
    }
}
