use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::pool::SelectionStrategy;

/// 抢票应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// 目标服务地址
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_ticket_path")]
    pub ticket_path: String,

    #[serde(default = "default_validate_path")]
    pub validate_path: String,

    #[serde(default = "default_submit_path")]
    pub submit_path: String,

    /// 单账号每秒最大请求数
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: usize,

    /// 获取票据失败后的等待时间（毫秒）
    #[serde(default = "default_ticket_retry_interval_ms")]
    pub ticket_retry_interval_ms: u64,

    /// 被限流后的等待时间（毫秒）
    #[serde(default = "default_rate_limited_backoff_ms")]
    pub rate_limited_backoff_ms: u64,

    /// 获取票据阶段总超时（秒）
    #[serde(default = "default_ticket_timeout_secs")]
    pub ticket_timeout_secs: u64,

    /// 票据校验可重试失败后的等待时间（毫秒）
    #[serde(default = "default_validation_retry_delay_ms")]
    pub validation_retry_delay_ms: u64,

    /// 提交轮次间隔（毫秒）
    #[serde(default = "default_submit_round_interval_ms")]
    pub submit_round_interval_ms: u64,

    /// 单次提交竞速的超时（秒）
    #[serde(default = "default_race_timeout_secs")]
    pub race_timeout_secs: u64,

    /// 每个提交任务允许同时在途的请求数，至少为 2，保证新一轮不必等待上一轮返回
    #[serde(default = "default_max_in_flight_per_task")]
    pub max_in_flight_per_task: usize,

    /// 连续超时或出错的竞速次数上限，0 表示不限，一直竞速到出结果或停止
    #[serde(default = "default_max_race_retries")]
    pub max_race_retries: u32,

    /// 票据视为过期前的存活时间（秒）
    #[serde(default = "default_ticket_ttl_secs")]
    pub ticket_ttl_secs: u64,

    /// 代理池无可用代理时的等待时间（毫秒）
    #[serde(default = "default_pool_exhausted_delay_ms")]
    pub pool_exhausted_delay_ms: u64,

    /// 同时运行的账号数量，0 表示不限制
    #[serde(default)]
    pub max_concurrent_accounts: usize,

    /// 单个 HTTP 请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// 单个代理允许的最大失败次数
    #[serde(default = "default_proxy_max_failures")]
    pub proxy_max_failures: u32,

    #[serde(default)]
    pub proxy_strategy: SelectionStrategy,

    /// 代理池过期时间 (RFC3339 格式)
    #[serde(default)]
    pub proxy_expires_at: Option<DateTime<Utc>>,

    /// 代理池有效期（秒），与 proxy_expires_at 同时配置时取较早者
    #[serde(default)]
    pub proxy_lifetime_secs: Option<u64>,

    /// 固定 HTTP 代理地址（可选，未配置代理池时使用）
    /// 支持格式: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// 代理认证用户名（可选）
    #[serde(default)]
    pub proxy_username: Option<String>,

    /// 代理认证密码（可选）
    #[serde(default)]
    pub proxy_password: Option<String>,

    /// 表示"已提交过"的响应码
    #[serde(default)]
    pub duplicate_codes: Vec<String>,

    /// 表示"已提交过"的消息片段（响应码缺失时的兜底判断）
    #[serde(default = "default_duplicate_markers")]
    pub duplicate_markers: Vec<String>,

    /// 表示票据失效的响应码
    #[serde(default)]
    pub ticket_invalid_codes: Vec<String>,

    #[serde(default = "default_ticket_invalid_markers")]
    pub ticket_invalid_markers: Vec<String>,

    /// 表示限流的响应码
    #[serde(default = "default_rate_limited_codes")]
    pub rate_limited_codes: Vec<String>,

    #[serde(default = "default_rate_limited_markers")]
    pub rate_limited_markers: Vec<String>,

    /// 结果审计日志路径（JSON Lines，可选）
    #[serde(default)]
    pub audit_log: Option<String>,

    /// 进度日志间隔（秒），0 表示关闭
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

impl Config {
    /// 从环境变量覆盖配置
    pub fn override_from_env(&mut self) {
        if let Ok(url) = env::var("BASE_URL") {
            self.base_url = url;
        }
        if let Some(v) = env_parse("REQUESTS_PER_SECOND") {
            self.requests_per_second = v;
        }
        if let Some(v) = env_parse("TICKET_TIMEOUT_SECS") {
            self.ticket_timeout_secs = v;
        }
        if let Some(v) = env_parse("SUBMIT_ROUND_INTERVAL_MS") {
            self.submit_round_interval_ms = v;
        }
        if let Some(v) = env_parse("RACE_TIMEOUT_SECS") {
            self.race_timeout_secs = v;
        }
        if let Some(v) = env_parse("MAX_CONCURRENT_ACCOUNTS") {
            self.max_concurrent_accounts = v;
        }
        if let Some(v) = env_parse("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v;
        }
        if let Ok(expires_at) = env::var("PROXY_EXPIRES_AT") {
            match DateTime::parse_from_rfc3339(&expires_at) {
                Ok(t) => self.proxy_expires_at = Some(t.with_timezone(&Utc)),
                Err(e) => tracing::warn!("PROXY_EXPIRES_AT 格式无效，已忽略: {}", e),
            }
        }
        if let Some(v) = env_parse("PROXY_LIFETIME_SECS") {
            self.proxy_lifetime_secs = Some(v);
        }
        if let Ok(proxy) = env::var("PROXY_URL") {
            self.proxy_url = Some(proxy);
        }
        if let Ok(username) = env::var("PROXY_USERNAME") {
            self.proxy_username = Some(username);
        }
        if let Ok(password) = env::var("PROXY_PASSWORD") {
            self.proxy_password = Some(password);
        }
        if let Ok(path) = env::var("AUDIT_LOG") {
            self.audit_log = Some(path);
        }
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("baseUrl 不能为空");
        }
        if self.requests_per_second == 0 {
            anyhow::bail!("requestsPerSecond 必须大于 0");
        }
        if self.submit_round_interval_ms == 0 {
            anyhow::bail!("submitRoundIntervalMs 必须大于 0");
        }
        if self.max_in_flight_per_task < 2 {
            anyhow::bail!("maxInFlightPerTask 不能小于 2");
        }
        Ok(())
    }

    /// 代理池剩余有效期
    ///
    /// 同时配置了绝对时间与有效期时取较早者；已经过期返回零
    pub fn proxy_lifetime(&self) -> Option<Duration> {
        let from_deadline = self.proxy_expires_at.map(|at| {
            (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        });
        let from_lifetime = self.proxy_lifetime_secs.map(Duration::from_secs);

        match (from_deadline, from_lifetime) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn default_base_url() -> String {
    env::var("BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
}

fn default_ticket_path() -> String {
    "/api/ticket".to_string()
}

fn default_validate_path() -> String {
    "/api/ticket/verify".to_string()
}

fn default_submit_path() -> String {
    "/api/claim/submit".to_string()
}

fn default_requests_per_second() -> usize {
    2
}

fn default_ticket_retry_interval_ms() -> u64 {
    500
}

fn default_rate_limited_backoff_ms() -> u64 {
    2000
}

fn default_ticket_timeout_secs() -> u64 {
    600
}

fn default_validation_retry_delay_ms() -> u64 {
    300
}

fn default_submit_round_interval_ms() -> u64 {
    200
}

fn default_race_timeout_secs() -> u64 {
    300
}

fn default_max_in_flight_per_task() -> usize {
    32
}

fn default_max_race_retries() -> u32 {
    0
}

fn default_ticket_ttl_secs() -> u64 {
    120
}

fn default_pool_exhausted_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_proxy_max_failures() -> u32 {
    3
}

fn default_duplicate_markers() -> Vec<String> {
    vec!["重复提交".to_string(), "already submitted".to_string()]
}

fn default_ticket_invalid_markers() -> Vec<String> {
    vec![
        "ticket invalid".to_string(),
        "ticket expired".to_string(),
        "票据无效".to_string(),
        "票据已过期".to_string(),
    ]
}

fn default_rate_limited_codes() -> Vec<String> {
    vec!["429".to_string()]
}

fn default_rate_limited_markers() -> Vec<String> {
    vec!["too many requests".to_string(), "请求过于频繁".to_string()]
}

fn default_progress_interval_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ticket_path: default_ticket_path(),
            validate_path: default_validate_path(),
            submit_path: default_submit_path(),
            requests_per_second: default_requests_per_second(),
            ticket_retry_interval_ms: default_ticket_retry_interval_ms(),
            rate_limited_backoff_ms: default_rate_limited_backoff_ms(),
            ticket_timeout_secs: default_ticket_timeout_secs(),
            validation_retry_delay_ms: default_validation_retry_delay_ms(),
            submit_round_interval_ms: default_submit_round_interval_ms(),
            race_timeout_secs: default_race_timeout_secs(),
            max_in_flight_per_task: default_max_in_flight_per_task(),
            max_race_retries: default_max_race_retries(),
            ticket_ttl_secs: default_ticket_ttl_secs(),
            pool_exhausted_delay_ms: default_pool_exhausted_delay_ms(),
            max_concurrent_accounts: 0,
            request_timeout_secs: default_request_timeout_secs(),
            proxy_max_failures: default_proxy_max_failures(),
            proxy_strategy: SelectionStrategy::default(),
            proxy_expires_at: None,
            proxy_lifetime_secs: None,
            proxy_url: None,
            proxy_username: None,
            proxy_password: None,
            duplicate_codes: Vec::new(),
            duplicate_markers: default_duplicate_markers(),
            ticket_invalid_codes: Vec::new(),
            ticket_invalid_markers: default_ticket_invalid_markers(),
            rate_limited_codes: default_rate_limited_codes(),
            rate_limited_markers: default_rate_limited_markers(),
            audit_log: None,
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

impl Config {
    /// 获取默认配置文件路径
    pub fn default_config_path() -> &'static str {
        "config.json"
    }

    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            // 配置文件不存在，返回默认配置
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}
