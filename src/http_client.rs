//! HTTP Client 构建模块
//!
//! 提供统一的 HTTP Client 构建功能，支持代理配置，并按代理线路缓存 Client 以复用连接

use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::pool::ProxyRoute;

/// 代理配置
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// 代理地址，支持 http/https/socks5
    pub url: String,
    /// 代理认证用户名
    pub username: Option<String>,
    /// 代理认证密码
    pub password: Option<String>,
}

impl ProxyConfig {
    /// 从 url 创建代理配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    /// 设置认证信息
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// 构建 HTTP Client
///
/// # Arguments
/// * `proxy` - 可选的代理配置
/// * `timeout` - 单次请求超时
pub fn build_client(proxy: Option<&ProxyConfig>, timeout: Duration) -> anyhow::Result<Client> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)));

    if let Some(proxy_config) = proxy {
        let mut proxy = Proxy::all(&proxy_config.url)?;

        // 设置代理认证
        if let (Some(username), Some(password)) = (&proxy_config.username, &proxy_config.password) {
            proxy = proxy.basic_auth(username, password);
        }

        builder = builder.proxy(proxy);
        tracing::debug!("HTTP Client 使用代理: {}", proxy_config.url);
    }

    Ok(builder.build()?)
}

/// 按代理线路缓存的 HTTP Client
///
/// 直连 Client 在创建时构建；代理 Client 首次使用时构建
pub struct ClientCache {
    timeout: Duration,
    direct: Client,
    by_route: Mutex<HashMap<String, Client>>,
}

impl ClientCache {
    /// 创建缓存，`direct_proxy` 为未使用代理池时的固定代理
    pub fn new(direct_proxy: Option<&ProxyConfig>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            timeout,
            direct: build_client(direct_proxy, timeout)?,
            by_route: Mutex::new(HashMap::new()),
        })
    }

    /// 不经过代理池时使用的 Client
    pub fn direct(&self) -> Client {
        self.direct.clone()
    }

    /// 获取指定线路的 Client
    pub fn for_route(&self, route: &ProxyRoute) -> anyhow::Result<Client> {
        let key = route.key();
        let mut clients = self
            .by_route
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_client(Some(&route.to_proxy_config()), self.timeout)?;
        clients.insert(key, client.clone());
        tracing::debug!("为代理 {} 创建 HTTP Client，已缓存 {} 个", route, clients.len());
        Ok(client)
    }
}
