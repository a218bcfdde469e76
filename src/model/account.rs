//! 账号数据模型
//!
//! 账号从 JSON 文件加载，包含认证令牌、可抢的档位以及预先探测好的档位 ID

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// 账号在抢票流程中所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// 等待调度
    Pending,
    /// 获取票据中
    AcquiringTicket,
    /// 校验票据中
    Validating,
    /// 提交竞速中
    Racing,
    /// 已结束
    Done,
    /// 被停止
    Stopped,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AcquiringTicket => "acquiring_ticket",
            Self::Validating => "validating",
            Self::Racing => "racing",
            Self::Done => "done",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 账号信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// 唯一标识
    pub id: String,
    /// 显示名称
    #[serde(default)]
    pub name: Option<String>,
    /// 认证令牌
    #[serde(skip_serializing)]
    pub token: String,
    /// 可抢的档位（按优先级排列）
    #[serde(default)]
    pub categories: Vec<String>,
    /// 档位 -> 档位 ID，由前置流程探测得到，本流程只读
    #[serde(default)]
    pub slot_ids: BTreeMap<String, String>,
    /// 是否参与本次抢票
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Account {
    /// 创建新账号
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            token: token.into(),
            categories: Vec::new(),
            slot_ids: BTreeMap::new(),
            enabled: true,
        }
    }

    /// 添加一个可抢档位及其 ID
    pub fn with_slot(mut self, category: impl Into<String>, slot_id: impl Into<String>) -> Self {
        let category = category.into();
        self.slot_ids.insert(category.clone(), slot_id.into());
        self.categories.push(category);
        self
    }

    /// 日志中使用的名称
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// 可提交的 (档位, 档位 ID)
    ///
    /// 没有探测到 ID 的档位会被跳过
    pub fn claim_targets(&self) -> Vec<(String, String)> {
        self.categories
            .iter()
            .filter_map(|category| {
                self.slot_ids
                    .get(category)
                    .filter(|id| !id.is_empty())
                    .map(|id| (category.clone(), id.clone()))
            })
            .collect()
    }
}

/// 从 JSON 字符串解析账号列表
pub fn parse_accounts(json: &str) -> Result<Vec<Account>, serde_json::Error> {
    serde_json::from_str(json)
}

/// 从文件加载账号列表，过滤掉禁用和重复的账号
pub fn load_accounts<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<Account>> {
    let content = fs::read_to_string(path.as_ref())?;
    if content.trim().is_empty() {
        anyhow::bail!("账号文件为空: {:?}", path.as_ref());
    }

    let mut seen = std::collections::HashSet::new();
    let mut accounts = Vec::new();
    for account in parse_accounts(&content)? {
        if !account.enabled {
            tracing::info!("账号 {} 已禁用，跳过", account.display_name());
            continue;
        }
        if account.token.is_empty() {
            tracing::warn!("账号 {} 缺少令牌，跳过", account.display_name());
            continue;
        }
        if !seen.insert(account.id.clone()) {
            tracing::warn!("账号 {} 重复出现，仅保留第一条", account.id);
            continue;
        }
        accounts.push(account);
    }

    Ok(accounts)
}
