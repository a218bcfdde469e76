//! 接口响应外壳
//!
//! 三个接口统一返回 `{success, data, code, message}`，`code` 可能是数字也可能是字符串

use serde::{Deserialize, Deserializer, Serialize};

/// 通用响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default, deserialize_with = "de_code")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// 构造成功响应
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            code: None,
            message: None,
        }
    }

    /// 构造失败响应
    pub fn fail(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            code: code.map(str::to_string),
            message: Some(message.into()),
        }
    }
}

/// 获取票据接口的 data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketData {
    #[serde(default)]
    pub ticket: Option<String>,
}

/// 校验与提交接口的 data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Verdict {
    /// 缺省表示服务端未明确拒绝
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default, deserialize_with = "de_code")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Verdict {
    pub fn accepted() -> Self {
        Self {
            success: Some(true),
            code: None,
            message: None,
        }
    }

    pub fn rejected(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            success: Some(false),
            code: code.map(str::to_string),
            message: Some(message.into()),
        }
    }
}

impl ApiResponse<Verdict> {
    /// 服务端是否明确表示失败
    pub fn is_explicit_failure(&self) -> bool {
        !self.success || matches!(self.data.as_ref().and_then(|d| d.success), Some(false))
    }

    /// 优先取 data 内的 code
    pub fn effective_code(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.code.as_deref())
            .or(self.code.as_deref())
    }

    /// 优先取 data 内的 message
    pub fn effective_message(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.message.as_deref())
            .or(self.message.as_deref())
    }
}

fn de_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
