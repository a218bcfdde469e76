//! 响应分类规则
//!
//! 优先按稳定的响应码判断；响应码缺失或未配置时，才退回到对消息文本做子串匹配

use super::envelope::{ApiResponse, Verdict};
use crate::model::config::Config;

/// 提交结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitVerdict {
    /// 提交成功
    Submitted,
    /// 该账号已持有此档位，等同成功
    Duplicate,
    /// 票据失效，需要重新获取
    TicketInvalid,
    /// 被限流
    RateLimited,
    /// 其他可重试的失败
    Rejected,
}

impl SubmitVerdict {
    /// 是否结束本次竞速
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted | Self::Duplicate | Self::TicketInvalid)
    }
}

/// 响应分类规则
#[derive(Debug, Clone, Default)]
pub struct ResponseRules {
    pub duplicate_codes: Vec<String>,
    pub duplicate_markers: Vec<String>,
    pub ticket_invalid_codes: Vec<String>,
    pub ticket_invalid_markers: Vec<String>,
    pub rate_limited_codes: Vec<String>,
    pub rate_limited_markers: Vec<String>,
}

impl ResponseRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            duplicate_codes: config.duplicate_codes.clone(),
            duplicate_markers: lowercase_all(&config.duplicate_markers),
            ticket_invalid_codes: config.ticket_invalid_codes.clone(),
            ticket_invalid_markers: lowercase_all(&config.ticket_invalid_markers),
            rate_limited_codes: config.rate_limited_codes.clone(),
            rate_limited_markers: lowercase_all(&config.rate_limited_markers),
        }
    }

    /// 对提交响应分类
    pub fn classify_submit(&self, response: &ApiResponse<Verdict>) -> SubmitVerdict {
        let code = response.effective_code();
        let message = response.effective_message();

        if matches_code(&self.duplicate_codes, code) {
            return SubmitVerdict::Duplicate;
        }
        if matches_code(&self.ticket_invalid_codes, code) {
            return SubmitVerdict::TicketInvalid;
        }
        if matches_code(&self.rate_limited_codes, code) {
            return SubmitVerdict::RateLimited;
        }
        if !response.is_explicit_failure() {
            return SubmitVerdict::Submitted;
        }

        // 兜底：按消息文本判断
        if matches_marker(&self.duplicate_markers, message) {
            SubmitVerdict::Duplicate
        } else if matches_marker(&self.ticket_invalid_markers, message) {
            SubmitVerdict::TicketInvalid
        } else if matches_marker(&self.rate_limited_markers, message) {
            SubmitVerdict::RateLimited
        } else {
            SubmitVerdict::Rejected
        }
    }

    /// 响应是否表示限流
    pub fn is_rate_limited<T>(&self, response: &ApiResponse<T>) -> bool {
        matches_code(&self.rate_limited_codes, response.code.as_deref())
            || matches_marker(&self.rate_limited_markers, response.message.as_deref())
    }
}

fn lowercase_all(markers: &[String]) -> Vec<String> {
    markers
        .iter()
        .filter(|m| !m.is_empty())
        .map(|m| m.to_lowercase())
        .collect()
}

fn matches_code(codes: &[String], code: Option<&str>) -> bool {
    code.is_some_and(|code| codes.iter().any(|c| c == code))
}

fn matches_marker(markers: &[String], message: Option<&str>) -> bool {
    match message {
        Some(message) => {
            let message = message.to_lowercase();
            markers.iter().any(|m| message.contains(m.as_str()))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ResponseRules {
        let mut config = Config::default();
        config.duplicate_codes = vec!["40901".to_string()];
        config.ticket_invalid_codes = vec!["40101".to_string()];
        ResponseRules::from_config(&config)
    }

    fn verdict(success: bool, code: Option<&str>, message: &str) -> ApiResponse<Verdict> {
        ApiResponse::ok(Verdict {
            success: Some(success),
            code: code.map(str::to_string),
            message: Some(message.to_string()),
        })
    }

    #[test]
    fn test_success() {
        assert_eq!(
            rules().classify_submit(&verdict(true, None, "ok")),
            SubmitVerdict::Submitted
        );
    }

    #[test]
    fn test_duplicate_by_code_wins_over_message() {
        assert_eq!(
            rules().classify_submit(&verdict(false, Some("40901"), "something else")),
            SubmitVerdict::Duplicate
        );
    }

    #[test]
    fn test_duplicate_by_marker_fallback() {
        assert_eq!(
            rules().classify_submit(&verdict(false, None, "请勿重复提交")),
            SubmitVerdict::Duplicate
        );
        assert_eq!(
            rules().classify_submit(&verdict(false, Some("1"), "Already Submitted for slot")),
            SubmitVerdict::Duplicate
        );
    }

    #[test]
    fn test_ticket_invalid() {
        assert_eq!(
            rules().classify_submit(&verdict(false, Some("40101"), "")),
            SubmitVerdict::TicketInvalid
        );
        assert_eq!(
            rules().classify_submit(&verdict(false, None, "Ticket expired")),
            SubmitVerdict::TicketInvalid
        );
    }

    #[test]
    fn test_rate_limited_and_rejected() {
        assert_eq!(
            rules().classify_submit(&verdict(false, Some("429"), "")),
            SubmitVerdict::RateLimited
        );
        assert_eq!(
            rules().classify_submit(&verdict(false, None, "slot sold out, try later")),
            SubmitVerdict::Rejected
        );
        assert!(!SubmitVerdict::Rejected.is_terminal());
        assert!(SubmitVerdict::Duplicate.is_terminal());
    }

    #[test]
    fn test_is_rate_limited_on_envelope() {
        let resp: ApiResponse<Verdict> = ApiResponse::fail(None, "Too Many Requests");
        assert!(rules().is_rate_limited(&resp));
        let resp: ApiResponse<Verdict> = ApiResponse::fail(Some("500"), "oops");
        assert!(!rules().is_rate_limited(&resp));
    }
}
