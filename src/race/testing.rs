//! 测试用的脚本化 ClaimApi

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::claim::model::{ApiResponse, Ticket, TicketData, Verdict};
use crate::claim::ClaimApi;
use crate::error::{RaceError, RaceResult};
use crate::model::account::Account;

/// 一次脚本化的响应：等待 `delay` 后返回 `reply`
#[derive(Clone)]
pub(crate) struct Step<T> {
    pub delay: Duration,
    pub reply: RaceResult<ApiResponse<T>>,
}

impl<T> Step<T> {
    pub fn now(reply: RaceResult<ApiResponse<T>>) -> Self {
        Self {
            delay: Duration::ZERO,
            reply,
        }
    }

    pub fn after(delay: Duration, reply: RaceResult<ApiResponse<T>>) -> Self {
        Self { delay, reply }
    }
}

pub(crate) fn ticket_ok(value: &str) -> RaceResult<ApiResponse<TicketData>> {
    Ok(ApiResponse::ok(TicketData {
        ticket: Some(value.to_string()),
    }))
}

pub(crate) fn accepted() -> RaceResult<ApiResponse<Verdict>> {
    Ok(ApiResponse::ok(Verdict::accepted()))
}

pub(crate) fn rejected(code: Option<&str>, message: &str) -> RaceResult<ApiResponse<Verdict>> {
    Ok(ApiResponse::ok(Verdict::rejected(code, message)))
}

/// 按脚本依次返回响应，并记录调用次数和顺序
pub(crate) struct ScriptedApi {
    tickets: Mutex<VecDeque<Step<TicketData>>>,
    ticket_default: Step<TicketData>,
    validations: Mutex<VecDeque<Step<Verdict>>>,
    validation_default: Step<Verdict>,
    submits: Mutex<HashMap<String, VecDeque<Step<Verdict>>>>,
    submit_default: Mutex<Step<Verdict>>,
    pub ticket_calls: AtomicU32,
    pub validate_calls: AtomicU32,
    pub submit_calls: AtomicU32,
    events: Mutex<Vec<String>>,
}

impl ScriptedApi {
    /// 默认：票据立即下发、校验通过、提交返回可重试的失败
    pub fn new() -> Self {
        Self {
            tickets: Mutex::new(VecDeque::new()),
            ticket_default: Step::now(ticket_ok("tk-default")),
            validations: Mutex::new(VecDeque::new()),
            validation_default: Step::now(accepted()),
            submits: Mutex::new(HashMap::new()),
            submit_default: Mutex::new(Step::now(rejected(None, "sold out, retry"))),
            ticket_calls: AtomicU32::new(0),
            validate_calls: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn with_ticket_default(mut self, step: Step<TicketData>) -> Self {
        self.ticket_default = step;
        self
    }

    pub fn push_ticket(&self, step: Step<TicketData>) {
        self.tickets.lock().unwrap().push_back(step);
    }

    pub fn push_validation(&self, step: Step<Verdict>) {
        self.validations.lock().unwrap().push_back(step);
    }

    pub fn push_submit(&self, slot_id: &str, step: Step<Verdict>) {
        self.submits
            .lock()
            .unwrap()
            .entry(slot_id.to_string())
            .or_default()
            .push_back(step);
    }

    pub fn set_submit_default(&self, step: Step<Verdict>) {
        *self.submit_default.lock().unwrap() = step;
    }

    pub fn tickets(&self) -> u32 {
        self.ticket_calls.load(Ordering::SeqCst)
    }

    pub fn validations(&self) -> u32 {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn submits(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// 调用顺序，如 `["ticket", "validate", "submit:g-1"]`
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    async fn play<T>(step: Step<T>) -> RaceResult<ApiResponse<T>> {
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.reply
    }
}

#[async_trait]
impl ClaimApi for ScriptedApi {
    async fn request_ticket(&self, _account: &Account) -> RaceResult<ApiResponse<TicketData>> {
        self.ticket_calls.fetch_add(1, Ordering::SeqCst);
        self.log("ticket".to_string());
        let step = self
            .tickets
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.ticket_default.clone());
        Self::play(step).await
    }

    async fn validate_ticket(
        &self,
        _account: &Account,
        _ticket: &Ticket,
    ) -> RaceResult<ApiResponse<Verdict>> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        self.log("validate".to_string());
        let step = self
            .validations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.validation_default.clone());
        Self::play(step).await
    }

    async fn submit_claim(
        &self,
        _account: &Account,
        _ticket: &Ticket,
        category_ids: &[String],
    ) -> RaceResult<ApiResponse<Verdict>> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let slot = category_ids.join(",");
        self.log(format!("submit:{}", slot));
        let scripted = self
            .submits
            .lock()
            .unwrap()
            .get_mut(&slot)
            .and_then(|q| q.pop_front());
        let step = match scripted {
            Some(step) => step,
            None => self.submit_default.lock().unwrap().clone(),
        };
        Self::play(step).await
    }
}

/// 传输层错误的快捷构造
pub(crate) fn transient<T>() -> RaceResult<ApiResponse<T>> {
    Err(RaceError::Transient("connection reset".to_string()))
}
