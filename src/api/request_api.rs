// ==========================================
// 血液申请履约引擎 - 履约申请 API
// ==========================================
// 契约:
// - submit   → {request_id, status: PENDING}
// - approve  → {status, reserved_units, mobilized}; 库存不足时 status = PENDING, mobilized = true
// - complete | cancel | reject → {status, timestamp}
// 职责: 入参校验 + 错误映射, 业务规则全部在引擎层
// ==========================================

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::domain::action_log::ActionLog;
use crate::domain::actor::Actor;
use crate::domain::request::{
    FulfillmentRequest, ManualSelection, NewFulfillmentRequest, ReservationLine,
};
use crate::domain::types::RequestStatus;
use crate::engine::lifecycle::{ApprovalOutcome, RequestLifecycle};

// ==========================================
// 请求/响应 DTO
// ==========================================

/// 提交响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub request_id: String,
    pub status: RequestStatus,
}

/// 审批请求体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApproveBody {
    /// 人工选袋 (可选)
    #[serde(default)]
    pub manual_selection: Option<Vec<ManualSelection>>,
}

/// 审批响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveResponse {
    pub status: RequestStatus,
    pub reserved_units: Vec<ReservationLine>,
    /// 是否因库存不足发起了动员
    pub mobilized: bool,
    /// 已通知献血者数量 (仅动员时有意义)
    pub notified_count: usize,
    pub shortfall_ml: i64,
}

/// 状态迁移响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub request_id: String,
    pub status: RequestStatus,
    pub timestamp: NaiveDateTime,
}

// ==========================================
// RequestApi - 履约申请 API
// ==========================================
pub struct RequestApi {
    lifecycle: Arc<RequestLifecycle>,
}

impl RequestApi {
    pub fn new(lifecycle: Arc<RequestLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// 提交申请
    pub fn submit(&self, body: NewFulfillmentRequest, actor: &Actor) -> ApiResult<SubmitResponse> {
        if body.blood_type_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("blood_type_id不能为空".to_string()));
        }
        if body.component_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("component_id不能为空".to_string()));
        }

        let request = self.lifecycle.submit(body, actor)?;
        Ok(SubmitResponse {
            request_id: request.request_id,
            status: request.status,
        })
    }

    /// 审批申请
    ///
    /// # 返回
    /// - 库存覆盖: status = APPROVED, reserved_units 为预留明细
    /// - 库存不足: status = PENDING, mobilized = true (不是错误)
    /// - 并发冲突: Err(ReservationConflict), 可整体重试
    pub async fn approve(
        &self,
        request_id: &str,
        body: ApproveBody,
        actor: &Actor,
    ) -> ApiResult<ApproveResponse> {
        let request_id = require_id(request_id)?;

        let outcome = self
            .lifecycle
            .approve(request_id, actor, body.manual_selection)
            .await?;

        Ok(match outcome {
            ApprovalOutcome::Approved { request } => ApproveResponse {
                status: request.status,
                reserved_units: request.reserved_units,
                mobilized: false,
                notified_count: 0,
                shortfall_ml: 0,
            },
            ApprovalOutcome::Pending {
                request,
                mobilization,
            } => ApproveResponse {
                status: request.status,
                reserved_units: Vec::new(),
                mobilized: true,
                notified_count: mobilization.notified.len(),
                shortfall_ml: mobilization.shortfall_ml,
            },
        })
    }

    /// 完成申请
    pub fn complete(&self, request_id: &str, actor: &Actor) -> ApiResult<TransitionResponse> {
        let request = self.lifecycle.complete(require_id(request_id)?, actor)?;
        transition_response(request, |r| r.completion_date)
    }

    /// 取消申请
    pub fn cancel(&self, request_id: &str, actor: &Actor) -> ApiResult<TransitionResponse> {
        let request = self.lifecycle.cancel(require_id(request_id)?, actor)?;
        transition_response(request, |r| r.cancelled_date)
    }

    /// 驳回申请
    pub fn reject(
        &self,
        request_id: &str,
        reason: Option<&str>,
        actor: &Actor,
    ) -> ApiResult<TransitionResponse> {
        let request = self.lifecycle.reject(require_id(request_id)?, actor, reason)?;
        transition_response(request, |r| r.rejected_date)
    }

    /// 查询申请详情 (含预留明细)
    pub fn get_request(&self, request_id: &str) -> ApiResult<FulfillmentRequest> {
        Ok(self.lifecycle.get_request(require_id(request_id)?)?)
    }

    /// 按状态列出申请
    ///
    /// # 参数
    /// - status: 状态字符串 (如 "PENDING"), None 表示全部
    pub fn list_requests(&self, status: Option<&str>) -> ApiResult<Vec<FulfillmentRequest>> {
        let status = status
            .map(|s| s.parse::<RequestStatus>())
            .transpose()
            .map_err(ApiError::InvalidInput)?;
        Ok(self.lifecycle.list_requests(status)?)
    }

    /// 查询申请操作日志
    pub fn history(&self, request_id: &str) -> ApiResult<Vec<ActionLog>> {
        Ok(self.lifecycle.history(require_id(request_id)?)?)
    }
}

fn require_id(request_id: &str) -> ApiResult<&str> {
    let id = request_id.trim();
    if id.is_empty() {
        Err(ApiError::InvalidInput("request_id不能为空".to_string()))
    } else {
        Ok(id)
    }
}

fn transition_response(
    request: FulfillmentRequest,
    stamp: impl Fn(&FulfillmentRequest) -> Option<NaiveDateTime>,
) -> ApiResult<TransitionResponse> {
    let timestamp = stamp(&request).ok_or_else(|| {
        ApiError::InternalError(format!("申请 {} 缺少状态时间戳", request.request_id))
    })?;
    Ok(TransitionResponse {
        request_id: request.request_id,
        status: request.status,
        timestamp,
    })
}
