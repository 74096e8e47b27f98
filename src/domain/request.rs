// ==========================================
// 血液申请履约引擎 - 履约申请领域模型
// ==========================================
// 统一输血申请与紧急申请
// 红线: reserved_units 仅在 APPROVED 时非空
// ==========================================

use crate::domain::types::RequestStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// FulfillmentRequest - 履约申请
// ==========================================
// 对齐: fulfillment_request 表 + reservation_line 表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRequest {
    pub request_id: String,
    pub recipient_id: String,
    pub blood_type_id: String,
    pub component_id: String,
    pub required_volume_ml: i64,
    pub is_emergency: bool,
    pub status: RequestStatus,

    // ===== 生命周期时间戳 =====
    pub request_date: NaiveDateTime,
    pub approval_date: Option<NaiveDateTime>,
    pub completion_date: Option<NaiveDateTime>,
    pub cancelled_date: Option<NaiveDateTime>,
    pub rejected_date: Option<NaiveDateTime>,

    pub responsible_actor_id: Option<String>,
    pub notes: String,

    /// 预留明细 (按 line_no 排序)
    pub reserved_units: Vec<ReservationLine>,

    // ===== 并发控制 =====
    pub revision: i64,
}

impl FulfillmentRequest {
    /// 预留总量
    pub fn reserved_total_ml(&self) -> i64 {
        self.reserved_units.iter().map(|l| l.volume_used_ml).sum()
    }
}

// ==========================================
// ReservationLine - 预留明细
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub unit_id: String,
    pub volume_used_ml: i64,
}

// ==========================================
// NewFulfillmentRequest - 提交入参
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFulfillmentRequest {
    pub recipient_id: String,
    pub blood_type_id: String,
    pub component_id: String,
    pub required_volume_ml: i64,
    #[serde(default)]
    pub is_emergency: bool,
    #[serde(default)]
    pub notes: String,
}

// ==========================================
// ManualSelection - 人工选袋
// ==========================================
// 用途: 审批时工作人员指定血袋与用量 (可低于需求量)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualSelection {
    pub unit_id: String,
    pub volume_ml: i64,
}
