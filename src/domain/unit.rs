// ==========================================
// 血液申请履约引擎 - 血袋领域模型
// ==========================================
// 红线: remaining 只能由库存台账 (InventoryLedger) 修改
// 红线: 0 ≤ remaining ≤ collected
// ==========================================

use crate::domain::types::UnitStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// BloodUnit - 血袋
// ==========================================
// 对齐: blood_unit 表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloodUnit {
    pub unit_id: String,
    pub blood_type_id: String,
    pub component_id: String,
    pub collected_volume_ml: i64,
    pub remaining_volume_ml: i64,
    pub expiry_date: NaiveDateTime,
    pub donor_id: String,
    pub status: UnitStatus,

    // ===== 并发控制 =====
    pub revision: i64,

    // ===== 审计字段 =====
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl BloodUnit {
    /// 在 as_of 时刻是否已过期 (expiry ≤ as_of)
    pub fn is_expired_at(&self, as_of: NaiveDateTime) -> bool {
        self.expiry_date <= as_of
    }
}

// ==========================================
// NewBloodUnit - 登记血袋入参
// ==========================================
// 用途: 献血完成后登记入库
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBloodUnit {
    /// 为空时自动生成
    pub unit_id: Option<String>,
    pub blood_type_id: String,
    pub component_id: String,
    pub collected_volume_ml: i64,
    pub collected_at: NaiveDateTime,
    pub expiry_date: NaiveDateTime,
    pub donor_id: String,
}
