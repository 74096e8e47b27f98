// ==========================================
// 血液申请履约引擎 - 库存管理 API
// ==========================================
// 职责: 血袋登记 / 停用 / 查询 / 过期巡检
// ==========================================

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::db::now_ts;
use crate::domain::actor::Actor;
use crate::domain::types::UnitStatus;
use crate::domain::unit::{BloodUnit, NewBloodUnit};
use crate::engine::ledger::InventoryLedger;

/// 预留明细视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedUnitView {
    pub unit_id: String,
    pub volume_used_ml: i64,
    pub unit_status: UnitStatus,
    pub remaining_volume_ml: i64,
}

/// 过期巡检响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepResponse {
    pub as_of: NaiveDateTime,
    pub expired_count: usize,
    pub unit_ids: Vec<String>,
}

pub struct InventoryApi {
    ledger: Arc<InventoryLedger>,
}

impl InventoryApi {
    pub fn new(ledger: Arc<InventoryLedger>) -> Self {
        Self { ledger }
    }

    /// 登记血袋
    pub fn register_unit(&self, body: NewBloodUnit, actor: &Actor) -> ApiResult<BloodUnit> {
        Ok(self.ledger.register_unit(body, actor)?)
    }

    /// 停用血袋 (隔离)
    pub fn deactivate_unit(&self, unit_id: &str, reason: &str, actor: &Actor) -> ApiResult<BloodUnit> {
        if reason.trim().is_empty() {
            return Err(ApiError::InvalidInput("停用原因不能为空".to_string()));
        }
        Ok(self.ledger.deactivate_unit(unit_id.trim(), actor, reason.trim())?)
    }

    pub fn get_unit(&self, unit_id: &str) -> ApiResult<BloodUnit> {
        Ok(self.ledger.get_unit(unit_id.trim())?)
    }

    /// 按状态列出血袋
    ///
    /// # 参数
    /// - status: 状态字符串 (如 "AVAILABLE"), None 表示全部
    pub fn list_units(&self, status: Option<&str>) -> ApiResult<Vec<BloodUnit>> {
        let status = status
            .map(|s| s.trim().to_uppercase().parse::<UnitStatus>())
            .transpose()
            .map_err(ApiError::InvalidInput)?;
        Ok(self.ledger.list_units(status)?)
    }

    /// 申请的预留血袋
    pub fn reserved_units_of(&self, request_id: &str) -> ApiResult<Vec<ReservedUnitView>> {
        let rows = self.ledger.reserved_units_of(request_id.trim())?;
        Ok(rows
            .into_iter()
            .map(|(line, unit)| ReservedUnitView {
                unit_id: line.unit_id,
                volume_used_ml: line.volume_used_ml,
                unit_status: unit.status,
                remaining_volume_ml: unit.remaining_volume_ml,
            })
            .collect())
    }

    /// 过期巡检 (as_of 缺省为当前时间)
    pub fn sweep_expired(&self, as_of: Option<NaiveDateTime>) -> ApiResult<SweepResponse> {
        let as_of = as_of.unwrap_or_else(now_ts);
        let unit_ids = self.ledger.mark_expired(as_of)?;
        Ok(SweepResponse {
            as_of,
            expired_count: unit_ids.len(),
            unit_ids,
        })
    }
}
