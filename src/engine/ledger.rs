// ==========================================
// 血液申请履约引擎 - 库存台账
// ==========================================
// 职责: 候选查询 / Draw / Restore / 过期巡检 / 血袋登记与停用
// 红线: remaining_volume 与 status 只能经由本模块修改
// 红线: 提交后的状态一律由剩余量归一化
// 并发: 写入在 IMMEDIATE 事务内完成, 并携带 revision 检查
// ==========================================

use crate::config::ConfigManager;
use crate::db::{now_ts, run_in_transaction};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::actor::Actor;
use crate::domain::request::ReservationLine;
use crate::domain::types::UnitStatus;
use crate::domain::unit::{BloodUnit, NewBloodUnit};
use crate::engine::error::{FulfillmentError, FulfillmentResult};
use crate::engine::repositories::FulfillmentRepositories;
use crate::repository::{
    ActionLogRepository, BloodUnitRepository, ReferenceRepository, RepositoryError,
    RequestRepository,
};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 系统操作人 (巡检等无人值守操作)
pub const SYSTEM_ACTOR: &str = "system";

// ==========================================
// InventoryLedger - 库存台账
// ==========================================
pub struct InventoryLedger {
    repos: FulfillmentRepositories,
    config: Arc<ConfigManager>,
}

impl InventoryLedger {
    pub fn new(repos: FulfillmentRepositories, config: Arc<ConfigManager>) -> Self {
        Self { repos, config }
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 查询候选血袋 (FEFO 排序, 已排除被 APPROVED 申请预留的血袋)
    pub fn find_candidates(
        &self,
        blood_type_ids: &[String],
        component_id: &str,
        as_of: NaiveDateTime,
    ) -> FulfillmentResult<Vec<BloodUnit>> {
        Ok(self
            .repos
            .unit_repo
            .find_candidates(blood_type_ids, component_id, as_of)?)
    }

    pub fn get_unit(&self, unit_id: &str) -> FulfillmentResult<BloodUnit> {
        self.repos
            .unit_repo
            .find_by_id(unit_id)?
            .ok_or_else(|| FulfillmentError::not_found("BloodUnit", unit_id))
    }

    pub fn list_units(&self, status: Option<UnitStatus>) -> FulfillmentResult<Vec<BloodUnit>> {
        Ok(self.repos.unit_repo.list(status)?)
    }

    /// 申请的预留明细及对应血袋当前状态
    pub fn reserved_units_of(
        &self,
        request_id: &str,
    ) -> FulfillmentResult<Vec<(ReservationLine, BloodUnit)>> {
        let conn = self
            .repos
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let lines = RequestRepository::find_lines_tx(&conn, request_id)?;
        lines
            .into_iter()
            .map(|line| -> FulfillmentResult<(ReservationLine, BloodUnit)> {
                let unit = BloodUnitRepository::find_by_id_tx(&conn, &line.unit_id)?
                    .ok_or_else(|| FulfillmentError::not_found("BloodUnit", &line.unit_id))?;
                Ok((line, unit))
            })
            .collect()
    }

    // ==========================================
    // 事务内原语 (供生命周期在同一事务内组合)
    // ==========================================

    /// 事务内查询候选血袋 (与申请状态在同一快照内读取)
    pub fn find_candidates_tx(
        conn: &Connection,
        blood_type_ids: &[String],
        component_id: &str,
        as_of: NaiveDateTime,
    ) -> FulfillmentResult<Vec<BloodUnit>> {
        Ok(BloodUnitRepository::find_candidates_tx(
            conn,
            blood_type_ids,
            component_id,
            as_of,
        )?)
    }

    /// 从血袋抽取指定体积
    ///
    /// # 参数
    /// - `expected_revision`: 规划时看到的 revision; 不一致即视为并发修改
    ///
    /// # 错误
    /// - `Validation`: volume ≤ 0
    /// - `UnitNotDrawable`: 状态不可抽取或已过效期
    /// - `OverDraw`: volume > remaining
    /// - `ReservationConflict`: revision 变化或已被其他 APPROVED 申请预留
    pub fn draw_tx(
        conn: &Connection,
        unit_id: &str,
        volume_ml: i64,
        expected_revision: Option<i64>,
        now: NaiveDateTime,
    ) -> FulfillmentResult<BloodUnit> {
        if volume_ml <= 0 {
            return Err(FulfillmentError::Validation(format!(
                "抽取量必须大于 0, 实际 {}ml",
                volume_ml
            )));
        }

        let unit = BloodUnitRepository::find_by_id_tx(conn, unit_id)?
            .ok_or_else(|| FulfillmentError::not_found("BloodUnit", unit_id))?;

        if let Some(expected) = expected_revision {
            if unit.revision != expected {
                return Err(FulfillmentError::ReservationConflict(format!(
                    "血袋 {} 已被并发修改 (revision {} → {})",
                    unit_id, expected, unit.revision
                )));
            }
        }
        if !unit.status.is_drawable() {
            return Err(FulfillmentError::UnitNotDrawable {
                unit_id: unit_id.to_string(),
                reason: format!("状态为 {}", unit.status),
            });
        }
        if unit.is_expired_at(now) {
            return Err(FulfillmentError::UnitNotDrawable {
                unit_id: unit_id.to_string(),
                reason: "已过效期".to_string(),
            });
        }
        if volume_ml > unit.remaining_volume_ml {
            return Err(FulfillmentError::OverDraw {
                unit_id: unit_id.to_string(),
                requested_ml: volume_ml,
                remaining_ml: unit.remaining_volume_ml,
            });
        }
        if let Some(holder) = BloodUnitRepository::find_active_reservation_tx(conn, unit_id)? {
            return Err(FulfillmentError::ReservationConflict(format!(
                "血袋 {} 已被申请 {} 预留",
                unit_id, holder
            )));
        }

        let remaining = unit.remaining_volume_ml - volume_ml;
        let status = UnitStatus::normalized(remaining, unit.collected_volume_ml);
        BloodUnitRepository::update_volume_tx(conn, unit_id, unit.revision, remaining, status, now)?;

        debug!(unit_id, volume_ml, remaining, status = %status, "血袋抽取");
        Ok(BloodUnit {
            remaining_volume_ml: remaining,
            status,
            revision: unit.revision + 1,
            updated_at: now,
            ..unit
        })
    }

    /// 向血袋归还指定体积 (Draw 的逆操作)
    ///
    /// 状态: EXPIRED/INACTIVE 保持不变; 已过效期置为 EXPIRED; 其余由剩余量归一化
    ///
    /// # 错误
    /// - `RestoreFailure`: 归还后超过采集量
    pub fn restore_tx(
        conn: &Connection,
        unit_id: &str,
        volume_ml: i64,
        now: NaiveDateTime,
    ) -> FulfillmentResult<BloodUnit> {
        if volume_ml <= 0 {
            return Err(FulfillmentError::Validation(format!(
                "归还量必须大于 0, 实际 {}ml",
                volume_ml
            )));
        }

        let unit = BloodUnitRepository::find_by_id_tx(conn, unit_id)?
            .ok_or_else(|| FulfillmentError::not_found("BloodUnit", unit_id))?;

        let remaining = unit.remaining_volume_ml + volume_ml;
        if remaining > unit.collected_volume_ml {
            return Err(FulfillmentError::RestoreFailure(format!(
                "血袋 {} 归还 {}ml 后为 {}ml, 超过采集量 {}ml",
                unit_id, volume_ml, remaining, unit.collected_volume_ml
            )));
        }

        let status = match unit.status {
            UnitStatus::Expired | UnitStatus::Inactive => unit.status,
            _ if unit.is_expired_at(now) => UnitStatus::Expired,
            _ => UnitStatus::normalized(remaining, unit.collected_volume_ml),
        };
        BloodUnitRepository::update_volume_tx(conn, unit_id, unit.revision, remaining, status, now)?;

        debug!(unit_id, volume_ml, remaining, status = %status, "血袋归还");
        Ok(BloodUnit {
            remaining_volume_ml: remaining,
            status,
            revision: unit.revision + 1,
            updated_at: now,
            ..unit
        })
    }

    // ==========================================
    // 独立事务操作
    // ==========================================

    /// 独立事务内抽取
    #[instrument(skip(self))]
    pub fn draw(&self, unit_id: &str, volume_ml: i64) -> FulfillmentResult<BloodUnit> {
        let timeout = self.config.load_policy()?.approve_timeout();
        run_in_transaction(&self.repos.conn, timeout, |tx| {
            Self::draw_tx(tx, unit_id, volume_ml, None, now_ts())
        })
    }

    /// 独立事务内归还
    #[instrument(skip(self))]
    pub fn restore(&self, unit_id: &str, volume_ml: i64) -> FulfillmentResult<BloodUnit> {
        let timeout = self.config.load_policy()?.approve_timeout();
        run_in_transaction(&self.repos.conn, timeout, |tx| {
            Self::restore_tx(tx, unit_id, volume_ml, now_ts())
        })
    }

    /// 过期巡检: expiry ≤ as_of 的非终态血袋 → EXPIRED (不可逆)
    ///
    /// # 返回
    /// 被标记的 unit_id 列表
    #[instrument(skip(self))]
    pub fn mark_expired(&self, as_of: NaiveDateTime) -> FulfillmentResult<Vec<String>> {
        let timeout = self.config.load_policy()?.approve_timeout();
        let now = now_ts();

        let expired = run_in_transaction(&self.repos.conn, timeout, |tx| {
            let ids = BloodUnitRepository::mark_expired_tx(tx, as_of, now)?;
            if !ids.is_empty() {
                let log = ActionLog::new(None, ActionType::ExpirySweep, SYSTEM_ACTOR, now)
                    .with_payload(&json!({ "as_of": crate::db::fmt_ts(&as_of), "unit_ids": ids }))
                    .with_detail(format!("过期巡检标记 {} 袋", ids.len()));
                ActionLogRepository::insert_tx(tx, &log)?;
            }
            Ok::<_, FulfillmentError>(ids)
        })?;

        info!(count = expired.len(), as_of = %as_of, "过期巡检完成");
        Ok(expired)
    }

    // ==========================================
    // 血袋管理
    // ==========================================

    /// 登记血袋 (献血完成后入库, 状态 AVAILABLE, 剩余量 = 采集量)
    #[instrument(skip(self, input, actor), fields(actor_id = %actor.actor_id))]
    pub fn register_unit(&self, input: NewBloodUnit, actor: &Actor) -> FulfillmentResult<BloodUnit> {
        require_staff(actor, "登记血袋")?;

        if input.collected_volume_ml <= 0 {
            return Err(FulfillmentError::Validation(format!(
                "采集量必须大于 0, 实际 {}ml",
                input.collected_volume_ml
            )));
        }
        if input.expiry_date <= input.collected_at {
            return Err(FulfillmentError::Validation(
                "效期必须晚于采集时间".to_string(),
            ));
        }
        if input.donor_id.trim().is_empty() {
            return Err(FulfillmentError::Validation("献血者ID不能为空".to_string()));
        }

        let now = now_ts();
        let unit = BloodUnit {
            unit_id: input
                .unit_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            blood_type_id: input.blood_type_id,
            component_id: input.component_id,
            collected_volume_ml: input.collected_volume_ml,
            remaining_volume_ml: input.collected_volume_ml,
            expiry_date: input.expiry_date,
            donor_id: input.donor_id,
            status: UnitStatus::Available,
            revision: 0,
            created_at: now,
            updated_at: now,
        };

        let timeout = self.config.load_policy()?.approve_timeout();
        run_in_transaction(&self.repos.conn, timeout, |tx| {
            if ReferenceRepository::find_blood_type_tx(tx, &unit.blood_type_id)?.is_none() {
                return Err(FulfillmentError::Validation(format!(
                    "未知血型: {}",
                    unit.blood_type_id
                )));
            }
            if ReferenceRepository::find_component_tx(tx, &unit.component_id)?.is_none() {
                return Err(FulfillmentError::Validation(format!(
                    "未知血液成分: {}",
                    unit.component_id
                )));
            }

            BloodUnitRepository::insert_tx(tx, &unit).map_err(|e| match e {
                RepositoryError::UniqueConstraintViolation(_) => {
                    FulfillmentError::Validation(format!("血袋ID已存在: {}", unit.unit_id))
                }
                other => other.into(),
            })?;

            let log = ActionLog::new(None, ActionType::RegisterUnit, actor.actor_id.clone(), now)
                .with_payload(&unit)
                .with_detail(format!("登记血袋 {}", unit.unit_id));
            ActionLogRepository::insert_tx(tx, &log)?;
            Ok(())
        })?;

        info!(unit_id = %unit.unit_id, blood_type = %unit.blood_type_id, component = %unit.component_id,
              volume_ml = unit.collected_volume_ml, "血袋登记");
        Ok(unit)
    }

    /// 停用血袋 (隔离, 不可逆)
    ///
    /// 仅 AVAILABLE / PARTIAL_USED / RESERVED 且未被 APPROVED 申请预留的血袋可停用
    #[instrument(skip(self, actor), fields(actor_id = %actor.actor_id))]
    pub fn deactivate_unit(&self, unit_id: &str, actor: &Actor, reason: &str) -> FulfillmentResult<BloodUnit> {
        require_staff(actor, "停用血袋")?;

        let timeout = self.config.load_policy()?.approve_timeout();
        let now = now_ts();

        let unit = run_in_transaction(&self.repos.conn, timeout, |tx| {
            let unit = BloodUnitRepository::find_by_id_tx(tx, unit_id)?
                .ok_or_else(|| FulfillmentError::not_found("BloodUnit", unit_id))?;

            if unit.status.is_retired() {
                return Err(FulfillmentError::Validation(format!(
                    "血袋 {} 状态为 {}, 不可停用",
                    unit_id, unit.status
                )));
            }
            if let Some(holder) = BloodUnitRepository::find_active_reservation_tx(tx, unit_id)? {
                return Err(FulfillmentError::ReservationConflict(format!(
                    "血袋 {} 已被申请 {} 预留, 不可停用",
                    unit_id, holder
                )));
            }

            BloodUnitRepository::update_volume_tx(
                tx,
                unit_id,
                unit.revision,
                unit.remaining_volume_ml,
                UnitStatus::Inactive,
                now,
            )?;

            let log = ActionLog::new(None, ActionType::DeactivateUnit, actor.actor_id.clone(), now)
                .with_payload(&json!({ "unit_id": unit_id, "from": unit.status, "reason": reason }))
                .with_detail(format!("停用血袋 {}", unit_id));
            ActionLogRepository::insert_tx(tx, &log)?;

            Ok(BloodUnit {
                status: UnitStatus::Inactive,
                revision: unit.revision + 1,
                updated_at: now,
                ..unit
            })
        })?;

        warn!(unit_id, reason, "血袋停用");
        Ok(unit)
    }
}

/// 管理类操作须为 STAFF / ADMIN
pub(crate) fn require_staff(actor: &Actor, operation: &str) -> FulfillmentResult<()> {
    if actor.can_manage_requests() {
        Ok(())
    } else {
        Err(FulfillmentError::PermissionDenied(format!(
            "{} 需要 STAFF 或 ADMIN 角色, 当前操作人 {} 为 {}",
            operation, actor.actor_id, actor.role
        )))
    }
}
