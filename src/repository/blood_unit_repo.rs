// ==========================================
// 血液申请履约引擎 - 血袋数据仓储
// ==========================================
// 对齐: blood_unit 表
// 红线: Repository 不做业务逻辑, 只做数据映射
// 并发控制: 写入一律携带期望 revision, 不匹配即乐观锁冲突
// ==========================================

use crate::db::{fmt_ts, parse_ts};
use crate::domain::types::UnitStatus;
use crate::domain::unit::BloodUnit;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{in_placeholders, parse_enum_column};
use chrono::NaiveDateTime;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const UNIT_COLUMNS: &str = "unit_id, blood_type_id, component_id, collected_volume_ml, \
     remaining_volume_ml, expiry_date, donor_id, status, revision, created_at, updated_at";

/// 被 APPROVED 申请预留的血袋 (排他性判定)
const ACTIVE_RESERVATION_EXISTS: &str = "EXISTS (
        SELECT 1 FROM reservation_line rl
        JOIN fulfillment_request fr ON fr.request_id = rl.request_id
        WHERE rl.unit_id = blood_unit.unit_id AND fr.status = 'APPROVED'
    )";

pub struct BloodUnitRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BloodUnitRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    /// 插入血袋
    pub fn insert_tx(conn: &Connection, unit: &BloodUnit) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO blood_unit (
                unit_id, blood_type_id, component_id, collected_volume_ml,
                remaining_volume_ml, expiry_date, donor_id, status, revision,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                unit.unit_id,
                unit.blood_type_id,
                unit.component_id,
                unit.collected_volume_ml,
                unit.remaining_volume_ml,
                fmt_ts(&unit.expiry_date),
                unit.donor_id,
                unit.status.as_str(),
                unit.revision,
                fmt_ts(&unit.created_at),
                fmt_ts(&unit.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 按ID查询血袋
    pub fn find_by_id_tx(conn: &Connection, unit_id: &str) -> RepositoryResult<Option<BloodUnit>> {
        let sql = format!("SELECT {} FROM blood_unit WHERE unit_id = ?1", UNIT_COLUMNS);
        let unit = conn
            .query_row(&sql, params![unit_id], Self::map_row)
            .optional()?;
        Ok(unit)
    }

    /// 查询候选血袋
    ///
    /// 条件: 可抽取状态 / 血型在集合内 / 成分匹配 / expiry > as_of / remaining > 0 /
    /// 未被 APPROVED 申请预留。
    /// 排序: expiry_date 升序, unit_id 升序 (FEFO, 结果确定)
    pub fn find_candidates_tx(
        conn: &Connection,
        blood_type_ids: &[String],
        component_id: &str,
        as_of: NaiveDateTime,
    ) -> RepositoryResult<Vec<BloodUnit>> {
        if blood_type_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"SELECT {cols} FROM blood_unit
               WHERE status IN ('AVAILABLE', 'PARTIAL_USED')
                 AND blood_type_id IN ({types})
                 AND component_id = ?
                 AND expiry_date > ?
                 AND remaining_volume_ml > 0
                 AND NOT {reserved}
               ORDER BY expiry_date ASC, unit_id ASC"#,
            cols = UNIT_COLUMNS,
            types = in_placeholders(blood_type_ids.len()),
            reserved = ACTIVE_RESERVATION_EXISTS,
        );

        let mut args: Vec<String> = blood_type_ids.to_vec();
        args.push(component_id.to_string());
        args.push(fmt_ts(&as_of));

        let mut stmt = conn.prepare(&sql)?;
        let units = stmt
            .query_map(params_from_iter(args.iter()), Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    /// 查询预留该血袋的 APPROVED 申请 (若有)
    pub fn find_active_reservation_tx(
        conn: &Connection,
        unit_id: &str,
    ) -> RepositoryResult<Option<String>> {
        let request_id = conn
            .query_row(
                r#"SELECT rl.request_id FROM reservation_line rl
                   JOIN fulfillment_request fr ON fr.request_id = rl.request_id
                   WHERE rl.unit_id = ?1 AND fr.status = 'APPROVED'
                   LIMIT 1"#,
                params![unit_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(request_id)
    }

    /// 更新剩余量与状态 (带乐观锁检查)
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision 不匹配 (其他事务已修改)
    /// - `RepositoryError::NotFound`: unit_id 不存在
    pub fn update_volume_tx(
        conn: &Connection,
        unit_id: &str,
        expected_revision: i64,
        remaining_volume_ml: i64,
        status: UnitStatus,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows_affected = conn.execute(
            r#"UPDATE blood_unit
               SET remaining_volume_ml = ?1, status = ?2, updated_at = ?3,
                   revision = revision + 1
               WHERE unit_id = ?4 AND revision = ?5"#,
            params![
                remaining_volume_ml,
                status.as_str(),
                fmt_ts(&now),
                unit_id,
                expected_revision,
            ],
        )?;

        if rows_affected == 0 {
            return Err(Self::revision_miss(conn, unit_id, expected_revision));
        }
        Ok(())
    }

    /// 将 expiry ≤ as_of 的非终态血袋置为 EXPIRED
    ///
    /// # 返回
    /// 被标记的 unit_id 列表
    pub fn mark_expired_tx(
        conn: &Connection,
        as_of: NaiveDateTime,
        now: NaiveDateTime,
    ) -> RepositoryResult<Vec<String>> {
        let as_of = fmt_ts(&as_of);
        let mut stmt = conn.prepare(
            r#"SELECT unit_id FROM blood_unit
               WHERE status IN ('AVAILABLE', 'RESERVED', 'PARTIAL_USED')
                 AND expiry_date <= ?1
               ORDER BY unit_id"#,
        )?;
        let ids = stmt
            .query_map(params![as_of], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        if !ids.is_empty() {
            conn.execute(
                r#"UPDATE blood_unit
                   SET status = 'EXPIRED', updated_at = ?1, revision = revision + 1
                   WHERE status IN ('AVAILABLE', 'RESERVED', 'PARTIAL_USED')
                     AND expiry_date <= ?2"#,
                params![fmt_ts(&now), as_of],
            )?;
        }
        Ok(ids)
    }

    fn revision_miss(conn: &Connection, unit_id: &str, expected: i64) -> RepositoryError {
        let actual: Result<Option<i64>, _> = conn
            .query_row(
                "SELECT revision FROM blood_unit WHERE unit_id = ?1",
                params![unit_id],
                |row| row.get(0),
            )
            .optional();

        match actual {
            Ok(Some(actual)) => RepositoryError::OptimisticLockFailure {
                entity: "BloodUnit".to_string(),
                id: unit_id.to_string(),
                expected,
                actual,
            },
            Ok(None) => RepositoryError::not_found("BloodUnit", unit_id),
            Err(e) => e.into(),
        }
    }

    // ==========================================
    // 独立读写 (事务外)
    // ==========================================

    pub fn insert(&self, unit: &BloodUnit) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, unit)
    }

    pub fn find_by_id(&self, unit_id: &str) -> RepositoryResult<Option<BloodUnit>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, unit_id)
    }

    /// 查询候选血袋 (只读, 不阻塞写事务以外的任何操作)
    pub fn find_candidates(
        &self,
        blood_type_ids: &[String],
        component_id: &str,
        as_of: NaiveDateTime,
    ) -> RepositoryResult<Vec<BloodUnit>> {
        let conn = self.get_conn()?;
        Self::find_candidates_tx(&conn, blood_type_ids, component_id, as_of)
    }

    /// 按状态列出血袋 (None 表示全部)
    pub fn list(&self, status: Option<UnitStatus>) -> RepositoryResult<Vec<BloodUnit>> {
        let conn = self.get_conn()?;
        let units = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM blood_unit WHERE status = ?1 ORDER BY expiry_date, unit_id",
                    UNIT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![status.as_str()], Self::map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM blood_unit ORDER BY expiry_date, unit_id",
                    UNIT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], Self::map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(units)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<BloodUnit> {
        let expiry: String = row.get(5)?;
        let status: String = row.get(7)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;

        Ok(BloodUnit {
            unit_id: row.get(0)?,
            blood_type_id: row.get(1)?,
            component_id: row.get(2)?,
            collected_volume_ml: row.get(3)?,
            remaining_volume_ml: row.get(4)?,
            expiry_date: parse_ts(5, &expiry)?,
            donor_id: row.get(6)?,
            status: parse_enum_column::<UnitStatus>(7, &status)?,
            revision: row.get(8)?,
            created_at: parse_ts(9, &created_at)?,
            updated_at: parse_ts(10, &updated_at)?,
        })
    }
}
