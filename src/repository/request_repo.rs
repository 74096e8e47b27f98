// ==========================================
// 血液申请履约引擎 - 履约申请数据仓储
// ==========================================
// 对齐: fulfillment_request 表 + reservation_line 表
// 红线: Repository 不做业务逻辑, 只做数据映射
// 并发控制: 状态写入携带期望 revision
// ==========================================

use crate::db::{fmt_ts, parse_opt_ts, parse_ts};
use crate::domain::request::{FulfillmentRequest, ReservationLine};
use crate::domain::types::RequestStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::parse_enum_column;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const REQUEST_COLUMNS: &str = "request_id, recipient_id, blood_type_id, component_id, \
     required_volume_ml, is_emergency, status, request_date, approval_date, completion_date, \
     cancelled_date, rejected_date, responsible_actor_id, notes, revision";

pub struct RequestRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RequestRepository {
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

    /// 插入申请 (不含预留明细)
    pub fn insert_tx(conn: &Connection, request: &FulfillmentRequest) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO fulfillment_request (
                request_id, recipient_id, blood_type_id, component_id,
                required_volume_ml, is_emergency, status, request_date,
                approval_date, completion_date, cancelled_date, rejected_date,
                responsible_actor_id, notes, revision
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                request.request_id,
                request.recipient_id,
                request.blood_type_id,
                request.component_id,
                request.required_volume_ml,
                request.is_emergency,
                request.status.as_str(),
                fmt_ts(&request.request_date),
                request.approval_date.as_ref().map(fmt_ts),
                request.completion_date.as_ref().map(fmt_ts),
                request.cancelled_date.as_ref().map(fmt_ts),
                request.rejected_date.as_ref().map(fmt_ts),
                request.responsible_actor_id,
                request.notes,
                request.revision,
            ],
        )?;
        Ok(())
    }

    /// 按ID查询申请 (含预留明细)
    pub fn find_by_id_tx(
        conn: &Connection,
        request_id: &str,
    ) -> RepositoryResult<Option<FulfillmentRequest>> {
        let sql = format!(
            "SELECT {} FROM fulfillment_request WHERE request_id = ?1",
            REQUEST_COLUMNS
        );
        let request = conn
            .query_row(&sql, params![request_id], Self::map_row)
            .optional()?;

        match request {
            Some(mut request) => {
                request.reserved_units = Self::find_lines_tx(conn, request_id)?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    /// 查询预留明细 (按 line_no 排序)
    pub fn find_lines_tx(conn: &Connection, request_id: &str) -> RepositoryResult<Vec<ReservationLine>> {
        let mut stmt = conn.prepare(
            r#"SELECT unit_id, volume_used_ml FROM reservation_line
               WHERE request_id = ?1
               ORDER BY line_no"#,
        )?;
        let lines = stmt
            .query_map(params![request_id], |row| {
                Ok(ReservationLine {
                    unit_id: row.get(0)?,
                    volume_used_ml: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    /// 写入预留明细
    pub fn insert_lines_tx(
        conn: &Connection,
        request_id: &str,
        lines: &[ReservationLine],
    ) -> RepositoryResult<()> {
        let mut stmt = conn.prepare(
            r#"INSERT INTO reservation_line (request_id, unit_id, line_no, volume_used_ml)
               VALUES (?1, ?2, ?3, ?4)"#,
        )?;
        for (line_no, line) in lines.iter().enumerate() {
            stmt.execute(params![request_id, line.unit_id, line_no as i64, line.volume_used_ml])?;
        }
        Ok(())
    }

    /// 清除预留明细
    pub fn delete_lines_tx(conn: &Connection, request_id: &str) -> RepositoryResult<usize> {
        let rows = conn.execute(
            "DELETE FROM reservation_line WHERE request_id = ?1",
            params![request_id],
        )?;
        Ok(rows)
    }

    /// 写入状态迁移结果 (带乐观锁检查)
    ///
    /// `request.revision` 为期望 revision; 成功后库内 revision + 1。
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision 不匹配 (其他会话已迁移)
    /// - `RepositoryError::NotFound`: request_id 不存在
    pub fn update_state_tx(conn: &Connection, request: &FulfillmentRequest) -> RepositoryResult<()> {
        let rows_affected = conn.execute(
            r#"UPDATE fulfillment_request
               SET status = ?1, approval_date = ?2, completion_date = ?3,
                   cancelled_date = ?4, rejected_date = ?5, responsible_actor_id = ?6,
                   notes = ?7, revision = revision + 1
               WHERE request_id = ?8 AND revision = ?9"#,
            params![
                request.status.as_str(),
                request.approval_date.as_ref().map(fmt_ts),
                request.completion_date.as_ref().map(fmt_ts),
                request.cancelled_date.as_ref().map(fmt_ts),
                request.rejected_date.as_ref().map(fmt_ts),
                request.responsible_actor_id,
                request.notes,
                request.request_id,
                request.revision,
            ],
        )?;

        if rows_affected == 0 {
            let actual: Option<i64> = conn
                .query_row(
                    "SELECT revision FROM fulfillment_request WHERE request_id = ?1",
                    params![request.request_id],
                    |row| row.get(0),
                )
                .optional()?;

            return Err(match actual {
                Some(actual) => RepositoryError::OptimisticLockFailure {
                    entity: "FulfillmentRequest".to_string(),
                    id: request.request_id.clone(),
                    expected: request.revision,
                    actual,
                },
                None => RepositoryError::not_found("FulfillmentRequest", &request.request_id),
            });
        }
        Ok(())
    }

    // ==========================================
    // 独立读 (事务外)
    // ==========================================

    pub fn find_by_id(&self, request_id: &str) -> RepositoryResult<Option<FulfillmentRequest>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, request_id)
    }

    /// 按状态列出申请 (None 表示全部)
    ///
    /// 排序: 紧急申请优先, 其次按申请时间升序
    pub fn list(&self, status: Option<RequestStatus>) -> RepositoryResult<Vec<FulfillmentRequest>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"SELECT {} FROM fulfillment_request
               WHERE (?1 IS NULL OR status = ?1)
               ORDER BY is_emergency DESC, request_date ASC, request_id ASC"#,
            REQUEST_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut requests = stmt
            .query_map(params![status.map(|s| s.as_str())], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        for request in requests.iter_mut() {
            request.reserved_units = Self::find_lines_tx(&conn, &request.request_id)?;
        }
        Ok(requests)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<FulfillmentRequest> {
        let status: String = row.get(6)?;
        let request_date: String = row.get(7)?;

        Ok(FulfillmentRequest {
            request_id: row.get(0)?,
            recipient_id: row.get(1)?,
            blood_type_id: row.get(2)?,
            component_id: row.get(3)?,
            required_volume_ml: row.get(4)?,
            is_emergency: row.get(5)?,
            status: parse_enum_column::<RequestStatus>(6, &status)?,
            request_date: parse_ts(7, &request_date)?,
            approval_date: parse_opt_ts(8, row.get(8)?)?,
            completion_date: parse_opt_ts(9, row.get(9)?)?,
            cancelled_date: parse_opt_ts(10, row.get(10)?)?,
            rejected_date: parse_opt_ts(11, row.get(11)?)?,
            responsible_actor_id: row.get(12)?,
            notes: row.get(13)?,
            reserved_units: Vec::new(),
            revision: row.get(14)?,
        })
    }
}
