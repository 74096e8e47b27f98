// ==========================================
// 血液申请履约引擎 - 操作日志数据仓储
// ==========================================
// 对齐: action_log 表
// 红线: 审计写入与其记录的变更处于同一事务
// ==========================================

use crate::db::{fmt_ts, parse_ts};
use crate::domain::action_log::ActionLog;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

pub struct ActionLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ActionLogRepository {
    /// 创建新的操作日志仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 在给定连接/事务内插入操作日志
    ///
    /// # 返回
    /// - `Ok(action_id)`: 成功插入
    pub fn insert_tx(conn: &Connection, log: &ActionLog) -> RepositoryResult<String> {
        conn.execute(
            r#"INSERT INTO action_log (
                action_id, request_id, action_type, action_ts, actor, payload_json, detail
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                log.action_id,
                log.request_id,
                log.action_type,
                fmt_ts(&log.action_ts),
                log.actor,
                log.payload_json.as_ref().map(|v| v.to_string()),
                log.detail,
            ],
        )?;
        Ok(log.action_id.clone())
    }

    pub fn insert(&self, log: &ActionLog) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, log)
    }

    /// 查询指定申请的操作日志 (按时间升序)
    pub fn find_by_request_id(&self, request_id: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT action_id, request_id, action_type, action_ts, actor, payload_json, detail
               FROM action_log
               WHERE request_id = ?1
               ORDER BY action_ts ASC, rowid ASC"#,
        )?;
        let logs = stmt
            .query_map(params![request_id], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    /// 查询最近的操作日志
    pub fn find_recent(&self, limit: usize) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT action_id, request_id, action_type, action_ts, actor, payload_json, detail
               FROM action_log
               ORDER BY action_ts DESC, rowid DESC
               LIMIT ?1"#,
        )?;
        let logs = stmt
            .query_map(params![limit as i64], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<ActionLog> {
        let action_ts: String = row.get(3)?;
        let payload: Option<String> = row.get(5)?;

        Ok(ActionLog {
            action_id: row.get(0)?,
            request_id: row.get(1)?,
            action_type: row.get(2)?,
            action_ts: parse_ts(3, &action_ts)?,
            actor: row.get(4)?,
            payload_json: payload.and_then(|s| serde_json::from_str(&s).ok()),
            detail: row.get(6)?,
        })
    }
}
