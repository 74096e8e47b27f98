// ==========================================
// 血液申请履约引擎 - SQLite 连接与事务基础设施
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (外键 / busy_timeout)
// - 统一建库脚本与参考数据种子 (幂等)
// - 提供带超时上限的 IMMEDIATE 事务执行器, 供台账与状态机复用
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDateTime, Timelike, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 库内时间戳统一格式（UTC, 秒级）
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 获取连接锁时的轮询间隔
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化数据库 schema（幂等）
///
/// 表结构与领域模型一一对应, 不存派生字段。
/// revision 列用于乐观锁: 每次写入 +1, 写入时携带期望值。
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS blood_type (
            blood_type_id TEXT PRIMARY KEY,
            abo_group TEXT NOT NULL CHECK(abo_group IN ('A', 'B', 'AB', 'O')),
            rh_factor TEXT NOT NULL CHECK(rh_factor IN ('+', '-')),
            UNIQUE(abo_group, rh_factor)
        );

        CREATE TABLE IF NOT EXISTS blood_component (
            component_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL UNIQUE CHECK(
                kind IN ('WHOLE_BLOOD', 'RED_CELLS', 'PLASMA', 'PLATELETS')
            )
        );

        CREATE TABLE IF NOT EXISTS blood_unit (
            unit_id TEXT PRIMARY KEY,
            blood_type_id TEXT NOT NULL REFERENCES blood_type(blood_type_id),
            component_id TEXT NOT NULL REFERENCES blood_component(component_id),
            collected_volume_ml INTEGER NOT NULL CHECK(collected_volume_ml > 0),
            remaining_volume_ml INTEGER NOT NULL CHECK(
                remaining_volume_ml >= 0 AND remaining_volume_ml <= collected_volume_ml
            ),
            expiry_date TEXT NOT NULL,
            donor_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK(
                status IN ('AVAILABLE', 'RESERVED', 'PARTIAL_USED', 'USED', 'EXPIRED', 'INACTIVE')
            ),
            revision INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK(status <> 'USED' OR remaining_volume_ml = 0)
        );

        CREATE INDEX IF NOT EXISTS idx_blood_unit_candidate
            ON blood_unit(component_id, status, expiry_date, unit_id);

        CREATE TABLE IF NOT EXISTS fulfillment_request (
            request_id TEXT PRIMARY KEY,
            recipient_id TEXT NOT NULL,
            blood_type_id TEXT NOT NULL REFERENCES blood_type(blood_type_id),
            component_id TEXT NOT NULL REFERENCES blood_component(component_id),
            required_volume_ml INTEGER NOT NULL CHECK(required_volume_ml > 0),
            is_emergency INTEGER NOT NULL DEFAULT 0 CHECK(is_emergency IN (0, 1)),
            status TEXT NOT NULL CHECK(
                status IN ('PENDING', 'APPROVED', 'COMPLETED', 'REJECTED', 'CANCELLED')
            ),
            request_date TEXT NOT NULL,
            approval_date TEXT,
            completion_date TEXT,
            cancelled_date TEXT,
            rejected_date TEXT,
            responsible_actor_id TEXT,
            notes TEXT NOT NULL DEFAULT '',
            revision INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_fulfillment_request_status
            ON fulfillment_request(status, request_date);

        CREATE TABLE IF NOT EXISTS reservation_line (
            request_id TEXT NOT NULL REFERENCES fulfillment_request(request_id) ON DELETE CASCADE,
            unit_id TEXT NOT NULL REFERENCES blood_unit(unit_id),
            line_no INTEGER NOT NULL,
            volume_used_ml INTEGER NOT NULL CHECK(volume_used_ml > 0),
            PRIMARY KEY (request_id, unit_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reservation_line_unit
            ON reservation_line(unit_id);

        CREATE TABLE IF NOT EXISTS action_log (
            action_id TEXT PRIMARY KEY,
            request_id TEXT,
            action_type TEXT NOT NULL,
            action_ts TEXT NOT NULL,
            actor TEXT NOT NULL,
            payload_json TEXT,
            detail TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_action_log_request
            ON action_log(request_id, action_ts);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        params![CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

/// 写入参考数据种子（8 种血型 + 4 种成分, 幂等）
///
/// 血型 ID 即其标准写法（如 "AB+"）, 成分 ID 即其类别代码（如 "PLASMA"）。
pub fn seed_reference_data(conn: &Connection) -> rusqlite::Result<()> {
    const BLOOD_TYPES: [(&str, &str, &str); 8] = [
        ("O-", "O", "-"),
        ("O+", "O", "+"),
        ("A-", "A", "-"),
        ("A+", "A", "+"),
        ("B-", "B", "-"),
        ("B+", "B", "+"),
        ("AB-", "AB", "-"),
        ("AB+", "AB", "+"),
    ];
    const COMPONENTS: [&str; 4] = ["WHOLE_BLOOD", "RED_CELLS", "PLASMA", "PLATELETS"];

    for (id, abo, rh) in BLOOD_TYPES {
        conn.execute(
            "INSERT OR IGNORE INTO blood_type (blood_type_id, abo_group, rh_factor) VALUES (?1, ?2, ?3)",
            params![id, abo, rh],
        )?;
    }
    for kind in COMPONENTS {
        conn.execute(
            "INSERT OR IGNORE INTO blood_component (component_id, kind) VALUES (?1, ?1)",
            params![kind],
        )?;
    }
    Ok(())
}

/// 打开数据库并完成建库 + 种子（服务启动入口使用）
pub fn open_and_prepare(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    seed_reference_data(&conn)?;

    match read_schema_version(&conn)? {
        Some(v) if v == CURRENT_SCHEMA_VERSION => {}
        other => warn!(
            expected = CURRENT_SCHEMA_VERSION,
            actual = ?other,
            "schema_version 与代码期望不一致"
        ),
    }
    Ok(conn)
}

// ==========================================
// 时间戳工具
// ==========================================

/// 当前 UTC 时间（截断到秒, 与库内精度一致）
pub fn now_ts() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

/// 格式化时间戳
pub fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(DATETIME_FORMAT).to_string()
}

/// 解析时间戳列（失败时转为 rusqlite 转换错误）
pub fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// 解析可空时间戳列
pub fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<NaiveDateTime>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

// ==========================================
// 事务执行器
// ==========================================

/// 在截止时间前获取连接锁
///
/// std Mutex 无超时 API, 这里以短间隔 try_lock 轮询。
pub fn lock_with_deadline(
    conn: &Mutex<Connection>,
    deadline: Instant,
) -> RepositoryResult<MutexGuard<'_, Connection>> {
    loop {
        match conn.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(TryLockError::Poisoned(e)) => return Err(RepositoryError::LockError(e.to_string())),
            Err(TryLockError::WouldBlock) => {
                if Instant::now() >= deadline {
                    return Err(RepositoryError::TransactionTimeout(
                        "等待数据库连接超时".to_string(),
                    ));
                }
                thread::sleep(LOCK_POLL_INTERVAL);
            }
        }
    }
}

/// 在带超时上限的 IMMEDIATE 事务中执行闭包
///
/// # 红线
/// - 闭包返回 Err 或超过截止时间时, 事务被丢弃（回滚）, 不留下半提交状态
/// - 闭包内只能使用事务句柄, 不得再次获取同一连接的锁
pub fn run_in_transaction<T, E, F>(conn: &Mutex<Connection>, timeout: Duration, f: F) -> Result<T, E>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    E: From<RepositoryError>,
{
    let started = Instant::now();
    let deadline = started + timeout;

    let mut guard = lock_with_deadline(conn, deadline)?;
    let tx = guard
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(RepositoryError::from)?;

    let out = f(&tx)?;

    if Instant::now() > deadline {
        warn!(elapsed_ms = started.elapsed().as_millis() as u64, "事务超时, 回滚");
        drop(tx);
        return Err(RepositoryError::TransactionTimeout(format!(
            "事务执行超过 {}ms",
            timeout.as_millis()
        ))
        .into());
    }

    tx.commit().map_err(RepositoryError::from)?;
    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "事务提交");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        seed_reference_data(&conn).unwrap();
        conn
    }

    #[test]
    fn test_schema_and_seed_are_idempotent() {
        let conn = memory_conn();
        init_schema(&conn).unwrap();
        seed_reference_data(&conn).unwrap();

        let types: i64 = conn
            .query_row("SELECT COUNT(*) FROM blood_type", [], |r| r.get(0))
            .unwrap();
        let components: i64 = conn
            .query_row("SELECT COUNT(*) FROM blood_component", [], |r| r.get(0))
            .unwrap();
        assert_eq!(types, 8);
        assert_eq!(components, 4);
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_run_in_transaction_rolls_back_on_error() {
        let conn = Mutex::new(memory_conn());

        let result: Result<(), RepositoryError> =
            run_in_transaction(&conn, Duration::from_secs(1), |tx| {
                tx.execute(
                    "INSERT INTO config_kv (key, value) VALUES ('k', 'v')",
                    [],
                )?;
                Err(RepositoryError::ValidationError("中止".to_string()))
            });
        assert!(result.is_err());

        let count: i64 = conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM config_kv", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0, "出错的事务不得留下写入");
    }

    #[test]
    fn test_lock_with_deadline_times_out() {
        let conn = Arc::new(Mutex::new(memory_conn()));
        let _held = conn.lock().unwrap();

        let result = lock_with_deadline(&conn, Instant::now() + Duration::from_millis(20));
        assert!(matches!(result, Err(RepositoryError::TransactionTimeout(_))));
    }

    #[test]
    fn test_ts_format_roundtrip_keeps_seconds() {
        let ts = now_ts();
        let parsed = parse_ts(0, &fmt_ts(&ts)).unwrap();
        assert_eq!(parsed, ts);
    }
}
