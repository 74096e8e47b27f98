// ==========================================
// 血液申请履约引擎 - 配置管理器
// ==========================================
// 职责: 策略配置加载、查询、覆写
// 存储: config_kv 表 (scope_id = 'global')
// ==========================================

use crate::engine::strategy::AllocationStrategy;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

// ==========================================
// FulfillmentPolicy - 履约策略快照
// ==========================================
// 每次生命周期调用读取一次, 调用期间不变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentPolicy {
    /// 血小板是否允许 Rh 不合 (ABO 仍须相容)
    pub platelets_allow_rh_mismatch: bool,
    /// 献血间隔 (天), 间隔内的献血者不参与动员
    pub donation_cooldown_days: i64,
    /// 审批/取消事务超时 (毫秒)
    pub approve_timeout_ms: u64,
    /// 候选血袋分配策略
    pub allocation_strategy: AllocationStrategy,
}

impl FulfillmentPolicy {
    pub fn approve_timeout(&self) -> Duration {
        Duration::from_millis(self.approve_timeout_ms)
    }
}

impl Default for FulfillmentPolicy {
    fn default() -> Self {
        Self {
            platelets_allow_rh_mismatch: defaults::PLATELETS_ALLOW_RH_MISMATCH,
            donation_cooldown_days: defaults::DONATION_COOLDOWN_DAYS,
            approve_timeout_ms: defaults::APPROVE_TIMEOUT_MS,
            allocation_strategy: AllocationStrategy::default(),
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值 (upsert)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO config_kv (scope_id, key, value, updated_at)
               VALUES ('global', ?1, ?2, datetime('now'))
               ON CONFLICT(scope_id, key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at"#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有 global 配置的快照
    pub fn get_config_snapshot(&self) -> RepositoryResult<BTreeMap<String, String>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// 加载履约策略
    ///
    /// 缺失的键使用默认值; 格式错误的值记录告警后回落默认值
    pub fn load_policy(&self) -> RepositoryResult<FulfillmentPolicy> {
        let mut policy = FulfillmentPolicy::default();

        if let Some(raw) = self.get_global_config_value(config_keys::PLATELETS_ALLOW_RH_MISMATCH)? {
            match parse_bool(&raw) {
                Some(v) => policy.platelets_allow_rh_mismatch = v,
                None => warn_malformed(config_keys::PLATELETS_ALLOW_RH_MISMATCH, &raw),
            }
        }

        if let Some(raw) = self.get_global_config_value(config_keys::DONATION_COOLDOWN_DAYS)? {
            match raw.trim().parse::<i64>() {
                Ok(v) if (0..=limits::MAX_DONATION_COOLDOWN_DAYS).contains(&v) => {
                    policy.donation_cooldown_days = v
                }
                _ => warn_malformed(config_keys::DONATION_COOLDOWN_DAYS, &raw),
            }
        }

        if let Some(raw) = self.get_global_config_value(config_keys::APPROVE_TIMEOUT_MS)? {
            match raw.trim().parse::<u64>() {
                Ok(v) if (1..=limits::MAX_APPROVE_TIMEOUT_MS).contains(&v) => {
                    policy.approve_timeout_ms = v
                }
                _ => warn_malformed(config_keys::APPROVE_TIMEOUT_MS, &raw),
            }
        }

        if let Some(raw) = self.get_global_config_value(config_keys::ALLOCATION_STRATEGY)? {
            match raw.parse::<AllocationStrategy>() {
                Ok(v) => policy.allocation_strategy = v,
                Err(_) => warn_malformed(config_keys::ALLOCATION_STRATEGY, &raw),
            }
        }

        Ok(policy)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn warn_malformed(key: &str, raw: &str) {
    warn!(config_key = key, raw_value = %raw, "配置格式错误，使用默认值");
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    pub const PLATELETS_ALLOW_RH_MISMATCH: &str = "platelets_allow_rh_mismatch";
    pub const DONATION_COOLDOWN_DAYS: &str = "donation_cooldown_days";
    pub const APPROVE_TIMEOUT_MS: &str = "approve_timeout_ms";
    pub const ALLOCATION_STRATEGY: &str = "allocation_strategy";
}

// ==========================================
// 默认值
// ==========================================
pub mod defaults {
    pub const PLATELETS_ALLOW_RH_MISMATCH: bool = true;
    pub const DONATION_COOLDOWN_DAYS: i64 = 56;
    pub const APPROVE_TIMEOUT_MS: u64 = 5_000;
}

// ==========================================
// 取值上限
// ==========================================
pub mod limits {
    /// 献血间隔上限 (天)
    pub const MAX_DONATION_COOLDOWN_DAYS: i64 = 36_500;
    /// 事务超时上限 (毫秒)
    pub const MAX_APPROVE_TIMEOUT_MS: u64 = 600_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_load_policy_defaults_when_empty() {
        let policy = manager().load_policy().unwrap();
        assert_eq!(policy, FulfillmentPolicy::default());
        assert!(policy.platelets_allow_rh_mismatch);
        assert_eq!(policy.donation_cooldown_days, 56);
        assert_eq!(policy.approve_timeout(), Duration::from_millis(5_000));
    }

    #[test]
    fn test_overrides_and_malformed_values() {
        let cm = manager();
        cm.set_global_config_value(config_keys::PLATELETS_ALLOW_RH_MISMATCH, "false").unwrap();
        cm.set_global_config_value(config_keys::DONATION_COOLDOWN_DAYS, "90").unwrap();
        cm.set_global_config_value(config_keys::APPROVE_TIMEOUT_MS, "not-a-number").unwrap();
        cm.set_global_config_value(config_keys::ALLOCATION_STRATEGY, "largest_first").unwrap();

        let policy = cm.load_policy().unwrap();
        assert!(!policy.platelets_allow_rh_mismatch);
        assert_eq!(policy.donation_cooldown_days, 90);
        assert_eq!(policy.approve_timeout_ms, defaults::APPROVE_TIMEOUT_MS);
        assert_eq!(policy.allocation_strategy, AllocationStrategy::LargestFirst);

        // upsert 覆盖
        cm.set_global_config_value(config_keys::DONATION_COOLDOWN_DAYS, "28").unwrap();
        assert_eq!(cm.load_policy().unwrap().donation_cooldown_days, 28);
        assert_eq!(cm.get_config_snapshot().unwrap().len(), 4);
    }

    #[test]
    fn test_out_of_range_values_fall_back_to_defaults() {
        let cm = manager();
        cm.set_global_config_value(config_keys::DONATION_COOLDOWN_DAYS, "9223372036854775807")
            .unwrap();
        cm.set_global_config_value(config_keys::APPROVE_TIMEOUT_MS, "600001").unwrap();

        let policy = cm.load_policy().unwrap();
        assert_eq!(policy.donation_cooldown_days, defaults::DONATION_COOLDOWN_DAYS);
        assert_eq!(policy.approve_timeout_ms, defaults::APPROVE_TIMEOUT_MS);
    }
}
