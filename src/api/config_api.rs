// ==========================================
// 血液申请履约引擎 - 配置管理 API
// ==========================================
// 职责: 履约策略查询与覆写, 覆写记录 ActionLog
// ==========================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::config::config_manager::{config_keys, limits, ConfigManager, FulfillmentPolicy};
use crate::db::now_ts;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::actor::Actor;
use crate::engine::strategy::AllocationStrategy;
use crate::repository::action_log_repo::ActionLogRepository;

/// 配置项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigItem {
    pub key: String,
    pub value: String,
}

pub struct ConfigApi {
    config_manager: Arc<ConfigManager>,
    action_log_repo: Arc<ActionLogRepository>,
}

impl ConfigApi {
    pub fn new(config_manager: Arc<ConfigManager>, action_log_repo: Arc<ActionLogRepository>) -> Self {
        Self {
            config_manager,
            action_log_repo,
        }
    }

    /// 当前生效的履约策略 (缺失键取默认值)
    pub fn get_policy(&self) -> ApiResult<FulfillmentPolicy> {
        Ok(self.config_manager.load_policy()?)
    }

    /// 全部已覆写的配置项
    pub fn list_configs(&self) -> ApiResult<Vec<ConfigItem>> {
        let snapshot: BTreeMap<String, String> = self.config_manager.get_config_snapshot()?;
        Ok(snapshot
            .into_iter()
            .map(|(key, value)| ConfigItem { key, value })
            .collect())
    }

    /// 覆写单个策略项
    ///
    /// # 参数
    /// - key: 策略键 (见 config_keys)
    /// - value: 新值, 写入前按键校验
    /// - actor: 操作人 (须为 STAFF/ADMIN)
    /// - reason: 覆写原因 (写入审计)
    pub fn set_policy_value(
        &self,
        key: &str,
        value: &str,
        actor: &Actor,
        reason: &str,
    ) -> ApiResult<ConfigItem> {
        if !actor.can_manage_requests() {
            return Err(ApiError::PermissionDenied(format!(
                "修改配置需要 STAFF 或 ADMIN 角色, 当前操作人 {} 为 {}",
                actor.actor_id, actor.role
            )));
        }
        if reason.trim().is_empty() {
            return Err(ApiError::InvalidInput("修改原因不能为空".to_string()));
        }

        let value = validate_policy_value(key, value)?;
        let old_value = self.config_manager.get_global_config_value(key)?;
        self.config_manager.set_global_config_value(key, &value)?;

        let log = ActionLog::new(None, ActionType::ConfigUpdate, actor.actor_id.clone(), now_ts())
            .with_payload(&serde_json::json!({
                "key": key,
                "old_value": old_value,
                "new_value": value,
            }))
            .with_detail(reason.trim());
        self.action_log_repo.insert(&log)?;

        info!(config_key = key, new_value = %value, actor_id = %actor.actor_id, "履约策略已更新");

        Ok(ConfigItem {
            key: key.to_string(),
            value,
        })
    }
}

/// 校验并规范化策略值
fn validate_policy_value(key: &str, value: &str) -> ApiResult<String> {
    let raw = value.trim();
    let invalid = |expect: &str| ApiError::InvalidInput(format!("{} 的值 '{}' 无效: {}", key, raw, expect));

    match key {
        config_keys::PLATELETS_ALLOW_RH_MISMATCH => match raw.to_lowercase().as_str() {
            "true" => Ok("true".to_string()),
            "false" => Ok("false".to_string()),
            _ => Err(invalid("应为 true/false")),
        },
        config_keys::DONATION_COOLDOWN_DAYS => match raw.parse::<i64>() {
            Ok(v) if (0..=limits::MAX_DONATION_COOLDOWN_DAYS).contains(&v) => Ok(v.to_string()),
            _ => Err(invalid(&format!(
                "应为 0 到 {} 之间的整数",
                limits::MAX_DONATION_COOLDOWN_DAYS
            ))),
        },
        config_keys::APPROVE_TIMEOUT_MS => match raw.parse::<u64>() {
            Ok(v) if (1..=limits::MAX_APPROVE_TIMEOUT_MS).contains(&v) => Ok(v.to_string()),
            _ => Err(invalid(&format!(
                "应为 1 到 {} 之间的整数",
                limits::MAX_APPROVE_TIMEOUT_MS
            ))),
        },
        config_keys::ALLOCATION_STRATEGY => raw
            .parse::<AllocationStrategy>()
            .map(|s| s.as_str().to_string())
            .map_err(|_| invalid("应为 fefo/partial_first/largest_first")),
        _ => Err(ApiError::InvalidInput(format!("未知配置项: {}", key))),
    }
}
