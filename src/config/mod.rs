// ==========================================
// 血液申请履约引擎 - 配置层
// ==========================================
// 职责: 履约策略配置 (血小板 Rh 规则 / 献血间隔 / 事务超时 / 分配策略)
// 存储: config_kv 表
// ==========================================

pub mod config_manager;

// 重导出核心配置管理器
pub use config_manager::{config_keys, defaults, limits, ConfigManager, FulfillmentPolicy};
