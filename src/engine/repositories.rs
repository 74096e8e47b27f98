// ==========================================
// 血液申请履约引擎 - 引擎层仓储聚合
// ==========================================
// 职责: 聚合履约引擎所需的所有 Repository 与共享连接
// ==========================================

use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use crate::repository::{
    ActionLogRepository, BloodUnitRepository, ReferenceRepository, RequestRepository,
};

/// 履约引擎仓储集合
///
/// # 包含的仓储
/// - `conn`: 共享连接 (事务执行器直接使用)
/// - `unit_repo`: 血袋
/// - `request_repo`: 履约申请与预留明细
/// - `action_log_repo`: 操作日志
/// - `reference_repo`: 血型/成分参考数据
#[derive(Clone)]
pub struct FulfillmentRepositories {
    pub conn: Arc<Mutex<Connection>>,
    pub unit_repo: Arc<BloodUnitRepository>,
    pub request_repo: Arc<RequestRepository>,
    pub action_log_repo: Arc<ActionLogRepository>,
    pub reference_repo: Arc<ReferenceRepository>,
}

impl FulfillmentRepositories {
    /// 基于同一连接创建全部仓储
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            unit_repo: Arc::new(BloodUnitRepository::new(conn.clone())),
            request_repo: Arc::new(RequestRepository::new(conn.clone())),
            action_log_repo: Arc::new(ActionLogRepository::new(conn.clone())),
            reference_repo: Arc::new(ReferenceRepository::new(conn.clone())),
            conn,
        }
    }
}
