// ==========================================
// 血液申请履约引擎 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::{ConfigApi, InventoryApi, RequestApi};
use crate::config::config_manager::ConfigManager;
use crate::db::open_and_prepare;
use crate::engine::events::NotificationDispatcher;
use crate::engine::identity::IdentityProvider;
use crate::engine::ledger::InventoryLedger;
use crate::engine::lifecycle::RequestLifecycle;
use crate::engine::repositories::FulfillmentRepositories;

/// 应用状态
///
/// 所有 API 共享同一个数据库连接
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    pub conn: Arc<Mutex<Connection>>,

    pub config_manager: Arc<ConfigManager>,

    pub ledger: Arc<InventoryLedger>,

    pub lifecycle: Arc<RequestLifecycle>,

    /// 履约申请API
    pub request_api: Arc<RequestApi>,

    /// 库存管理API
    pub inventory_api: Arc<InventoryApi>,

    /// 配置管理API
    pub config_api: Arc<ConfigApi>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径 (不存在时建库并写入参考数据)
    /// - identity: 身份服务
    /// - dispatcher: 通知派发者
    pub fn new(
        db_path: String,
        identity: Arc<dyn IdentityProvider>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_and_prepare(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        let mut state = Self::from_connection(conn, identity, dispatcher);
        state.db_path = db_path;
        Ok(state)
    }

    /// 基于已准备好的连接组装 (连接须已完成 schema 初始化)
    pub fn from_connection(
        conn: Arc<Mutex<Connection>>,
        identity: Arc<dyn IdentityProvider>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()));
        let repos = FulfillmentRepositories::from_connection(conn.clone());

        let ledger = Arc::new(InventoryLedger::new(repos.clone(), config_manager.clone()));
        let lifecycle = Arc::new(RequestLifecycle::new(
            repos.clone(),
            config_manager.clone(),
            identity,
            dispatcher,
        ));

        let request_api = Arc::new(RequestApi::new(lifecycle.clone()));
        let inventory_api = Arc::new(InventoryApi::new(ledger.clone()));
        let config_api = Arc::new(ConfigApi::new(
            config_manager.clone(),
            repos.action_log_repo.clone(),
        ));

        tracing::info!("AppState初始化完成");

        Self {
            db_path: String::new(),
            conn,
            config_manager,
            ledger,
            lifecycle,
            request_api,
            inventory_api,
            config_api,
        }
    }
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 BLOOD_FULFILLMENT_DB_PATH > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("BLOOD_FULFILLMENT_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./blood_fulfillment.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("blood-fulfillment");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("blood_fulfillment.db");
        }
    }

    path.to_string_lossy().to_string()
}
