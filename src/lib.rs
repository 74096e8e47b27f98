// ==========================================
// 血液申请履约引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 血液申请履约 (相容性判定 / 库存台账 / 分配规划 / 申请状态机 / 献血者动员)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 履约策略
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/事务）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{AboGroup, ActorRole, ComponentKind, RequestStatus, RhFactor, UnitStatus};

// 领域实体
pub use domain::{
    ActionLog, ActionType, Actor, BloodComponent, BloodType, BloodUnit, DonorRecord,
    FulfillmentRequest, ManualSelection, NewBloodUnit, NewFulfillmentRequest, ReservationLine,
};

// 引擎
pub use engine::{
    AllocationPlanner, AllocationStrategy, ApprovalOutcome, CompatibilityMatrix,
    FulfillmentError, InventoryLedger, MobilizationCoordinator, RequestLifecycle,
};

// API
pub use api::{ApiError, ConfigApi, InventoryApi, RequestApi};

// 应用
pub use app::AppState;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "血液申请履约引擎";
