// ==========================================
// 血液申请履约引擎 - 引擎层
// ==========================================
// 职责: 实现履约业务规则, 不拼 SQL
// 组件 (由叶到根):
// - compatibility: 相容性矩阵 (纯函数)
// - ledger: 库存台账 (唯一可修改血袋剩余量/状态的组件)
// - allocation + strategy: 分配规划 (纯计算, 策略可插拔)
// - lifecycle: 申请状态机, 事务内编排规划与台账
// - mobilization: 库存不足时的献血者动员
// ==========================================

pub mod allocation;
pub mod compatibility;
pub mod error;
pub mod events;
pub mod identity;
pub mod ledger;
pub mod lifecycle;
pub mod mobilization;
pub mod repositories;
pub mod strategy;

// 重导出核心引擎
pub use allocation::{AllocationPlan, AllocationPlanner};
pub use compatibility::CompatibilityMatrix;
pub use error::{FulfillmentError, FulfillmentResult};
pub use events::{NoOpDispatcher, NotificationDispatcher, NotificationIntent};
pub use identity::{IdentityProvider, StaticIdentityProvider};
pub use ledger::{InventoryLedger, SYSTEM_ACTOR};
pub use lifecycle::{ApprovalOutcome, PlanningSession, RequestLifecycle};
pub use mobilization::{MobilizationCoordinator, MobilizationOutcome};
pub use repositories::FulfillmentRepositories;
pub use strategy::AllocationStrategy;
