// ==========================================
// 血液申请履约引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、状态规则
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod actor;
pub mod blood;
pub mod request;
pub mod types;
pub mod unit;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use actor::{Actor, DonorRecord};
pub use blood::{BloodComponent, BloodType};
pub use request::{FulfillmentRequest, ManualSelection, NewFulfillmentRequest, ReservationLine};
pub use types::{AboGroup, ActorRole, ComponentKind, RequestStatus, RhFactor, UnitStatus};
pub use unit::{BloodUnit, NewBloodUnit};
