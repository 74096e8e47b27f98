// ==========================================
// 血液申请履约引擎 - API 层
// ==========================================
// 职责: 对外业务接口 (申请 / 库存 / 配置), 统一错误映射
// ==========================================

pub mod config_api;
pub mod error;
pub mod inventory_api;
pub mod request_api;

// 重导出核心类型
pub use config_api::{ConfigApi, ConfigItem};
pub use error::{ApiError, ApiResult, ErrorBody};
pub use inventory_api::{InventoryApi, ReservedUnitView, SweepResponse};
pub use request_api::{ApproveBody, ApproveResponse, RequestApi, SubmitResponse, TransitionResponse};
