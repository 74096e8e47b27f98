// ==========================================
// 血液申请履约引擎 - API层错误类型
// ==========================================
// 职责: 将引擎/仓储错误转换为对外契约 (HTTP 风格状态码 + 稳定错误码)
// 约定: 库存不足不是错误, 审批以 PENDING + mobilized 返回
// ==========================================

use crate::engine::error::FulfillmentError;
use crate::repository::error::RepositoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入与权限
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("权限不足: {0}")]
    PermissionDenied(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ==========================================
    // 业务规则
    // ==========================================
    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("库存不足: 需求 {required_ml}ml, 可用 {available_ml}ml")]
    InsufficientInventory { required_ml: i64, available_ml: i64 },

    #[error("库存恢复失败: {0}")]
    RestoreFailure(String),

    // ==========================================
    // 并发控制
    // ==========================================
    #[error("预留冲突: {0}")]
    ReservationConflict(String),

    #[error("事务超时: {0}")]
    TransactionTimeout(String),

    // ==========================================
    // 数据访问与通用
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// HTTP 风格状态码
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidInput(_) => 400,
            ApiError::PermissionDenied(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::InvalidStateTransition { .. }
            | ApiError::ReservationConflict(_)
            | ApiError::TransactionTimeout(_) => 409,
            ApiError::InsufficientInventory { .. } => 422,
            ApiError::RestoreFailure(_)
            | ApiError::DatabaseError(_)
            | ApiError::InternalError(_)
            | ApiError::Other(_) => 500,
        }
    }

    /// 稳定错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "VALIDATION_ERROR",
            ApiError::PermissionDenied(_) => "PERMISSION_DENIED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidStateTransition { .. } => "INVALID_TRANSITION",
            ApiError::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            ApiError::RestoreFailure(_) => "RESTORE_FAILURE",
            ApiError::ReservationConflict(_) => "RESERVATION_CONFLICT",
            ApiError::TransactionTimeout(_) => "TRANSACTION_TIMEOUT",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) | ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// 调用方可整体重试 (不会留下部分提交)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::ReservationConflict(_)
                | ApiError::TransactionTimeout(_)
                | ApiError::RestoreFailure(_)
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            status: self.status_code(),
            code: self.error_code().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

/// 错误响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

// ==========================================
// 从 FulfillmentError 转换
// ==========================================
impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        match err {
            FulfillmentError::Validation(msg) => ApiError::InvalidInput(msg),
            e @ FulfillmentError::OverDraw { .. } => ApiError::InvalidInput(e.to_string()),
            e @ FulfillmentError::UnitNotDrawable { .. } => ApiError::InvalidInput(e.to_string()),
            FulfillmentError::PermissionDenied(msg) => ApiError::PermissionDenied(msg),
            FulfillmentError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            FulfillmentError::InvalidTransition { from, to } => ApiError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            FulfillmentError::InsufficientInventory {
                required_ml,
                available_ml,
            } => ApiError::InsufficientInventory {
                required_ml,
                available_ml,
            },
            FulfillmentError::ReservationConflict(msg) => ApiError::ReservationConflict(msg),
            FulfillmentError::RestoreFailure(msg) => ApiError::RestoreFailure(msg),
            FulfillmentError::TransactionTimeout(msg) => ApiError::TransactionTimeout(msg),
            FulfillmentError::Collaborator(msg) => ApiError::InternalError(msg),
            FulfillmentError::Repository(e) => e.into(),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure { .. } => {
                ApiError::ReservationConflict(err.to_string())
            }
            RepositoryError::TransactionTimeout(msg) => ApiError::TransactionTimeout(msg),
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::ValidationError(msg) => ApiError::InvalidInput(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::UniqueConstraintViolation(msg)
            | RepositoryError::ForeignKeyViolation(msg)
            | RepositoryError::CheckConstraintViolation(msg) => {
                ApiError::InvalidInput(format!("约束违反: {}", msg))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
