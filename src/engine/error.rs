// ==========================================
// 血液申请履约引擎 - 引擎层错误类型
// ==========================================
// 分类:
// - Validation: 输入非法, 立即返回, 不重试
// - InsufficientInventory: 非致命, 触发动员, 申请保持 PENDING
// - ReservationConflict: 并发修改, 可整体重试 (不会留下部分提交)
// - InvalidTransition: 源状态不满足, 不重试
// - RestoreFailure: 取消时恢复库存失败, 申请保持原状态
// ==========================================

use crate::domain::types::RequestStatus;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FulfillmentError {
    #[error("输入校验失败: {0}")]
    Validation(String),

    #[error("库存不足: 需求 {required_ml}ml, 可用 {available_ml}ml")]
    InsufficientInventory { required_ml: i64, available_ml: i64 },

    #[error("预留冲突: {0}")]
    ReservationConflict(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("库存恢复失败: {0}")]
    RestoreFailure(String),

    #[error("超量抽取: unit={unit_id}, 请求 {requested_ml}ml, 剩余 {remaining_ml}ml")]
    OverDraw {
        unit_id: String,
        requested_ml: i64,
        remaining_ml: i64,
    },

    #[error("血袋不可抽取: unit={unit_id}, {reason}")]
    UnitNotDrawable { unit_id: String, reason: String },

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    #[error("权限不足: {0}")]
    PermissionDenied(String),

    #[error("事务超时: {0}")]
    TransactionTimeout(String),

    #[error("外部协作方失败: {0}")]
    Collaborator(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl FulfillmentError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        FulfillmentError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// 调用方可整体重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FulfillmentError::ReservationConflict(_) | FulfillmentError::TransactionTimeout(_)
        )
    }
}

// 乐观锁冲突即并发修改; 超时与未找到保留语义, 其余按仓储错误透传
impl From<RepositoryError> for FulfillmentError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure { .. } => {
                FulfillmentError::ReservationConflict(err.to_string())
            }
            RepositoryError::TransactionTimeout(msg) => FulfillmentError::TransactionTimeout(msg),
            RepositoryError::NotFound { entity, id } => FulfillmentError::NotFound { entity, id },
            other => FulfillmentError::Repository(other),
        }
    }
}

pub type FulfillmentResult<T> = Result<T, FulfillmentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimistic_lock_maps_to_conflict() {
        let err: FulfillmentError = RepositoryError::OptimisticLockFailure {
            entity: "BloodUnit".to_string(),
            id: "U1".to_string(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, FulfillmentError::ReservationConflict(_)));
        assert!(err.is_retryable());

        let err: FulfillmentError = RepositoryError::TransactionTimeout("t".to_string()).into();
        assert!(matches!(err, FulfillmentError::TransactionTimeout(_)));

        let err: FulfillmentError = RepositoryError::DatabaseQueryError("x".to_string()).into();
        assert!(matches!(err, FulfillmentError::Repository(_)));
        assert!(!err.is_retryable());
    }
}
