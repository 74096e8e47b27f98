// ==========================================
// 血液申请履约引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约定: `*_tx` 关联函数接收外部连接/事务句柄, 供引擎在同一事务内组合调用;
//       实例方法自行加锁, 仅用于事务外的独立读写
// ==========================================

pub mod action_log_repo;
pub mod blood_unit_repo;
pub mod error;
pub mod reference_repo;
pub mod request_repo;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use blood_unit_repo::BloodUnitRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use reference_repo::ReferenceRepository;
pub use request_repo::RequestRepository;

use std::str::FromStr;

/// 解析枚举列 (失败时转为 rusqlite 转换错误)
pub(crate) fn parse_enum_column<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|msg| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(msg),
        )
    })
}

/// 生成 IN 子句占位符 ("?, ?, ?")
pub(crate) fn in_placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
