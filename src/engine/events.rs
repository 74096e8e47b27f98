// ==========================================
// 血液申请履约引擎 - 通知派发接口
// ==========================================
// 职责: 定义献血者动员通知的派发 trait, 实现依赖倒置
// 说明: 引擎只决定接收人与通知意图, 投递由外部派发器完成
// ==========================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;

// ==========================================
// 通知意图
// ==========================================

/// 献血者动员通知意图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationIntent {
    /// 关联申请 ID
    pub request_id: String,
    /// 接收人 (献血者 ID)
    pub candidate_ids: Vec<String>,
    /// 通知内容
    pub message: String,
    /// 紧急申请需加急投递
    pub is_emergency: bool,
}

// ==========================================
// 通知派发 Trait
// ==========================================

/// 通知派发者 Trait
///
/// # 实现说明
/// - 投递可异步完成; 返回 Ok 仅表示已受理
/// - 重复派发同一申请的通知不视为错误, 去重由实现方负责
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// 派发通知
    ///
    /// # 返回
    /// - `Ok(receipt)`: 受理回执 (如果支持) 或空字符串
    /// - `Err`: 派发失败
    async fn dispatch(&self, intent: NotificationIntent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作派发者
///
/// 用于不需要实际投递的场景 (如维护工具、单元测试)
#[derive(Debug, Clone, Default)]
pub struct NoOpDispatcher;

#[async_trait]
impl NotificationDispatcher for NoOpDispatcher {
    async fn dispatch(&self, intent: NotificationIntent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpDispatcher: 跳过通知派发 - request_id={}, candidates={}",
            intent.request_id,
            intent.candidate_ids.len()
        );
        Ok(String::new())
    }
}
