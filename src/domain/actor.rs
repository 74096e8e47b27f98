// ==========================================
// 血液申请履约引擎 - 操作人与献血者
// ==========================================
// 红线: 操作人作为显式参数传入每个生命周期调用, 不读取全局状态
// ==========================================

use crate::domain::types::ActorRole;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Actor - 已认证操作人
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(actor_id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
        }
    }

    pub fn member(actor_id: impl Into<String>) -> Self {
        Self::new(actor_id, ActorRole::Member)
    }

    pub fn staff(actor_id: impl Into<String>) -> Self {
        Self::new(actor_id, ActorRole::Staff)
    }

    pub fn admin(actor_id: impl Into<String>) -> Self {
        Self::new(actor_id, ActorRole::Admin)
    }

    /// 是否可执行审批/完成/取消/驳回
    pub fn can_manage_requests(&self) -> bool {
        matches!(self.role, ActorRole::Staff | ActorRole::Admin)
    }
}

// ==========================================
// DonorRecord - 献血者档案 (由身份服务提供)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorRecord {
    pub donor_id: String,
    pub blood_type_id: String,
    pub last_donation_date: Option<NaiveDateTime>,
    pub is_active: bool,
}
