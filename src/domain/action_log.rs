// ==========================================
// 血液申请履约引擎 - 操作日志领域模型
// ==========================================
// 红线: 所有状态迁移与库存写入必须记录
// 用途: 审计追踪
// 对齐: action_log 表
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,
    pub request_id: Option<String>, // 关联申请 (过期巡检等系统操作为 None)
    pub action_type: String,
    pub action_ts: NaiveDateTime,
    pub actor: String,
    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>,
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Submit,         // 提交申请
    Approve,        // 审批通过
    ManualOverride, // 人工选袋审批
    Complete,       // 完成
    Cancel,         // 取消
    Reject,         // 驳回
    Mobilize,       // 献血者动员
    RegisterUnit,   // 登记血袋
    DeactivateUnit, // 停用血袋
    ExpirySweep,    // 过期巡检
    ConfigUpdate,   // 配置更新
}

impl ActionType {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Submit => "Submit",
            ActionType::Approve => "Approve",
            ActionType::ManualOverride => "ManualOverride",
            ActionType::Complete => "Complete",
            ActionType::Cancel => "Cancel",
            ActionType::Reject => "Reject",
            ActionType::Mobilize => "Mobilize",
            ActionType::RegisterUnit => "RegisterUnit",
            ActionType::DeactivateUnit => "DeactivateUnit",
            ActionType::ExpirySweep => "ExpirySweep",
            ActionType::ConfigUpdate => "ConfigUpdate",
        }
    }

    /// 从字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Submit" => Some(ActionType::Submit),
            "Approve" => Some(ActionType::Approve),
            "ManualOverride" => Some(ActionType::ManualOverride),
            "Complete" => Some(ActionType::Complete),
            "Cancel" => Some(ActionType::Cancel),
            "Reject" => Some(ActionType::Reject),
            "Mobilize" => Some(ActionType::Mobilize),
            "RegisterUnit" => Some(ActionType::RegisterUnit),
            "DeactivateUnit" => Some(ActionType::DeactivateUnit),
            "ExpirySweep" => Some(ActionType::ExpirySweep),
            "ConfigUpdate" => Some(ActionType::ConfigUpdate),
            _ => None,
        }
    }
}

impl ActionLog {
    /// 创建新的操作日志
    ///
    /// # 参数
    /// - `request_id`: 关联申请ID (可选)
    /// - `action_type`: 操作类型
    /// - `actor`: 操作人
    /// - `action_ts`: 操作时间
    pub fn new(
        request_id: Option<String>,
        action_type: ActionType,
        actor: impl Into<String>,
        action_ts: NaiveDateTime,
    ) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            request_id,
            action_type: action_type.as_str().to_string(),
            action_ts,
            actor: actor.into(),
            payload_json: None,
            detail: None,
        }
    }

    /// 设置操作负载 (转换为JSON)
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload_json = serde_json::to_value(payload).ok();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn kind(&self) -> Option<ActionType> {
        ActionType::parse(&self.action_type)
    }
}
