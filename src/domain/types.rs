// ==========================================
// 血液申请履约引擎 - 领域类型定义
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// 红线: 枚举值即库内存储值, 不允许自由文本
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// ABO 血型组 (ABO Group)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AboGroup {
    A,
    B,
    AB,
    O,
}

impl AboGroup {
    pub const ALL: [AboGroup; 4] = [AboGroup::O, AboGroup::A, AboGroup::B, AboGroup::AB];

    pub fn as_str(&self) -> &'static str {
        match self {
            AboGroup::A => "A",
            AboGroup::B => "B",
            AboGroup::AB => "AB",
            AboGroup::O => "O",
        }
    }
}

impl fmt::Display for AboGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AboGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(AboGroup::A),
            "B" => Ok(AboGroup::B),
            "AB" => Ok(AboGroup::AB),
            "O" => Ok(AboGroup::O),
            other => Err(format!("未知 ABO 血型组: {}", other)),
        }
    }
}

// ==========================================
// Rh 因子 (Rh Factor)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RhFactor {
    #[serde(rename = "-")]
    Negative,
    #[serde(rename = "+")]
    Positive,
}

impl RhFactor {
    pub const ALL: [RhFactor; 2] = [RhFactor::Negative, RhFactor::Positive];

    pub fn as_str(&self) -> &'static str {
        match self {
            RhFactor::Negative => "-",
            RhFactor::Positive => "+",
        }
    }
}

impl fmt::Display for RhFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RhFactor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "-" => Ok(RhFactor::Negative),
            "+" => Ok(RhFactor::Positive),
            other => Err(format!("未知 Rh 因子: {}", other)),
        }
    }
}

// ==========================================
// 血液成分 (Component Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentKind {
    WholeBlood, // 全血
    RedCells,   // 红细胞
    Plasma,     // 血浆
    Platelets,  // 血小板
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 4] = [
        ComponentKind::WholeBlood,
        ComponentKind::RedCells,
        ComponentKind::Plasma,
        ComponentKind::Platelets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::WholeBlood => "WHOLE_BLOOD",
            ComponentKind::RedCells => "RED_CELLS",
            ComponentKind::Plasma => "PLASMA",
            ComponentKind::Platelets => "PLATELETS",
        }
    }

    /// 中文名称 (用于通知文案)
    pub fn label(&self) -> &'static str {
        match self {
            ComponentKind::WholeBlood => "全血",
            ComponentKind::RedCells => "红细胞",
            ComponentKind::Plasma => "血浆",
            ComponentKind::Platelets => "血小板",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WHOLE_BLOOD" => Ok(ComponentKind::WholeBlood),
            "RED_CELLS" => Ok(ComponentKind::RedCells),
            "PLASMA" => Ok(ComponentKind::Plasma),
            "PLATELETS" => Ok(ComponentKind::Platelets),
            other => Err(format!("未知血液成分: {}", other)),
        }
    }
}

// ==========================================
// 血袋状态 (Unit Status)
// ==========================================
// 红线: USED ⇒ remaining = 0
// 可抽取状态: AVAILABLE / PARTIAL_USED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    Available,   // 可用(满量)
    Reserved,    // 预留(不可抽取)
    PartialUsed, // 部分使用
    Used,        // 已用尽
    Expired,     // 已过期
    Inactive,    // 已停用(隔离)
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Available => "AVAILABLE",
            UnitStatus::Reserved => "RESERVED",
            UnitStatus::PartialUsed => "PARTIAL_USED",
            UnitStatus::Used => "USED",
            UnitStatus::Expired => "EXPIRED",
            UnitStatus::Inactive => "INACTIVE",
        }
    }

    /// 是否允许 Draw
    pub fn is_drawable(&self) -> bool {
        matches!(self, UnitStatus::Available | UnitStatus::PartialUsed)
    }

    /// 是否已逻辑退役 (不再参与任何分配)
    pub fn is_retired(&self) -> bool {
        matches!(
            self,
            UnitStatus::Used | UnitStatus::Expired | UnitStatus::Inactive
        )
    }

    /// 由剩余量归一化状态
    ///
    /// 提交后的状态必须由剩余量推导:
    /// - remaining = 0 → USED
    /// - remaining < collected → PARTIAL_USED
    /// - remaining = collected → AVAILABLE
    pub fn normalized(remaining_ml: i64, collected_ml: i64) -> UnitStatus {
        if remaining_ml <= 0 {
            UnitStatus::Used
        } else if remaining_ml < collected_ml {
            UnitStatus::PartialUsed
        } else {
            UnitStatus::Available
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(UnitStatus::Available),
            "RESERVED" => Ok(UnitStatus::Reserved),
            "PARTIAL_USED" => Ok(UnitStatus::PartialUsed),
            "USED" => Ok(UnitStatus::Used),
            "EXPIRED" => Ok(UnitStatus::Expired),
            "INACTIVE" => Ok(UnitStatus::Inactive),
            other => Err(format!("未知血袋状态: {}", other)),
        }
    }
}

// ==========================================
// 申请状态 (Request Status)
// ==========================================
// 状态机: PENDING → APPROVED → COMPLETED
//         PENDING → REJECTED
//         PENDING | APPROVED → CANCELLED
// 红线: 终态不允许任何迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Completed,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Rejected | RequestStatus::Cancelled
        )
    }

    /// 状态迁移表
    pub fn can_transition_to(&self, to: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, to),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Approved, Completed)
                | (Approved, Cancelled)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(RequestStatus::Pending),
            "APPROVED" => Ok(RequestStatus::Approved),
            "COMPLETED" => Ok(RequestStatus::Completed),
            "REJECTED" => Ok(RequestStatus::Rejected),
            "CANCELLED" => Ok(RequestStatus::Cancelled),
            other => Err(format!("未知申请状态: {}", other)),
        }
    }
}

// ==========================================
// 操作人角色 (Actor Role)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    Member, // 普通成员(可提交申请)
    Staff,  // 工作人员
    Admin,  // 管理员
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Member => "MEMBER",
            ActorRole::Staff => "STAFF",
            ActorRole::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
