// ==========================================
// 血液申请履约引擎 - 血型与成分参考值
// ==========================================
// 红线: 参考值一次播种, 永不修改
// ==========================================

use crate::domain::types::{AboGroup, ComponentKind, RhFactor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// BloodType - 血型
// ==========================================
// 对齐: blood_type 表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BloodType {
    pub abo_group: AboGroup,
    pub rh_factor: RhFactor,
}

impl BloodType {
    pub const fn new(abo_group: AboGroup, rh_factor: RhFactor) -> Self {
        Self { abo_group, rh_factor }
    }

    /// 8 种血型的全集
    pub fn all() -> Vec<BloodType> {
        AboGroup::ALL
            .iter()
            .flat_map(|abo| RhFactor::ALL.iter().map(move |rh| BloodType::new(*abo, *rh)))
            .collect()
    }

    /// 血型ID (即标准写法, 如 "AB+")
    pub fn id(&self) -> String {
        format!("{}{}", self.abo_group.as_str(), self.rh_factor.as_str())
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.abo_group, self.rh_factor)
    }
}

impl FromStr for BloodType {
    type Err = String;

    /// 解析 "O-" / "AB+" 形式
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < 2 {
            return Err(format!("无效血型: {}", s));
        }
        let (abo, rh) = s.split_at(s.len() - 1);
        Ok(BloodType::new(abo.parse()?, rh.parse()?))
    }
}

// ==========================================
// BloodComponent - 血液成分
// ==========================================
// 对齐: blood_component 表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloodComponent {
    pub component_id: String,
    pub kind: ComponentKind,
}
