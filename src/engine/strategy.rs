// ==========================================
// 血液申请履约引擎 - 分配策略定义
// ==========================================
// 用途:
// - 规划器按策略对候选血袋排序, 再按顺序贪心取量
// - 默认 FEFO (先过期先出); 策略由配置项 allocation_strategy 选择
// ==========================================

use crate::domain::types::UnitStatus;
use crate::domain::unit::BloodUnit;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// 候选血袋分配策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// 先过期先出, 同效期按 unit_id
    Fefo,
    /// 已开封(部分使用)优先, 其后 FEFO
    PartialFirst,
    /// 剩余量大者优先, 减少拆袋数量; 同量按 FEFO
    LargestFirst,
}

impl AllocationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStrategy::Fefo => "fefo",
            AllocationStrategy::PartialFirst => "partial_first",
            AllocationStrategy::LargestFirst => "largest_first",
        }
    }

    /// 两个候选血袋的先后关系
    pub fn compare(&self, a: &BloodUnit, b: &BloodUnit) -> Ordering {
        let fefo = a
            .expiry_date
            .cmp(&b.expiry_date)
            .then_with(|| a.unit_id.cmp(&b.unit_id));

        match self {
            AllocationStrategy::Fefo => fefo,
            AllocationStrategy::PartialFirst => {
                let rank = |u: &BloodUnit| (u.status != UnitStatus::PartialUsed) as u8;
                rank(a).cmp(&rank(b)).then(fefo)
            }
            AllocationStrategy::LargestFirst => b
                .remaining_volume_ml
                .cmp(&a.remaining_volume_ml)
                .then(fefo),
        }
    }

    /// 按策略排序候选 (稳定排序)
    pub fn order(&self, candidates: &mut [BloodUnit]) {
        candidates.sort_by(|a, b| self.compare(a, b));
    }
}

impl Default for AllocationStrategy {
    fn default() -> Self {
        AllocationStrategy::Fefo
    }
}

impl std::fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AllocationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fefo" => Ok(AllocationStrategy::Fefo),
            "partial_first" | "partial-first" => Ok(AllocationStrategy::PartialFirst),
            "largest_first" | "largest-first" => Ok(AllocationStrategy::LargestFirst),
            other => Err(format!("未知分配策略: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn unit(id: &str, remaining: i64, collected: i64, expiry_days: i64) -> BloodUnit {
        let now = crate::db::now_ts();
        BloodUnit {
            unit_id: id.to_string(),
            blood_type_id: "O-".to_string(),
            component_id: "RED_CELLS".to_string(),
            collected_volume_ml: collected,
            remaining_volume_ml: remaining,
            expiry_date: now + Duration::days(expiry_days),
            donor_id: "D".to_string(),
            status: UnitStatus::normalized(remaining, collected),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn ids(units: &[BloodUnit]) -> Vec<&str> {
        units.iter().map(|u| u.unit_id.as_str()).collect()
    }

    #[test]
    fn test_fefo_orders_by_expiry_then_id() {
        let mut units = vec![unit("U3", 200, 200, 5), unit("U2", 100, 100, 1), unit("U1", 300, 300, 1)];
        AllocationStrategy::Fefo.order(&mut units);
        assert_eq!(ids(&units), vec!["U1", "U2", "U3"]);
    }

    #[test]
    fn test_alternative_strategies() {
        let base = vec![unit("U1", 300, 300, 1), unit("U2", 50, 250, 3), unit("U3", 450, 450, 5)];

        let mut partial = base.clone();
        AllocationStrategy::PartialFirst.order(&mut partial);
        assert_eq!(ids(&partial), vec!["U2", "U1", "U3"]);

        let mut largest = base;
        AllocationStrategy::LargestFirst.order(&mut largest);
        assert_eq!(ids(&largest), vec!["U3", "U1", "U2"]);
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("FEFO".parse::<AllocationStrategy>().unwrap(), AllocationStrategy::Fefo);
        assert_eq!(
            "largest-first".parse::<AllocationStrategy>().unwrap(),
            AllocationStrategy::LargestFirst
        );
        assert!("random".parse::<AllocationStrategy>().is_err());
        assert_eq!(AllocationStrategy::default(), AllocationStrategy::Fefo);
    }
}
