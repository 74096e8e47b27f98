// ==========================================
// 血液申请履约引擎 - 相容性矩阵
// ==========================================
// 职责: (受血者血型, 成分) → 可供血血型集合
// 红线: 纯函数, 无状态, 无副作用
// 编码方向: 表中记录 献血者 → 受血者, 查询时反转
// ==========================================

use crate::config::FulfillmentPolicy;
use crate::domain::blood::BloodType;
use crate::domain::types::{AboGroup, ComponentKind, RhFactor};
use std::collections::BTreeSet;

use AboGroup::{A, AB, B, O};

/// 红细胞 ABO 规则 (献血者 → 可受血 ABO); O 为万能供者
const CELLULAR_ABO: [(AboGroup, &[AboGroup]); 4] = [
    (O, &[O, A, B, AB]),
    (A, &[A, AB]),
    (B, &[B, AB]),
    (AB, &[AB]),
];

/// 血浆 ABO 规则 (与红细胞相反); AB 为万能供者, Rh 不参与
const PLASMA_ABO: [(AboGroup, &[AboGroup]); 4] = [
    (AB, &[A, B, AB, O]),
    (A, &[A, O]),
    (B, &[B, O]),
    (O, &[O]),
];

/// Rh 规则 (献血者 → 可受血 Rh)
const RH_RULE: [(RhFactor, &[RhFactor]); 2] = [
    (RhFactor::Negative, &[RhFactor::Negative, RhFactor::Positive]),
    (RhFactor::Positive, &[RhFactor::Positive]),
];

fn table_allows<K: PartialEq + Copy>(table: &[(K, &[K])], donor: K, recipient: K) -> bool {
    table
        .iter()
        .find(|(d, _)| *d == donor)
        .map(|(_, recipients)| recipients.contains(&recipient))
        .unwrap_or(false)
}

// ==========================================
// CompatibilityMatrix - 相容性矩阵
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatibilityMatrix {
    platelets_allow_rh_mismatch: bool,
}

impl CompatibilityMatrix {
    /// # 参数
    /// - `platelets_allow_rh_mismatch`: 血小板是否允许 Rh 不合 (运营策略, 非生物学约束)
    pub fn new(platelets_allow_rh_mismatch: bool) -> Self {
        Self {
            platelets_allow_rh_mismatch,
        }
    }

    pub fn from_policy(policy: &FulfillmentPolicy) -> Self {
        Self::new(policy.platelets_allow_rh_mismatch)
    }

    /// 献血者血型能否为受血者供应该成分
    pub fn donor_can_supply(&self, donor: BloodType, recipient: BloodType, kind: ComponentKind) -> bool {
        match kind {
            ComponentKind::WholeBlood | ComponentKind::RedCells => {
                table_allows(&CELLULAR_ABO, donor.abo_group, recipient.abo_group)
                    && table_allows(&RH_RULE, donor.rh_factor, recipient.rh_factor)
            }
            ComponentKind::Plasma => table_allows(&PLASMA_ABO, donor.abo_group, recipient.abo_group),
            ComponentKind::Platelets => {
                table_allows(&CELLULAR_ABO, donor.abo_group, recipient.abo_group)
                    && (self.platelets_allow_rh_mismatch
                        || table_allows(&RH_RULE, donor.rh_factor, recipient.rh_factor))
            }
        }
    }

    /// 受血者可接受的献血者血型集合
    pub fn compatible_donor_types(&self, recipient: BloodType, kind: ComponentKind) -> BTreeSet<BloodType> {
        BloodType::all()
            .into_iter()
            .filter(|donor| self.donor_can_supply(*donor, recipient, kind))
            .collect()
    }
}

impl Default for CompatibilityMatrix {
    fn default() -> Self {
        Self::from_policy(&FulfillmentPolicy::default())
    }
}
