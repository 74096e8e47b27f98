// ==========================================
// 血液申请履约引擎 - 分配规划器
// ==========================================
// 职责: 候选血袋 + 需求量 → 分配方案 (哪些血袋, 各取多少)
// 红线: 规划是纯计算, 不发出任何 Draw; 提交由生命周期在事务内完成
// 红线: 覆盖不足时丢弃部分方案, 不留下部分状态
// ==========================================

use crate::domain::request::ReservationLine;
use crate::domain::unit::BloodUnit;
use crate::engine::error::{FulfillmentError, FulfillmentResult};
use serde::{Deserialize, Serialize};

// ==========================================
// AllocationPlan - 分配方案
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    /// 方案明细 (covered = false 时为空)
    pub lines: Vec<ReservationLine>,
    pub covered: bool,
    pub required_ml: i64,
    /// 候选血袋剩余量合计
    pub available_ml: i64,
}

impl AllocationPlan {
    pub fn total_ml(&self) -> i64 {
        self.lines.iter().map(|l| l.volume_used_ml).sum()
    }

    /// 缺口 (已覆盖时为 0)
    pub fn shortfall_ml(&self) -> i64 {
        if self.covered {
            0
        } else {
            (self.required_ml - self.available_ml).max(0)
        }
    }
}

// ==========================================
// AllocationPlanner - 分配规划器
// ==========================================
pub struct AllocationPlanner;

impl AllocationPlanner {
    /// 按候选顺序贪心取量
    ///
    /// # 参数
    /// - `candidates`: 已按分配策略排序的候选血袋
    /// - `required_ml`: 需求量 (必须 > 0)
    ///
    /// # 返回
    /// - covered = true: 明细合计恰为需求量
    /// - covered = false: 明细为空
    pub fn plan(candidates: &[BloodUnit], required_ml: i64) -> FulfillmentResult<AllocationPlan> {
        if required_ml <= 0 {
            return Err(FulfillmentError::Validation(format!(
                "需求量必须大于 0, 实际 {}ml",
                required_ml
            )));
        }

        let available_ml: i64 = candidates.iter().map(|u| u.remaining_volume_ml.max(0)).sum();
        let mut still_needed = required_ml;
        let mut lines = Vec::new();

        for unit in candidates {
            if still_needed == 0 {
                break;
            }
            if unit.remaining_volume_ml <= 0 {
                continue;
            }
            let take = unit.remaining_volume_ml.min(still_needed);
            lines.push(ReservationLine {
                unit_id: unit.unit_id.clone(),
                volume_used_ml: take,
            });
            still_needed -= take;
        }

        let covered = still_needed == 0;
        if !covered {
            lines.clear();
        }

        Ok(AllocationPlan {
            lines,
            covered,
            required_ml,
            available_ml,
        })
    }
}
