// ==========================================
// 血液申请履约引擎 - 献血者动员协调器
// ==========================================
// 职责: 库存无法覆盖时, 计算可动员献血者并发出通知意图
// 规则: 血型在相容集合内 / 档案有效 / 不在献血间隔期内
// 说明: 同一申请重复动员不视为错误, 可能重复通知
// ==========================================

use crate::config::limits;
use crate::db::now_ts;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::actor::{Actor, DonorRecord};
use crate::domain::blood::BloodType;
use crate::domain::request::FulfillmentRequest;
use crate::domain::types::ComponentKind;
use crate::engine::error::{FulfillmentError, FulfillmentResult};
use crate::engine::events::{NotificationDispatcher, NotificationIntent};
use crate::engine::identity::IdentityProvider;
use crate::repository::ActionLogRepository;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

// ==========================================
// MobilizationOutcome - 动员结果 (用于审计与返回)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MobilizationOutcome {
    pub request_id: String,
    /// 相容供血血型
    pub donor_type_ids: Vec<String>,
    /// 符合动员条件的献血者
    pub eligible_donor_ids: Vec<String>,
    /// 已通知献血者 (派发器受理后才计入)
    pub notified: Vec<String>,
    /// 派发器是否受理
    pub dispatched: bool,
    pub shortfall_ml: i64,
}

// ==========================================
// MobilizationCoordinator - 动员协调器
// ==========================================
pub struct MobilizationCoordinator {
    identity: Arc<dyn IdentityProvider>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    action_log_repo: Arc<ActionLogRepository>,
}

impl MobilizationCoordinator {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        action_log_repo: Arc<ActionLogRepository>,
    ) -> Self {
        Self {
            identity,
            dispatcher,
            action_log_repo,
        }
    }

    /// 发起动员
    ///
    /// # 参数
    /// - `request`: 未被覆盖的申请
    /// - `donor_types`: 相容供血血型集合
    /// - `kind`: 申请成分
    /// - `shortfall_ml`: 库存缺口
    /// - `cooldown_days`: 献血间隔 (天)
    ///
    /// # 返回
    /// 动员结果; 派发失败只记录告警, `dispatched = false` 且 `notified` 为空
    #[instrument(skip(self, request, donor_types, actor), fields(request_id = %request.request_id))]
    pub async fn mobilize(
        &self,
        request: &FulfillmentRequest,
        donor_types: &BTreeSet<BloodType>,
        kind: ComponentKind,
        shortfall_ml: i64,
        cooldown_days: i64,
        actor: &Actor,
    ) -> FulfillmentResult<MobilizationOutcome> {
        let now = now_ts();
        let donor_type_ids: Vec<String> = donor_types.iter().map(BloodType::id).collect();

        let donors = self
            .identity
            .donors_with_blood_types(&donor_type_ids)
            .map_err(|e| FulfillmentError::Collaborator(format!("查询献血者失败: {}", e)))?;
        let eligible_donor_ids: Vec<String> = Self::eligible_donors(donors, cooldown_days, now)
            .into_iter()
            .map(|d| d.donor_id)
            .collect();

        let dispatched = if eligible_donor_ids.is_empty() {
            warn!(donor_types = ?donor_type_ids, "无可动员献血者, 跳过派发");
            false
        } else {
            let intent = NotificationIntent {
                request_id: request.request_id.clone(),
                candidate_ids: eligible_donor_ids.clone(),
                message: Self::compose_message(request, kind, shortfall_ml),
                is_emergency: request.is_emergency,
            };
            match self.dispatcher.dispatch(intent).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(error = %e, "动员通知派发失败, 申请保持 PENDING");
                    false
                }
            }
        };

        let notified = if dispatched {
            eligible_donor_ids.clone()
        } else {
            Vec::new()
        };
        let outcome = MobilizationOutcome {
            request_id: request.request_id.clone(),
            donor_type_ids,
            eligible_donor_ids,
            notified,
            dispatched,
            shortfall_ml,
        };

        let log = ActionLog::new(
            Some(request.request_id.clone()),
            ActionType::Mobilize,
            actor.actor_id.clone(),
            now,
        )
        .with_payload(&json!({
            "donor_type_ids": outcome.donor_type_ids,
            "eligible_donor_ids": outcome.eligible_donor_ids,
            "notified": outcome.notified,
            "dispatched": outcome.dispatched,
            "shortfall_ml": outcome.shortfall_ml,
        }))
        .with_detail(format!(
            "库存缺口 {}ml, 符合条件 {} 名, 已通知 {} 名",
            shortfall_ml,
            outcome.eligible_donor_ids.len(),
            outcome.notified.len()
        ));
        self.action_log_repo.insert(&log)?;

        info!(
            notified = outcome.notified.len(),
            dispatched = outcome.dispatched,
            shortfall_ml,
            "献血者动员完成"
        );
        Ok(outcome)
    }

    /// 过滤可动员献血者: 档案有效, 且距上次献血不少于间隔天数
    pub fn eligible_donors(
        donors: Vec<DonorRecord>,
        cooldown_days: i64,
        now: NaiveDateTime,
    ) -> Vec<DonorRecord> {
        let cooldown = Duration::days(cooldown_days.clamp(0, limits::MAX_DONATION_COOLDOWN_DAYS));
        let mut eligible: Vec<DonorRecord> = donors
            .into_iter()
            .filter(|d| d.is_active)
            .filter(|d| match d.last_donation_date {
                Some(last) => now - last >= cooldown,
                None => true,
            })
            .collect();
        eligible.sort_by(|a, b| a.donor_id.cmp(&b.donor_id));
        eligible.dedup_by(|a, b| a.donor_id == b.donor_id);
        eligible
    }

    fn compose_message(request: &FulfillmentRequest, kind: ComponentKind, shortfall_ml: i64) -> String {
        let prefix = if request.is_emergency { "【紧急】" } else { "" };
        format!(
            "{}受血者需要 {} 型{} {}ml, 库存缺口 {}ml, 诚邀符合条件的献血者前来献血",
            prefix,
            request.blood_type_id,
            kind.label(),
            request.required_volume_ml,
            shortfall_ml
        )
    }
}
