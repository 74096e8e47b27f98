// ==========================================
// 血液申请履约引擎 - 申请生命周期 (状态机)
// ==========================================
// 状态: PENDING → APPROVED → COMPLETED
//       PENDING → REJECTED
//       PENDING | APPROVED → CANCELLED
// 红线: 终态不允许任何迁移
// 红线: 审批的全部 Draw 在同一事务内提交, 任一失败整体回滚
// 红线: 取消的全部 Restore 在同一事务内提交, 任一失败申请保持 APPROVED
// 红线: 库存不足不授予审批, 申请保持 PENDING 并发起动员
// ==========================================

use crate::config::{ConfigManager, FulfillmentPolicy};
use crate::db::{now_ts, run_in_transaction};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::actor::Actor;
use crate::domain::blood::BloodType;
use crate::domain::request::{
    FulfillmentRequest, ManualSelection, NewFulfillmentRequest, ReservationLine,
};
use crate::domain::types::{ComponentKind, RequestStatus};
use crate::domain::unit::BloodUnit;
use crate::engine::allocation::{AllocationPlan, AllocationPlanner};
use crate::engine::compatibility::CompatibilityMatrix;
use crate::engine::error::{FulfillmentError, FulfillmentResult};
use crate::engine::events::NotificationDispatcher;
use crate::engine::identity::IdentityProvider;
use crate::engine::ledger::{require_staff, InventoryLedger};
use crate::engine::mobilization::{MobilizationCoordinator, MobilizationOutcome};
use crate::engine::repositories::FulfillmentRepositories;
use crate::repository::{ActionLogRepository, ReferenceRepository, RequestRepository};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

// ==========================================
// PlanningSession - 审批规划会话
// ==========================================
// 短生命周期: 申请快照 + 候选血袋 + 暂定方案; 提交或放弃即丢弃, 不落库
#[derive(Debug, Clone)]
pub struct PlanningSession {
    /// 规划时的申请快照 (revision 用于提交时检测并发迁移)
    pub request: FulfillmentRequest,
    pub recipient_type: BloodType,
    pub kind: ComponentKind,
    pub donor_types: BTreeSet<BloodType>,
    /// 按分配策略排序的候选血袋
    pub candidates: Vec<BloodUnit>,
    pub plan: AllocationPlan,
    /// 是否为人工选袋
    pub manual: bool,
    pub policy: FulfillmentPolicy,
}

impl PlanningSession {
    /// 候选血袋在规划时的 revision
    pub fn candidate_revision(&self, unit_id: &str) -> Option<i64> {
        self.candidates
            .iter()
            .find(|u| u.unit_id == unit_id)
            .map(|u| u.revision)
    }
}

// ==========================================
// ApprovalOutcome - 审批结果
// ==========================================
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalOutcome {
    /// 已审批, 库存已抽取并预留
    Approved { request: FulfillmentRequest },
    /// 库存不足, 申请保持 PENDING, 已发起动员
    Pending {
        request: FulfillmentRequest,
        mobilization: MobilizationOutcome,
    },
}

impl ApprovalOutcome {
    pub fn request(&self) -> &FulfillmentRequest {
        match self {
            ApprovalOutcome::Approved { request } => request,
            ApprovalOutcome::Pending { request, .. } => request,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalOutcome::Approved { .. })
    }
}

// ==========================================
// RequestLifecycle - 申请生命周期
// ==========================================
pub struct RequestLifecycle {
    repos: FulfillmentRepositories,
    config: Arc<ConfigManager>,
    identity: Arc<dyn IdentityProvider>,
    mobilizer: MobilizationCoordinator,
}

impl RequestLifecycle {
    pub fn new(
        repos: FulfillmentRepositories,
        config: Arc<ConfigManager>,
        identity: Arc<dyn IdentityProvider>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let mobilizer =
            MobilizationCoordinator::new(identity.clone(), dispatcher, repos.action_log_repo.clone());
        Self {
            repos,
            config,
            identity,
            mobilizer,
        }
    }

    // ==========================================
    // 提交
    // ==========================================

    /// 提交申请 (→ PENDING)
    ///
    /// # 校验
    /// - 需求量 > 0
    /// - 受血者存在
    /// - 血型/成分引用存在
    #[instrument(skip(self, input, actor), fields(actor_id = %actor.actor_id))]
    pub fn submit(
        &self,
        input: NewFulfillmentRequest,
        actor: &Actor,
    ) -> FulfillmentResult<FulfillmentRequest> {
        if input.required_volume_ml <= 0 {
            return Err(FulfillmentError::Validation(format!(
                "需求量必须大于 0, 实际 {}ml",
                input.required_volume_ml
            )));
        }
        let recipient_id = input.recipient_id.trim();
        if recipient_id.is_empty() {
            return Err(FulfillmentError::Validation("受血者ID不能为空".to_string()));
        }
        let exists = self
            .identity
            .recipient_exists(recipient_id)
            .map_err(|e| FulfillmentError::Collaborator(format!("校验受血者失败: {}", e)))?;
        if !exists {
            return Err(FulfillmentError::Validation(format!(
                "未知受血者: {}",
                recipient_id
            )));
        }

        let timeout = self.config.load_policy()?.approve_timeout();
        let now = now_ts();
        let request = FulfillmentRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            recipient_id: recipient_id.to_string(),
            blood_type_id: input.blood_type_id.trim().to_string(),
            component_id: input.component_id.trim().to_string(),
            required_volume_ml: input.required_volume_ml,
            is_emergency: input.is_emergency,
            status: RequestStatus::Pending,
            request_date: now,
            approval_date: None,
            completion_date: None,
            cancelled_date: None,
            rejected_date: None,
            responsible_actor_id: None,
            notes: input.notes.trim().to_string(),
            reserved_units: Vec::new(),
            revision: 0,
        };

        run_in_transaction(&self.repos.conn, timeout, |tx| {
            if ReferenceRepository::find_blood_type_tx(tx, &request.blood_type_id)?.is_none() {
                return Err(FulfillmentError::Validation(format!(
                    "未知血型: {}",
                    request.blood_type_id
                )));
            }
            if ReferenceRepository::find_component_tx(tx, &request.component_id)?.is_none() {
                return Err(FulfillmentError::Validation(format!(
                    "未知血液成分: {}",
                    request.component_id
                )));
            }

            RequestRepository::insert_tx(tx, &request)?;
            let log = ActionLog::new(
                Some(request.request_id.clone()),
                ActionType::Submit,
                actor.actor_id.clone(),
                now,
            )
            .with_payload(&json!({
                "recipient_id": request.recipient_id,
                "blood_type_id": request.blood_type_id,
                "component_id": request.component_id,
                "required_volume_ml": request.required_volume_ml,
                "is_emergency": request.is_emergency,
            }));
            ActionLogRepository::insert_tx(tx, &log)?;
            Ok(())
        })?;

        info!(
            request_id = %request.request_id,
            blood_type = %request.blood_type_id,
            component = %request.component_id,
            required_ml = request.required_volume_ml,
            emergency = request.is_emergency,
            "申请已提交"
        );
        Ok(request)
    }

    // ==========================================
    // 审批
    // ==========================================

    /// 审批申请
    ///
    /// # 流程
    /// 1. 规划: 相容血型 → 候选血袋 → 分配方案 (纯计算)
    /// 2. 覆盖: 同一事务内逐行 Draw, 写入预留明细, → APPROVED
    /// 3. 不足: 申请保持 PENDING, 发起献血者动员
    ///
    /// # 参数
    /// - `manual`: 人工选袋 (总量可低于需求量, 备注中标记)
    #[instrument(skip(self, actor, manual), fields(actor_id = %actor.actor_id))]
    pub async fn approve(
        &self,
        request_id: &str,
        actor: &Actor,
        manual: Option<Vec<ManualSelection>>,
    ) -> FulfillmentResult<ApprovalOutcome> {
        let session = self.begin_approval(request_id, actor, manual.as_deref())?;

        if session.plan.covered {
            let request = self.commit_approval(session, actor)?;
            return Ok(ApprovalOutcome::Approved { request });
        }

        self.ensure_still_pending(&session.request)?;

        let shortfall_ml = session.plan.shortfall_ml();
        info!(
            request_id,
            required_ml = session.plan.required_ml,
            available_ml = session.plan.available_ml,
            shortfall_ml,
            "库存不足, 申请保持 PENDING 并发起动员"
        );

        let mobilization = self
            .mobilizer
            .mobilize(
                &session.request,
                &session.donor_types,
                session.kind,
                shortfall_ml,
                session.policy.donation_cooldown_days,
                actor,
            )
            .await?;

        Ok(ApprovalOutcome::Pending {
            request: session.request,
            mobilization,
        })
    }

    /// 开启审批规划会话 (不修改任何状态)
    ///
    /// 申请状态与候选血袋在同一事务内读取, 规划基于一致快照。
    /// 申请已被其他审批授予时返回 `ReservationConflict`; 终态返回 `InvalidTransition`
    pub fn begin_approval(
        &self,
        request_id: &str,
        actor: &Actor,
        manual: Option<&[ManualSelection]>,
    ) -> FulfillmentResult<PlanningSession> {
        require_staff(actor, "审批申请")?;

        let policy = self.config.load_policy()?;
        let matrix = CompatibilityMatrix::from_policy(&policy);
        let as_of = now_ts();

        let (request, recipient_type, kind, donor_types, mut candidates) =
            run_in_transaction(&self.repos.conn, policy.approve_timeout(), |tx| {
                let request = RequestRepository::find_by_id_tx(tx, request_id)?
                    .ok_or_else(|| FulfillmentError::not_found("FulfillmentRequest", request_id))?;
                ensure_approvable(&request)?;

                let recipient_type: BloodType = request
                    .blood_type_id
                    .parse()
                    .map_err(FulfillmentError::Validation)?;
                let component = ReferenceRepository::find_component_tx(tx, &request.component_id)?
                    .ok_or_else(|| {
                        FulfillmentError::Validation(format!(
                            "未知血液成分: {}",
                            request.component_id
                        ))
                    })?;

                let donor_types = matrix.compatible_donor_types(recipient_type, component.kind);
                let donor_type_ids: Vec<String> = donor_types.iter().map(BloodType::id).collect();
                let candidates = InventoryLedger::find_candidates_tx(
                    tx,
                    &donor_type_ids,
                    &request.component_id,
                    as_of,
                )?;
                Ok::<_, FulfillmentError>((
                    request,
                    recipient_type,
                    component.kind,
                    donor_types,
                    candidates,
                ))
            })?;
        policy.allocation_strategy.order(&mut candidates);

        let (plan, is_manual) = match manual {
            Some(selections) => (Self::plan_manual(&request, &candidates, selections)?, true),
            None => (
                AllocationPlanner::plan(&candidates, request.required_volume_ml)?,
                false,
            ),
        };

        Ok(PlanningSession {
            request,
            recipient_type,
            kind,
            donor_types,
            candidates,
            plan,
            manual: is_manual,
            policy,
        })
    }

    /// 动员前确认申请仍停留在规划时的 PENDING 版本
    fn ensure_still_pending(&self, snapshot: &FulfillmentRequest) -> FulfillmentResult<()> {
        let current = self.get_request(&snapshot.request_id)?;
        if current.status != RequestStatus::Pending || current.revision != snapshot.revision {
            return Err(FulfillmentError::ReservationConflict(format!(
                "申请 {} 已被并发修改 (status={}, revision {} → {})",
                snapshot.request_id, current.status, snapshot.revision, current.revision
            )));
        }
        Ok(())
    }

    /// 提交审批规划会话
    ///
    /// # 错误
    /// - `InsufficientInventory`: 方案未覆盖
    /// - `ReservationConflict`: 申请或血袋在规划后被并发修改
    /// - `TransactionTimeout`: 超过事务时限 (已回滚)
    #[instrument(skip(self, session, actor), fields(request_id = %session.request.request_id))]
    pub fn commit_approval(
        &self,
        session: PlanningSession,
        actor: &Actor,
    ) -> FulfillmentResult<FulfillmentRequest> {
        require_staff(actor, "审批申请")?;

        if !session.plan.covered {
            return Err(FulfillmentError::InsufficientInventory {
                required_ml: session.plan.required_ml,
                available_ml: session.plan.available_ml,
            });
        }

        let now = now_ts();
        let snapshot = &session.request;
        let lines = &session.plan.lines;
        let total_ml = session.plan.total_ml();

        let approved = run_in_transaction(&self.repos.conn, session.policy.approve_timeout(), |tx| {
            let current = RequestRepository::find_by_id_tx(tx, &snapshot.request_id)?
                .ok_or_else(|| FulfillmentError::not_found("FulfillmentRequest", &snapshot.request_id))?;

            if current.status != RequestStatus::Pending || current.revision != snapshot.revision {
                return Err(FulfillmentError::ReservationConflict(format!(
                    "申请 {} 已被并发修改 (status={}, revision {} → {})",
                    snapshot.request_id, current.status, snapshot.revision, current.revision
                )));
            }

            for line in lines {
                InventoryLedger::draw_tx(
                    tx,
                    &line.unit_id,
                    line.volume_used_ml,
                    session.candidate_revision(&line.unit_id),
                    now,
                )
                .map_err(|e| draw_failure_as_conflict(&line.unit_id, e))?;
            }
            RequestRepository::insert_lines_tx(tx, &current.request_id, lines)?;

            let mut next = current;
            next.status = RequestStatus::Approved;
            next.approval_date = Some(now);
            next.responsible_actor_id = Some(actor.actor_id.clone());
            if session.manual {
                let partial = if total_ml < next.required_volume_ml { "(部分)" } else { "" };
                let flag = format!("[人工分配{}: {}/{}ml]", partial, total_ml, next.required_volume_ml);
                next.notes = append_note(&next.notes, &flag);
            }
            RequestRepository::update_state_tx(tx, &next)?;
            next.revision += 1;
            next.reserved_units = lines.clone();

            let action = if session.manual {
                ActionType::ManualOverride
            } else {
                ActionType::Approve
            };
            let log = ActionLog::new(Some(next.request_id.clone()), action, actor.actor_id.clone(), now)
                .with_payload(&json!({
                    "lines": lines,
                    "total_ml": total_ml,
                    "required_ml": next.required_volume_ml,
                    "strategy": session.policy.allocation_strategy,
                }))
                .with_detail(format!("{} → {}", RequestStatus::Pending, RequestStatus::Approved));
            ActionLogRepository::insert_tx(tx, &log)?;

            Ok(next)
        })?;

        info!(
            lines = approved.reserved_units.len(),
            total_ml,
            manual = session.manual,
            "申请已审批"
        );
        Ok(approved)
    }

    /// 人工选袋校验
    ///
    /// 每个血袋必须是该申请的合格候选 (相容 / 成分匹配 / 可抽取 / 未过期 / 未被预留),
    /// 且 0 < 用量 ≤ 剩余量; 总量不得超过需求量
    fn plan_manual(
        request: &FulfillmentRequest,
        candidates: &[BloodUnit],
        selections: &[ManualSelection],
    ) -> FulfillmentResult<AllocationPlan> {
        if selections.is_empty() {
            return Err(FulfillmentError::Validation("人工选袋不能为空".to_string()));
        }

        let mut seen = HashSet::new();
        let mut lines = Vec::with_capacity(selections.len());
        for sel in selections {
            if sel.volume_ml <= 0 {
                return Err(FulfillmentError::Validation(format!(
                    "血袋 {} 的用量必须大于 0",
                    sel.unit_id
                )));
            }
            if !seen.insert(sel.unit_id.as_str()) {
                return Err(FulfillmentError::Validation(format!(
                    "血袋 {} 重复选择",
                    sel.unit_id
                )));
            }
            let unit = candidates
                .iter()
                .find(|u| u.unit_id == sel.unit_id)
                .ok_or_else(|| {
                    FulfillmentError::Validation(format!(
                        "血袋 {} 不是该申请的合格候选",
                        sel.unit_id
                    ))
                })?;
            if sel.volume_ml > unit.remaining_volume_ml {
                return Err(FulfillmentError::OverDraw {
                    unit_id: sel.unit_id.clone(),
                    requested_ml: sel.volume_ml,
                    remaining_ml: unit.remaining_volume_ml,
                });
            }
            lines.push(ReservationLine {
                unit_id: sel.unit_id.clone(),
                volume_used_ml: sel.volume_ml,
            });
        }

        let total_ml: i64 = lines.iter().map(|l| l.volume_used_ml).sum();
        if total_ml > request.required_volume_ml {
            return Err(FulfillmentError::Validation(format!(
                "人工分配总量 {}ml 超过需求量 {}ml",
                total_ml, request.required_volume_ml
            )));
        }

        Ok(AllocationPlan {
            lines,
            covered: true,
            required_ml: request.required_volume_ml,
            available_ml: candidates.iter().map(|u| u.remaining_volume_ml).sum(),
        })
    }

    // ==========================================
    // 完成 / 取消 / 驳回
    // ==========================================

    /// 完成申请 (APPROVED → COMPLETED), 消耗永久生效
    #[instrument(skip(self, actor), fields(actor_id = %actor.actor_id))]
    pub fn complete(&self, request_id: &str, actor: &Actor) -> FulfillmentResult<FulfillmentRequest> {
        self.apply_transition(
            request_id,
            actor,
            RequestStatus::Completed,
            ActionType::Complete,
            |_, _, request, now| {
                request.completion_date = Some(now);
                Ok(json!({ "consumed_ml": request.reserved_total_ml() }))
            },
        )
    }

    /// 取消申请 (PENDING | APPROVED → CANCELLED)
    ///
    /// 来自 APPROVED 时在同一事务内归还全部预留; 任一归还失败则取消失败,
    /// 申请保持 APPROVED, 调用方可重试
    #[instrument(skip(self, actor), fields(actor_id = %actor.actor_id))]
    pub fn cancel(&self, request_id: &str, actor: &Actor) -> FulfillmentResult<FulfillmentRequest> {
        self.apply_transition(
            request_id,
            actor,
            RequestStatus::Cancelled,
            ActionType::Cancel,
            |conn, from, request, now| {
                let restored = if from == RequestStatus::Approved {
                    for line in &request.reserved_units {
                        InventoryLedger::restore_tx(conn, &line.unit_id, line.volume_used_ml, now)
                            .map_err(|e| restore_failure(&line.unit_id, e))?;
                    }
                    RequestRepository::delete_lines_tx(conn, &request.request_id)?;
                    std::mem::take(&mut request.reserved_units)
                } else {
                    Vec::new()
                };
                request.cancelled_date = Some(now);
                Ok(json!({ "restored": restored }))
            },
        )
    }

    /// 驳回申请 (PENDING → REJECTED)
    #[instrument(skip(self, actor), fields(actor_id = %actor.actor_id))]
    pub fn reject(
        &self,
        request_id: &str,
        actor: &Actor,
        reason: Option<&str>,
    ) -> FulfillmentResult<FulfillmentRequest> {
        self.apply_transition(
            request_id,
            actor,
            RequestStatus::Rejected,
            ActionType::Reject,
            |_, _, request, now| {
                request.rejected_date = Some(now);
                if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
                    request.notes = append_note(&request.notes, &format!("[驳回: {}]", reason));
                }
                Ok(json!({ "reason": reason }))
            },
        )
    }

    /// 通用状态迁移: 加载 → 校验迁移表 → 执行迁移动作 → 乐观锁写回 → 审计
    fn apply_transition<F>(
        &self,
        request_id: &str,
        actor: &Actor,
        to: RequestStatus,
        action: ActionType,
        mutate: F,
    ) -> FulfillmentResult<FulfillmentRequest>
    where
        F: FnOnce(&Connection, RequestStatus, &mut FulfillmentRequest, NaiveDateTime) -> FulfillmentResult<JsonValue>,
    {
        require_staff(actor, action.as_str())?;

        let timeout = self.config.load_policy()?.approve_timeout();
        let now = now_ts();

        let updated = run_in_transaction(&self.repos.conn, timeout, |tx| {
            let current = RequestRepository::find_by_id_tx(tx, request_id)?
                .ok_or_else(|| FulfillmentError::not_found("FulfillmentRequest", request_id))?;

            let from = current.status;
            if !from.can_transition_to(to) {
                return Err(FulfillmentError::InvalidTransition { from, to });
            }

            let mut next = current;
            next.status = to;
            next.responsible_actor_id = Some(actor.actor_id.clone());
            let detail = mutate(&**tx, from, &mut next, now)?;

            RequestRepository::update_state_tx(tx, &next)?;
            next.revision += 1;

            let log = ActionLog::new(Some(next.request_id.clone()), action, actor.actor_id.clone(), now)
                .with_payload(&json!({ "from": from, "to": to, "detail": detail }))
                .with_detail(format!("{} → {}", from, to));
            ActionLogRepository::insert_tx(tx, &log)?;

            Ok(next)
        });

        match &updated {
            Ok(request) => info!(request_id, status = %request.status, "申请状态迁移"),
            Err(e) => warn!(request_id, to = %to, error = %e, "申请状态迁移失败"),
        }
        updated
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按ID查询申请 (含预留明细)
    pub fn get_request(&self, request_id: &str) -> FulfillmentResult<FulfillmentRequest> {
        self.repos
            .request_repo
            .find_by_id(request_id)?
            .ok_or_else(|| FulfillmentError::not_found("FulfillmentRequest", request_id))
    }

    /// 按状态列出申请 (紧急优先, 其次按申请时间)
    pub fn list_requests(&self, status: Option<RequestStatus>) -> FulfillmentResult<Vec<FulfillmentRequest>> {
        Ok(self.repos.request_repo.list(status)?)
    }

    /// 申请的操作日志
    pub fn history(&self, request_id: &str) -> FulfillmentResult<Vec<ActionLog>> {
        Ok(self.repos.action_log_repo.find_by_request_id(request_id)?)
    }
}

/// 审批前置状态检查
///
/// APPROVED 说明另一审批已先行提交, 属于并发竞争的失败方, 按预留冲突返回
fn ensure_approvable(request: &FulfillmentRequest) -> FulfillmentResult<()> {
    match request.status {
        RequestStatus::Pending => Ok(()),
        RequestStatus::Approved => Err(FulfillmentError::ReservationConflict(format!(
            "申请 {} 已被其他审批授予",
            request.request_id
        ))),
        other => Err(FulfillmentError::InvalidTransition {
            from: other,
            to: RequestStatus::Approved,
        }),
    }
}

/// Draw 失败统一视为预留冲突 (超时与底层错误保留原语义)
fn draw_failure_as_conflict(unit_id: &str, err: FulfillmentError) -> FulfillmentError {
    match err {
        FulfillmentError::ReservationConflict(_)
        | FulfillmentError::TransactionTimeout(_)
        | FulfillmentError::Repository(_) => err,
        other => FulfillmentError::ReservationConflict(format!("血袋 {} 抽取失败: {}", unit_id, other)),
    }
}

/// Restore 失败统一视为取消失败
fn restore_failure(unit_id: &str, err: FulfillmentError) -> FulfillmentError {
    match err {
        FulfillmentError::RestoreFailure(_) | FulfillmentError::TransactionTimeout(_) => err,
        other => FulfillmentError::RestoreFailure(format!("血袋 {} 归还失败: {}", unit_id, other)),
    }
}

fn append_note(notes: &str, flag: &str) -> String {
    if notes.trim().is_empty() {
        flag.to_string()
    } else {
        format!("{} {}", notes.trim_end(), flag)
    }
}
