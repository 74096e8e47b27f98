// ==========================================
// 申请生命周期集成测试
// ==========================================
// 职责: 审批 / 完成 / 取消 / 驳回, 体积守恒, 取消逆操作, 献血者动员
// ==========================================


#[cfg(test)]
mod request_lifecycle_test {
    use std::collections::HashMap;
    use std::sync::Arc;

    use blood_fulfillment::domain::action_log::ActionType;
    use blood_fulfillment::domain::request::{ManualSelection, ReservationLine};
    use blood_fulfillment::domain::types::{RequestStatus, UnitStatus};
    use blood_fulfillment::domain::unit::BloodUnit;
    use blood_fulfillment::engine::{ApprovalOutcome, FulfillmentError};
    use blood_fulfillment::engine::identity::StaticIdentityProvider;

    use crate::test_helpers::*;

    fn line(unit_id: &str, volume: i64) -> ReservationLine {
        ReservationLine {
            unit_id: unit_id.to_string(),
            volume_used_ml: volume,
        }
    }

    fn snapshot(env: &TestEnv) -> HashMap<String, (i64, UnitStatus)> {
        env.state
            .ledger
            .list_units(None)
            .unwrap()
            .into_iter()
            .map(|u: BloodUnit| (u.unit_id, (u.remaining_volume_ml, u.status)))
            .collect()
    }

    /// AB+ 全血 500ml, 库存 U1{O-,300,+1d} U2{O-,250,+5d}
    fn scenario_a(env: &TestEnv) -> String {
        insert_full_unit(env, "U1", "O-", "WHOLE_BLOOD", 300, 1);
        insert_full_unit(env, "U2", "O-", "WHOLE_BLOOD", 250, 5);
        submit(env, "AB+", "WHOLE_BLOOD", 500)
    }

    // ==========================================
    // 提交
    // ==========================================

    #[test]
    fn test_submit_creates_pending_request() {
        let env = setup_env();
        let request_id = submit(&env, "O-", "PLASMA", 300);

        let request = env.state.lifecycle.get_request(&request_id).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.required_volume_ml, 300);
        assert!(request.reserved_units.is_empty());
        assert!(request.approval_date.is_none());

        let history = env.state.lifecycle.history(&request_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind(), Some(ActionType::Submit));
    }

    #[test]
    fn test_submit_validation() {
        let env = setup_env();
        let lifecycle = &env.state.lifecycle;

        for bad in [0, -50] {
            let err = lifecycle
                .submit(new_request("O-", "PLASMA", bad), &member())
                .unwrap_err();
            assert!(matches!(err, FulfillmentError::Validation(_)));
        }

        let mut unknown_recipient = new_request("O-", "PLASMA", 100);
        unknown_recipient.recipient_id = "RCP-404".to_string();
        assert!(matches!(
            lifecycle.submit(unknown_recipient, &member()).unwrap_err(),
            FulfillmentError::Validation(_)
        ));

        assert!(matches!(
            lifecycle.submit(new_request("X+", "PLASMA", 100), &member()).unwrap_err(),
            FulfillmentError::Validation(_)
        ));
        assert!(matches!(
            lifecycle.submit(new_request("O-", "SERUM", 100), &member()).unwrap_err(),
            FulfillmentError::Validation(_)
        ));

        assert!(lifecycle.list_requests(None).unwrap().is_empty());
    }

    // ==========================================
    // 审批场景
    // ==========================================

    #[tokio::test]
    async fn test_scenario_a_multi_unit_fefo() {
        let env = setup_env();
        let request_id = scenario_a(&env);

        let outcome = env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();
        let request = match outcome {
            ApprovalOutcome::Approved { request } => request,
            other => panic!("应审批通过: {:?}", other),
        };
        assert_eq!(request.status, RequestStatus::Approved);
        assert!(request.approval_date.is_some());
        assert_eq!(request.responsible_actor_id.as_deref(), Some(STAFF_ID));
        assert_eq!(request.reserved_units, vec![line("U1", 300), line("U2", 200)]);

        let u1 = load_unit(&env, "U1");
        assert_eq!((u1.remaining_volume_ml, u1.status), (0, UnitStatus::Used));
        let u2 = load_unit(&env, "U2");
        assert_eq!((u2.remaining_volume_ml, u2.status), (50, UnitStatus::PartialUsed));

        // 重新读取与返回一致
        let stored = env.state.lifecycle.get_request(&request_id).unwrap();
        assert_eq!(stored.reserved_units, request.reserved_units);
        assert_eq!(stored.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_scenario_b_plasma_inversion() {
        let env = setup_env();
        insert_full_unit(&env, "U3", "A+", "PLASMA", 400, 30);
        let request_id = submit(&env, "O-", "PLASMA", 300);

        let outcome = env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();
        assert!(outcome.is_approved());
        assert_eq!(outcome.request().reserved_units, vec![line("U3", 300)]);

        let u3 = load_unit(&env, "U3");
        assert_eq!((u3.remaining_volume_ml, u3.status), (100, UnitStatus::PartialUsed));
    }

    #[tokio::test]
    async fn test_scenario_c_insufficient_mobilizes() {
        let identity = StaticIdentityProvider::new()
            .with_recipient(RECIPIENT)
            .with_donor(donor("D-ON", "O+", None, true))
            .with_donor(donor("D-AB", "AB-", Some(120), true))
            .with_donor(donor("D-COOL", "A-", Some(10), true))
            .with_donor(donor("D-OFF", "B+", None, false));
        let env = setup_env_with(identity);
        // 类型相容但成分不符, 不计入
        insert_full_unit(&env, "U-RBC", "AB-", "RED_CELLS", 300, 5);
        let request_id = submit(&env, "AB-", "PLATELETS", 200);

        let outcome = env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();
        let (request, mobilization) = match outcome {
            ApprovalOutcome::Pending { request, mobilization } => (request, mobilization),
            other => panic!("应保持待审批: {:?}", other),
        };
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.reserved_units.is_empty());

        // AB 受血者血小板: 全部 ABO 相容, 默认允许 Rh 不合
        assert_eq!(mobilization.donor_type_ids.len(), 8);
        assert_eq!(mobilization.shortfall_ml, 200);
        assert_eq!(mobilization.notified, vec!["D-AB".to_string(), "D-ON".to_string()]);
        assert!(mobilization.dispatched);

        let sent = env.dispatcher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].request_id, request_id);
        assert_eq!(sent[0].candidate_ids, mobilization.notified);

        let stored = env.state.lifecycle.get_request(&request_id).unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert_eq!(load_unit(&env, "U-RBC").remaining_volume_ml, 300);

        let history = env.state.lifecycle.history(&request_id).unwrap();
        assert_eq!(history.last().and_then(|l| l.kind()), Some(ActionType::Mobilize));
    }

    #[tokio::test]
    async fn test_platelets_rh_flag_narrows_donor_types() {
        let env = setup_env();
        env.state
            .config_api
            .set_policy_value("platelets_allow_rh_mismatch", "false", &staff(), "严格 Rh")
            .unwrap();
        insert_full_unit(&env, "P-POS", "O+", "PLATELETS", 250, 3);
        let request_id = submit(&env, "AB-", "PLATELETS", 200);

        let outcome = env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();
        match outcome {
            ApprovalOutcome::Pending { mobilization, .. } => {
                assert_eq!(mobilization.donor_type_ids.len(), 4);
                assert!(mobilization.donor_type_ids.iter().all(|t| t.ends_with('-')));
                // 无献血者档案, 跳过派发
                assert!(mobilization.notified.is_empty());
                assert!(!mobilization.dispatched);
            }
            other => panic!("Rh 阳性血小板不应被分配: {:?}", other),
        }
        assert!(env.dispatcher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_approve_while_pending_remobilizes() {
        let identity = StaticIdentityProvider::new()
            .with_recipient(RECIPIENT)
            .with_donor(donor("D1", "O-", None, true));
        let env = setup_env_with(identity);
        let request_id = submit(&env, "O-", "RED_CELLS", 300);

        for _ in 0..2 {
            let outcome = env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();
            assert!(!outcome.is_approved());
        }
        assert_eq!(env.dispatcher.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_request_pending() {
        let identity = StaticIdentityProvider::new()
            .with_recipient(RECIPIENT)
            .with_donor(donor("D1", "O-", None, true));
        let env = setup_env_with_dispatcher(identity, Arc::new(FailingDispatcher));
        let request_id = submit(&env, "O-", "RED_CELLS", 300);

        let outcome = env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();
        match outcome {
            ApprovalOutcome::Pending { mobilization, .. } => {
                assert_eq!(mobilization.eligible_donor_ids, vec!["D1".to_string()]);
                assert!(mobilization.notified.is_empty());
                assert!(!mobilization.dispatched);
            }
            other => panic!("应保持待审批: {:?}", other),
        }
        assert_eq!(
            env.state.lifecycle.get_request(&request_id).unwrap().status,
            RequestStatus::Pending
        );

        let history = env.state.lifecycle.history(&request_id).unwrap();
        let mobilize = history
            .iter()
            .find(|l| l.kind() == Some(ActionType::Mobilize))
            .unwrap();
        let payload = mobilize.payload_json.as_ref().unwrap();
        assert_eq!(payload["eligible_donor_ids"], serde_json::json!(["D1"]));
        assert_eq!(payload["notified"], serde_json::json!([]));
        assert_eq!(payload["dispatched"], false);
    }

    #[tokio::test]
    async fn test_oversized_cooldown_never_breaks_mobilization() {
        let identity = StaticIdentityProvider::new()
            .with_recipient(RECIPIENT)
            .with_donor(donor("D1", "O-", None, true))
            .with_donor(donor("D2", "O-", Some(30), true));
        let env = setup_env_with(identity);

        let err = env
            .state
            .config_api
            .set_policy_value("donation_cooldown_days", "9223372036854775807", &staff(), "试验")
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        // 绕过 API 直接写入越界值, 加载时回落默认值
        env.state
            .config_manager
            .set_global_config_value("donation_cooldown_days", "9223372036854775807")
            .unwrap();
        assert_eq!(env.state.config_api.get_policy().unwrap().donation_cooldown_days, 56);

        let request_id = submit(&env, "O-", "RED_CELLS", 300);
        let outcome = env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();
        match outcome {
            ApprovalOutcome::Pending { mobilization, .. } => {
                assert_eq!(mobilization.notified, vec!["D1".to_string()]);
                assert!(mobilization.dispatched);
            }
            other => panic!("应保持待审批: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exact_single_unit_fit() {
        let env = setup_env();
        insert_full_unit(&env, "U-EXACT", "B+", "RED_CELLS", 250, 9);
        let request_id = submit(&env, "B+", "RED_CELLS", 250);

        let outcome = env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();
        assert_eq!(outcome.request().reserved_units, vec![line("U-EXACT", 250)]);
        let u = load_unit(&env, "U-EXACT");
        assert_eq!((u.remaining_volume_ml, u.status), (0, UnitStatus::Used));
    }

    // ==========================================
    // 人工选袋
    // ==========================================

    #[tokio::test]
    async fn test_manual_override_partial_is_flagged() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "O-", "WHOLE_BLOOD", 300, 1);
        insert_full_unit(&env, "U2", "O-", "WHOLE_BLOOD", 250, 5);
        let request_id = submit(&env, "A+", "WHOLE_BLOOD", 500);

        let selection = vec![ManualSelection {
            unit_id: "U2".to_string(),
            volume_ml: 200,
        }];
        let outcome = env
            .state
            .lifecycle
            .approve(&request_id, &staff(), Some(selection))
            .await
            .unwrap();
        let request = outcome.request().clone();
        assert_eq!(request.status, RequestStatus::Approved);
        assert_eq!(request.reserved_units, vec![line("U2", 200)]);
        assert!(request.notes.contains("[人工分配(部分): 200/500ml]"), "{}", request.notes);

        assert_eq!(load_unit(&env, "U1").remaining_volume_ml, 300);
        assert_eq!(load_unit(&env, "U2").remaining_volume_ml, 50);

        let history = env.state.lifecycle.history(&request_id).unwrap();
        assert!(history.iter().any(|l| l.kind() == Some(ActionType::ManualOverride)));
    }

    #[tokio::test]
    async fn test_manual_override_rejects_invalid_selection() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "O-", "WHOLE_BLOOD", 300, 1);
        insert_full_unit(&env, "U-B", "B+", "WHOLE_BLOOD", 300, 1);
        let request_id = submit(&env, "A+", "WHOLE_BLOOD", 200);
        let lifecycle = &env.state.lifecycle;

        let pick = |id: &str, ml: i64| {
            Some(vec![ManualSelection {
                unit_id: id.to_string(),
                volume_ml: ml,
            }])
        };

        // 总量超过需求量
        let err = lifecycle.approve(&request_id, &staff(), pick("U1", 250)).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));
        // 不相容血型
        let err = lifecycle.approve(&request_id, &staff(), pick("U-B", 100)).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));
        // 空选择
        let err = lifecycle.approve(&request_id, &staff(), Some(Vec::new())).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));

        assert_eq!(lifecycle.get_request(&request_id).unwrap().status, RequestStatus::Pending);
        assert_eq!(load_unit(&env, "U1").remaining_volume_ml, 300);
    }

    // ==========================================
    // 体积守恒 / 取消逆操作
    // ==========================================

    #[tokio::test]
    async fn test_volume_conservation_for_plan_shapes() {
        // (库存, 需求量)
        let shapes: Vec<(Vec<i64>, i64)> = vec![
            (vec![300], 300),           // 单袋精确
            (vec![300], 120),           // 单袋部分
            (vec![100, 100, 100], 300), // 多袋精确
            (vec![200, 200, 200], 450), // 多袋部分
        ];

        for (volumes, required) in shapes {
            let env = setup_env();
            for (i, v) in volumes.iter().enumerate() {
                insert_full_unit(&env, &format!("V{}", i), "A-", "RED_CELLS", *v, 1 + i as i64);
            }
            let before = snapshot(&env);
            let request_id = submit(&env, "A+", "RED_CELLS", required);

            let outcome = env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();
            let request = outcome.request().clone();
            assert_eq!(request.reserved_total_ml(), required);

            for l in &request.reserved_units {
                let after = load_unit(&env, &l.unit_id);
                assert_eq!(before[&l.unit_id].0 - after.remaining_volume_ml, l.volume_used_ml);
            }

            // 取消是精确逆操作
            let cancelled = env.state.lifecycle.cancel(&request_id, &staff()).unwrap();
            assert_eq!(cancelled.status, RequestStatus::Cancelled);
            assert!(cancelled.reserved_units.is_empty());
            assert_eq!(snapshot(&env), before);
        }
    }

    #[tokio::test]
    async fn test_scenario_e_cancel_restores_inventory() {
        let env = setup_env();
        let request_id = scenario_a(&env);
        env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();

        let cancelled = env.state.lifecycle.cancel(&request_id, &staff()).unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert!(cancelled.cancelled_date.is_some());

        let u1 = load_unit(&env, "U1");
        assert_eq!((u1.remaining_volume_ml, u1.status), (300, UnitStatus::Available));
        let u2 = load_unit(&env, "U2");
        assert_eq!((u2.remaining_volume_ml, u2.status), (250, UnitStatus::Available));

        let stored = env.state.lifecycle.get_request(&request_id).unwrap();
        assert!(stored.reserved_units.is_empty());
        assert!(env.state.ledger.reserved_units_of(&request_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_failure_keeps_request_approved() {
        let env = setup_env();
        let request_id = scenario_a(&env);
        env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();

        // 外部修正导致 U2 已回满, 归还 200ml 将超过采集量
        {
            let conn = env.state.conn.lock().unwrap();
            conn.execute(
                "UPDATE blood_unit SET remaining_volume_ml = 250, status = 'AVAILABLE' WHERE unit_id = 'U2'",
                [],
            )
            .unwrap();
        }

        let err = env.state.lifecycle.cancel(&request_id, &staff()).unwrap_err();
        assert!(matches!(err, FulfillmentError::RestoreFailure(_)));

        let stored = env.state.lifecycle.get_request(&request_id).unwrap();
        assert_eq!(stored.status, RequestStatus::Approved);
        assert_eq!(stored.reserved_units.len(), 2);
        // U1 的归还随事务回滚
        assert_eq!(load_unit(&env, "U1").remaining_volume_ml, 0);
    }

    #[test]
    fn test_cancel_pending_has_no_inventory_effect() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "O-", "WHOLE_BLOOD", 300, 5);
        let request_id = submit(&env, "O-", "WHOLE_BLOOD", 100);
        let before = snapshot(&env);

        let cancelled = env.state.lifecycle.cancel(&request_id, &staff()).unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert_eq!(snapshot(&env), before);
    }

    // ==========================================
    // 状态机
    // ==========================================

    #[tokio::test]
    async fn test_complete_keeps_consumption() {
        let env = setup_env();
        let request_id = scenario_a(&env);
        env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();
        let before = snapshot(&env);

        let completed = env.state.lifecycle.complete(&request_id, &staff()).unwrap();
        assert_eq!(completed.status, RequestStatus::Completed);
        assert!(completed.completion_date.is_some());
        assert_eq!(completed.reserved_units.len(), 2);
        assert_eq!(snapshot(&env), before);
    }

    #[tokio::test]
    async fn test_state_machine_closure() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "O-", "WHOLE_BLOOD", 1000, 5);
        let lifecycle = &env.state.lifecycle;

        // PENDING 不能直接完成
        let pending = submit(&env, "O-", "WHOLE_BLOOD", 100);
        assert!(matches!(
            lifecycle.complete(&pending, &staff()).unwrap_err(),
            FulfillmentError::InvalidTransition {
                from: RequestStatus::Pending,
                to: RequestStatus::Completed
            }
        ));

        // APPROVED 不能驳回
        lifecycle.approve(&pending, &staff(), None).await.unwrap();
        assert!(matches!(
            lifecycle.reject(&pending, &staff(), None).unwrap_err(),
            FulfillmentError::InvalidTransition { .. }
        ));

        // 终态: COMPLETED / CANCELLED / REJECTED
        let completed = pending;
        lifecycle.complete(&completed, &staff()).unwrap();

        let cancelled = submit(&env, "O-", "WHOLE_BLOOD", 100);
        lifecycle.cancel(&cancelled, &staff()).unwrap();

        let rejected = submit(&env, "O-", "WHOLE_BLOOD", 100);
        let r = lifecycle.reject(&rejected, &staff(), Some("重复申请")).unwrap();
        assert!(r.rejected_date.is_some());
        assert!(r.notes.contains("[驳回: 重复申请]"));

        let before = snapshot(&env);
        for id in [&completed, &cancelled, &rejected] {
            let status = lifecycle.get_request(id).unwrap().status;
            assert!(status.is_terminal());

            assert!(matches!(
                lifecycle.approve(id, &staff(), None).await.unwrap_err(),
                FulfillmentError::InvalidTransition { .. }
            ));
            assert!(matches!(
                lifecycle.complete(id, &staff()).unwrap_err(),
                FulfillmentError::InvalidTransition { .. }
            ));
            assert!(matches!(
                lifecycle.cancel(id, &staff()).unwrap_err(),
                FulfillmentError::InvalidTransition { .. }
            ));
            assert!(matches!(
                lifecycle.reject(id, &staff(), None).unwrap_err(),
                FulfillmentError::InvalidTransition { .. }
            ));
            assert_eq!(lifecycle.get_request(id).unwrap().status, status);
        }
        assert_eq!(snapshot(&env), before);
    }

    #[tokio::test]
    async fn test_management_operations_require_staff() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "O-", "WHOLE_BLOOD", 300, 5);
        let request_id = submit(&env, "O-", "WHOLE_BLOOD", 100);
        let lifecycle = &env.state.lifecycle;

        assert!(matches!(
            lifecycle.approve(&request_id, &member(), None).await.unwrap_err(),
            FulfillmentError::PermissionDenied(_)
        ));
        assert!(matches!(
            lifecycle.reject(&request_id, &member(), None).unwrap_err(),
            FulfillmentError::PermissionDenied(_)
        ));
        assert!(matches!(
            lifecycle.cancel(&request_id, &member()).unwrap_err(),
            FulfillmentError::PermissionDenied(_)
        ));
        assert_eq!(lifecycle.get_request(&request_id).unwrap().status, RequestStatus::Pending);
        assert_eq!(load_unit(&env, "U1").remaining_volume_ml, 300);
    }

    // ==========================================
    // 查询
    // ==========================================

    #[test]
    fn test_list_requests_orders_emergency_first() {
        let env = setup_env();
        let routine = submit(&env, "O-", "PLASMA", 100);
        let mut urgent = new_request("O-", "PLASMA", 100);
        urgent.is_emergency = true;
        let urgent = env.state.lifecycle.submit(urgent, &member()).unwrap().request_id;
        let rejected = submit(&env, "O-", "PLASMA", 100);
        env.state.lifecycle.reject(&rejected, &staff(), None).unwrap();

        let all = env.state.lifecycle.list_requests(None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].request_id, urgent);

        let pending = env
            .state
            .lifecycle
            .list_requests(Some(RequestStatus::Pending))
            .unwrap();
        let ids: Vec<&str> = pending.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec![urgent.as_str(), routine.as_str()]);
    }

    #[test]
    fn test_get_unknown_request() {
        let env = setup_env();
        assert!(matches!(
            env.state.lifecycle.get_request("missing").unwrap_err(),
            FulfillmentError::NotFound { .. }
        ));
    }
}
