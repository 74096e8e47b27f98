// ==========================================
// 库存台账集成测试
// ==========================================
// 职责: 候选查询 / 抽取 / 归还 / 过期巡检 / 血袋登记与停用
// ==========================================


#[cfg(test)]
mod inventory_ledger_test {
    use blood_fulfillment::db::now_ts;
    use blood_fulfillment::domain::action_log::ActionType;
    use blood_fulfillment::domain::actor::Actor;
    use blood_fulfillment::domain::types::UnitStatus;
    use blood_fulfillment::domain::unit::NewBloodUnit;
    use blood_fulfillment::engine::FulfillmentError;
    use blood_fulfillment::repository::ActionLogRepository;
    use chrono::Duration;

    use crate::test_helpers::*;

    fn ids(types: &[&str]) -> Vec<String> {
        types.iter().map(|t| t.to_string()).collect()
    }

    // ==========================================
    // 候选查询
    // ==========================================

    #[test]
    fn test_find_candidates_filters_and_orders_by_expiry() {
        let env = setup_env();
        insert_full_unit(&env, "U-LATE", "O-", "WHOLE_BLOOD", 300, 10);
        insert_full_unit(&env, "U-EARLY", "O-", "WHOLE_BLOOD", 300, 2);
        insert_unit(&env, "U-PART", "A-", "WHOLE_BLOOD", 300, 120, 5, UnitStatus::PartialUsed);
        // 以下均不应出现
        insert_full_unit(&env, "U-EXPIRED", "O-", "WHOLE_BLOOD", 300, -1);
        insert_full_unit(&env, "U-PLASMA", "O-", "PLASMA", 300, 3);
        insert_full_unit(&env, "U-B", "B-", "WHOLE_BLOOD", 300, 3);
        insert_unit(&env, "U-INACTIVE", "O-", "WHOLE_BLOOD", 300, 300, 3, UnitStatus::Inactive);
        insert_unit(&env, "U-USED", "O-", "WHOLE_BLOOD", 300, 0, 3, UnitStatus::Used);
        insert_unit(&env, "U-RES", "O-", "WHOLE_BLOOD", 300, 300, 3, UnitStatus::Reserved);

        let candidates = env
            .state
            .ledger
            .find_candidates(&ids(&["O-", "A-"]), "WHOLE_BLOOD", now_ts())
            .unwrap();
        let got: Vec<&str> = candidates.iter().map(|u| u.unit_id.as_str()).collect();
        assert_eq!(got, vec!["U-EARLY", "U-PART", "U-LATE"]);
    }

    #[test]
    fn test_find_candidates_empty_type_set() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "O-", "WHOLE_BLOOD", 300, 2);

        let candidates = env
            .state
            .ledger
            .find_candidates(&[], "WHOLE_BLOOD", now_ts())
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_units_held_by_approved_request_are_not_candidates() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "O-", "RED_CELLS", 300, 5);
        insert_full_unit(&env, "U2", "O-", "RED_CELLS", 300, 6);

        let request_id = submit(&env, "O-", "RED_CELLS", 100);
        let outcome = env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();
        assert!(outcome.is_approved());

        let candidates = env
            .state
            .ledger
            .find_candidates(&ids(&["O-"]), "RED_CELLS", now_ts())
            .unwrap();
        let got: Vec<&str> = candidates.iter().map(|u| u.unit_id.as_str()).collect();
        assert_eq!(got, vec!["U2"]);

        // 直接抽取被预留血袋也被拒绝
        let err = env.state.ledger.draw("U1", 50).unwrap_err();
        assert!(matches!(err, FulfillmentError::ReservationConflict(_)));

        // 完成后剩余量重新可用
        env.state.lifecycle.complete(&request_id, &staff()).unwrap();
        let candidates = env
            .state
            .ledger
            .find_candidates(&ids(&["O-"]), "RED_CELLS", now_ts())
            .unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].unit_id, "U1");
        assert_eq!(candidates[0].remaining_volume_ml, 200);
    }

    // ==========================================
    // 抽取
    // ==========================================

    #[test]
    fn test_draw_partial_then_exhaust() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "O+", "WHOLE_BLOOD", 300, 5);

        let unit = env.state.ledger.draw("U1", 100).unwrap();
        assert_eq!(unit.remaining_volume_ml, 200);
        assert_eq!(unit.status, UnitStatus::PartialUsed);
        assert_eq!(unit.revision, 1);

        let unit = env.state.ledger.draw("U1", 200).unwrap();
        assert_eq!(unit.remaining_volume_ml, 0);
        assert_eq!(unit.status, UnitStatus::Used);

        let stored = load_unit(&env, "U1");
        assert_eq!(stored.remaining_volume_ml, 0);
        assert_eq!(stored.status, UnitStatus::Used);
        assert_eq!(stored.revision, 2);
    }

    #[test]
    fn test_draw_never_exceeds_remaining_for_any_status() {
        let env = setup_env();
        let cases = [
            ("S-AVAIL", UnitStatus::Available, 300, 5),
            ("S-PART", UnitStatus::PartialUsed, 100, 5),
            ("S-RES", UnitStatus::Reserved, 100, 5),
            ("S-USED", UnitStatus::Used, 0, 5),
            ("S-EXP", UnitStatus::Expired, 100, -1),
            ("S-INACT", UnitStatus::Inactive, 100, 5),
        ];
        for (id, status, remaining, days) in cases {
            insert_unit(&env, id, "O-", "WHOLE_BLOOD", 300, remaining, days, status);

            let err = env.state.ledger.draw(id, remaining + 1).unwrap_err();
            match status {
                UnitStatus::Available | UnitStatus::PartialUsed => {
                    assert!(matches!(err, FulfillmentError::OverDraw { .. }), "{}: {:?}", id, err)
                }
                _ => assert!(
                    matches!(err, FulfillmentError::UnitNotDrawable { .. }),
                    "{}: {:?}",
                    id,
                    err
                ),
            }

            let after = load_unit(&env, id);
            assert_eq!(after.remaining_volume_ml, remaining, "{} 剩余量不应变化", id);
            assert_eq!(after.status, status);
            assert_eq!(after.revision, 0);
        }
    }

    #[test]
    fn test_draw_rejects_expired_and_non_positive() {
        let env = setup_env();
        // 状态仍为 AVAILABLE, 但效期已过
        insert_full_unit(&env, "U-OLD", "O-", "WHOLE_BLOOD", 300, -1);
        insert_full_unit(&env, "U1", "O-", "WHOLE_BLOOD", 300, 3);

        assert!(matches!(
            env.state.ledger.draw("U-OLD", 10).unwrap_err(),
            FulfillmentError::UnitNotDrawable { .. }
        ));
        assert!(matches!(
            env.state.ledger.draw("U1", 0).unwrap_err(),
            FulfillmentError::Validation(_)
        ));
        assert!(matches!(
            env.state.ledger.draw("U-MISSING", 10).unwrap_err(),
            FulfillmentError::NotFound { .. }
        ));
    }

    // ==========================================
    // 归还
    // ==========================================

    #[test]
    fn test_restore_normalizes_status() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "AB+", "PLASMA", 250, 5);

        env.state.ledger.draw("U1", 250).unwrap();
        let unit = env.state.ledger.restore("U1", 50).unwrap();
        assert_eq!(unit.remaining_volume_ml, 50);
        assert_eq!(unit.status, UnitStatus::PartialUsed);

        let unit = env.state.ledger.restore("U1", 200).unwrap();
        assert_eq!(unit.remaining_volume_ml, 250);
        assert_eq!(unit.status, UnitStatus::Available);
    }

    #[test]
    fn test_restore_beyond_collected_fails() {
        let env = setup_env();
        insert_unit(&env, "U1", "A+", "PLASMA", 300, 250, 5, UnitStatus::PartialUsed);

        let err = env.state.ledger.restore("U1", 60).unwrap_err();
        assert!(matches!(err, FulfillmentError::RestoreFailure(_)));
        assert_eq!(load_unit(&env, "U1").remaining_volume_ml, 250);
    }

    #[test]
    fn test_restore_keeps_retired_status() {
        let env = setup_env();
        insert_unit(&env, "U-INACT", "A+", "PLASMA", 300, 100, 5, UnitStatus::Inactive);
        insert_unit(&env, "U-EXP", "A+", "PLASMA", 300, 100, -2, UnitStatus::Expired);
        // 效期已过但尚未巡检
        insert_unit(&env, "U-STALE", "A+", "PLASMA", 300, 100, -1, UnitStatus::PartialUsed);

        let u = env.state.ledger.restore("U-INACT", 50).unwrap();
        assert_eq!((u.remaining_volume_ml, u.status), (150, UnitStatus::Inactive));

        let u = env.state.ledger.restore("U-EXP", 50).unwrap();
        assert_eq!((u.remaining_volume_ml, u.status), (150, UnitStatus::Expired));

        let u = env.state.ledger.restore("U-STALE", 200).unwrap();
        assert_eq!((u.remaining_volume_ml, u.status), (300, UnitStatus::Expired));
    }

    // ==========================================
    // 过期巡检
    // ==========================================

    #[test]
    fn test_mark_expired_sweeps_only_due_units() {
        let env = setup_env();
        insert_full_unit(&env, "U-DUE", "O-", "WHOLE_BLOOD", 300, -1);
        insert_unit(&env, "U-DUE-PART", "O-", "WHOLE_BLOOD", 300, 100, -3, UnitStatus::PartialUsed);
        insert_full_unit(&env, "U-FRESH", "O-", "WHOLE_BLOOD", 300, 4);
        insert_unit(&env, "U-USED", "O-", "WHOLE_BLOOD", 300, 0, -5, UnitStatus::Used);

        let expired = env.state.ledger.mark_expired(now_ts()).unwrap();
        assert_eq!(expired, vec!["U-DUE".to_string(), "U-DUE-PART".to_string()]);

        assert_eq!(load_unit(&env, "U-DUE").status, UnitStatus::Expired);
        assert_eq!(load_unit(&env, "U-DUE-PART").remaining_volume_ml, 100);
        assert_eq!(load_unit(&env, "U-FRESH").status, UnitStatus::Available);
        assert_eq!(load_unit(&env, "U-USED").status, UnitStatus::Used);

        // 再次巡检无新增
        assert!(env.state.ledger.mark_expired(now_ts()).unwrap().is_empty());

        let logs = ActionLogRepository::new(env.state.conn.clone()).find_recent(10).unwrap();
        let sweeps: Vec<_> = logs
            .iter()
            .filter(|l| l.kind() == Some(ActionType::ExpirySweep))
            .collect();
        assert_eq!(sweeps.len(), 1);
    }

    #[test]
    fn test_mark_expired_with_future_as_of() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "O-", "WHOLE_BLOOD", 300, 2);

        let expired = env
            .state
            .ledger
            .mark_expired(now_ts() + Duration::days(3))
            .unwrap();
        assert_eq!(expired, vec!["U1".to_string()]);
    }

    // ==========================================
    // 登记 / 停用
    // ==========================================

    fn new_unit(unit_id: Option<&str>, blood_type: &str, days_valid: i64) -> NewBloodUnit {
        let collected_at = now_ts();
        NewBloodUnit {
            unit_id: unit_id.map(str::to_string),
            blood_type_id: blood_type.to_string(),
            component_id: "RED_CELLS".to_string(),
            collected_volume_ml: 280,
            collected_at,
            expiry_date: collected_at + Duration::days(days_valid),
            donor_id: "DNR-9".to_string(),
        }
    }

    #[test]
    fn test_register_unit() {
        let env = setup_env();

        let unit = env
            .state
            .ledger
            .register_unit(new_unit(None, "B+", 35), &staff())
            .unwrap();
        assert!(!unit.unit_id.is_empty());
        assert_eq!(unit.status, UnitStatus::Available);
        assert_eq!(unit.remaining_volume_ml, 280);

        let stored = env.state.ledger.get_unit(&unit.unit_id).unwrap();
        assert_eq!(stored, unit);
    }

    #[test]
    fn test_register_unit_validation() {
        let env = setup_env();
        let ledger = &env.state.ledger;

        assert!(matches!(
            ledger.register_unit(new_unit(Some("X1"), "B+", 35), &member()).unwrap_err(),
            FulfillmentError::PermissionDenied(_)
        ));
        assert!(matches!(
            ledger.register_unit(new_unit(Some("X1"), "C+", 35), &staff()).unwrap_err(),
            FulfillmentError::Validation(_)
        ));
        assert!(matches!(
            ledger.register_unit(new_unit(Some("X1"), "B+", 0), &staff()).unwrap_err(),
            FulfillmentError::Validation(_)
        ));

        ledger.register_unit(new_unit(Some("X1"), "B+", 35), &staff()).unwrap();
        assert!(matches!(
            ledger.register_unit(new_unit(Some("X1"), "B+", 35), &staff()).unwrap_err(),
            FulfillmentError::Validation(_)
        ));
    }

    #[test]
    fn test_deactivate_unit() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "O-", "WHOLE_BLOOD", 300, 5);
        insert_unit(&env, "U-USED", "O-", "WHOLE_BLOOD", 300, 0, 5, UnitStatus::Used);

        let admin = Actor::admin("admin-01");
        let unit = env.state.ledger.deactivate_unit("U1", &admin, "检测阳性").unwrap();
        assert_eq!(unit.status, UnitStatus::Inactive);
        assert_eq!(unit.remaining_volume_ml, 300);

        let candidates = env
            .state
            .ledger
            .find_candidates(&ids(&["O-"]), "WHOLE_BLOOD", now_ts())
            .unwrap();
        assert!(candidates.is_empty());

        assert!(matches!(
            env.state.ledger.deactivate_unit("U1", &admin, "重复").unwrap_err(),
            FulfillmentError::Validation(_)
        ));
        assert!(matches!(
            env.state.ledger.deactivate_unit("U-USED", &admin, "已用").unwrap_err(),
            FulfillmentError::Validation(_)
        ));
        assert!(matches!(
            env.state.ledger.deactivate_unit("U-USED", &member(), "已用").unwrap_err(),
            FulfillmentError::PermissionDenied(_)
        ));
    }

    #[tokio::test]
    async fn test_deactivate_reserved_unit_conflicts() {
        let env = setup_env();
        insert_full_unit(&env, "U1", "O-", "RED_CELLS", 300, 5);
        let request_id = submit(&env, "A+", "RED_CELLS", 100);
        env.state.lifecycle.approve(&request_id, &staff(), None).await.unwrap();

        let err = env
            .state
            .ledger
            .deactivate_unit("U1", &staff(), "隔离")
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::ReservationConflict(_)));

        let reserved = env.state.ledger.reserved_units_of(&request_id).unwrap();
        assert_eq!(reserved.len(), 1);
        assert_eq!(reserved[0].0.unit_id, "U1");
        assert_eq!(reserved[0].0.volume_used_ml, 100);
        assert_eq!(reserved[0].1.status, UnitStatus::PartialUsed);
    }
}
