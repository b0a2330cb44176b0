// ==========================================
// 产能准入场景测试
// ==========================================
// 职责: 通过 API 层验证拒绝/预警/修改回滚/惰性创建/强制放行
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod capacity_scenario_test {
    use order_capacity::api::ApiError;
    use order_capacity::domain::limit::LimitPatch;
    use order_capacity::domain::order::OrderLineItem;
    use order_capacity::domain::QUANTITY_EPSILON;

    use crate::test_helpers::{
        consumed_of, find_limit, kg, pickup_date, seed_category_limit, seed_product_limit,
        setup_state,
    };

    // ==========================================
    // 拒绝与预警
    // ==========================================

    #[test]
    fn test_basic_rejection_reports_available_quantity() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Tortellini", 10.0);

        state
            .order_capacity_api
            .reserve("ORD-1", pickup_date(), &[kg("Tortellini", 8.0)], false, "cassa")
            .unwrap();

        let result = state
            .limit_api
            .verify(pickup_date(), &[kg("Tortellini", 3.0)], false)
            .unwrap();
        assert!(!result.ok);
        let finding = result.blocking().next().unwrap();
        assert_eq!(finding.name, "Tortellini");
        assert!((finding.requested - 3.0).abs() < QUANTITY_EPSILON);
        assert!((finding.available - 2.0).abs() < QUANTITY_EPSILON);

        let err = state
            .order_capacity_api
            .reserve("ORD-2", pickup_date(), &[kg("Tortellini", 3.0)], false, "cassa")
            .unwrap_err();
        assert!(matches!(err, ApiError::AdmissionBlocked { ref findings } if findings.len() == 1));
        assert!((consumed_of(&state, &limit.limit_id) - 8.0).abs() < QUANTITY_EPSILON);
        assert!(matches!(
            state.order_capacity_api.get_reservation("ORD-2"),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_warning_does_not_block() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Tortellini", 10.0);

        let outcome = state
            .order_capacity_api
            .reserve("ORD-1", pickup_date(), &[kg("Tortellini", 8.5)], false, "cassa")
            .unwrap();

        assert!(outcome.committed);
        assert!(outcome.admission.ok);
        assert_eq!(outcome.admission.warnings().count(), 1);
        assert!((consumed_of(&state, &limit.limit_id) - 8.5).abs() < QUANTITY_EPSILON);
        assert!((outcome.remaining[0].remaining - 1.5).abs() < QUANTITY_EPSILON);
    }

    #[test]
    fn test_grams_and_kilograms_are_equivalent() {
        let (_tmp, state) = setup_state();
        seed_product_limit(&state, "Tortellini", 1.0);

        let in_grams = state
            .limit_api
            .verify(
                pickup_date(),
                &[OrderLineItem::new("Tortellini", 1500.0, "g")],
                false,
            )
            .unwrap();
        let in_kg = state
            .limit_api
            .verify(pickup_date(), &[kg("Tortellini", 1.5)], false)
            .unwrap();
        assert_eq!(in_grams, in_kg);
        assert!(!in_kg.ok);
    }

    #[test]
    fn test_category_limit_aggregates_lines() {
        let (_tmp, state) = setup_state();
        let category = seed_category_limit(&state, "Pasta fresca", 5.0);

        let items = vec![
            kg("Tortellini", 3.0).with_category("Pasta fresca"),
            kg("Ravioli", 3.0).with_category("Pasta fresca"),
        ];
        let result = state.limit_api.verify(pickup_date(), &items, false).unwrap();
        assert!(!result.ok);
        let finding = result.blocking().next().unwrap();
        assert!((finding.requested - 6.0).abs() < QUANTITY_EPSILON);

        state
            .order_capacity_api
            .reserve("ORD-1", pickup_date(), &items[..1], false, "cassa")
            .unwrap();
        assert!((consumed_of(&state, &category.limit_id) - 3.0).abs() < QUANTITY_EPSILON);
    }

    // ==========================================
    // 订单修改与释放
    // ==========================================

    #[test]
    fn test_update_retracts_previous_quantity() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Lasagne", 10.0);

        state
            .order_capacity_api
            .reserve("ORD-1", pickup_date(), &[kg("Lasagne", 5.0)], false, "cassa")
            .unwrap();
        state
            .order_capacity_api
            .update("ORD-1", pickup_date(), &[kg("Lasagne", 2.0)], false, "cassa")
            .unwrap();

        assert!((consumed_of(&state, &limit.limit_id) - 2.0).abs() < QUANTITY_EPSILON);
        let stored = state.order_capacity_api.get_reservation("ORD-1").unwrap();
        assert_eq!(stored.items, vec![kg("Lasagne", 2.0)]);
    }

    #[test]
    fn test_blocked_update_keeps_prior_reservation() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Lasagne", 10.0);

        let api = &state.order_capacity_api;
        api.reserve("ORD-1", pickup_date(), &[kg("Lasagne", 5.0)], false, "cassa")
            .unwrap();
        api.reserve("ORD-2", pickup_date(), &[kg("Lasagne", 4.0)], false, "cassa")
            .unwrap();

        // 5 撤回后 4 + 7 > 10
        let err = api
            .update("ORD-1", pickup_date(), &[kg("Lasagne", 7.0)], false, "cassa")
            .unwrap_err();
        assert!(matches!(err, ApiError::AdmissionBlocked { .. }));

        assert!((consumed_of(&state, &limit.limit_id) - 9.0).abs() < QUANTITY_EPSILON);
        let stored = api.get_reservation("ORD-1").unwrap();
        assert_eq!(stored.items, vec![kg("Lasagne", 5.0)]);
    }

    #[test]
    fn test_update_moves_reservation_to_new_date() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Lasagne", 10.0);
        let next_day = pickup_date().succ_opt().unwrap();

        let api = &state.order_capacity_api;
        api.reserve("ORD-1", pickup_date(), &[kg("Lasagne", 5.0)], false, "cassa")
            .unwrap();
        api.update("ORD-1", next_day, &[kg("Lasagne", 5.0)], false, "cassa")
            .unwrap();

        assert!(consumed_of(&state, &limit.limit_id).abs() < QUANTITY_EPSILON);
        assert_eq!(api.get_reservation("ORD-1").unwrap().pickup_date, next_day);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Lasagne", 10.0);

        let api = &state.order_capacity_api;
        api.reserve("ORD-1", pickup_date(), &[kg("Lasagne", 4.0)], false, "cassa")
            .unwrap();

        assert!(api.release("ORD-1", "cassa").unwrap());
        assert!(!api.release("ORD-1", "cassa").unwrap());
        assert!(consumed_of(&state, &limit.limit_id).abs() < QUANTITY_EPSILON);
    }

    #[test]
    fn test_retraction_never_goes_negative() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Lasagne", 10.0);

        let api = &state.order_capacity_api;
        api.reserve("ORD-1", pickup_date(), &[kg("Lasagne", 4.0)], false, "cassa")
            .unwrap();

        // 记录被重建后，旧订单的撤回被截断为 0
        state.limit_api.delete_limit(&limit.limit_id, "admin").unwrap();
        let fresh = seed_product_limit(&state, "Lasagne", 10.0);
        assert!(api.release("ORD-1", "cassa").unwrap());
        assert!(consumed_of(&state, &fresh.limit_id).abs() < QUANTITY_EPSILON);
    }

    #[test]
    fn test_release_returns_quantity_to_originally_charged_record() {
        let (_tmp, state) = setup_state();
        let general = seed_product_limit(&state, "Tortellini", 10.0);

        let api = &state.order_capacity_api;
        api.reserve("ORD-1", pickup_date(), &[kg("Tortellini in brodo", 5.0)], false, "cassa")
            .unwrap();
        assert!((consumed_of(&state, &general.limit_id) - 5.0).abs() < QUANTITY_EPSILON);

        // 预占后新增更具体的记录，回退仍落在原记录上
        let specific = seed_product_limit(&state, "Tortellini in brodo", 10.0);
        assert!(api.release("ORD-1", "cassa").unwrap());

        assert!(consumed_of(&state, &general.limit_id).abs() < QUANTITY_EPSILON);
        assert!(consumed_of(&state, &specific.limit_id).abs() < QUANTITY_EPSILON);
    }

    #[test]
    fn test_update_after_more_specific_record_keeps_ledger_balanced() {
        let (_tmp, state) = setup_state();
        let general = seed_product_limit(&state, "Tortellini", 10.0);

        let api = &state.order_capacity_api;
        api.reserve("ORD-1", pickup_date(), &[kg("Tortellini in brodo", 5.0)], false, "cassa")
            .unwrap();
        let specific = seed_product_limit(&state, "Tortellini in brodo", 10.0);

        api.update("ORD-1", pickup_date(), &[kg("Tortellini in brodo", 2.0)], false, "cassa")
            .unwrap();
        assert!(consumed_of(&state, &general.limit_id).abs() < QUANTITY_EPSILON);
        assert!((consumed_of(&state, &specific.limit_id) - 2.0).abs() < QUANTITY_EPSILON);
    }

    #[test]
    fn test_release_after_deactivation_returns_quantity() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Tortellini", 10.0);

        let api = &state.order_capacity_api;
        api.reserve("ORD-1", pickup_date(), &[kg("Tortellini", 4.0)], false, "cassa")
            .unwrap();
        state
            .limit_api
            .update_limit(
                &limit.limit_id,
                LimitPatch {
                    active: Some(false),
                    ..Default::default()
                },
                "admin",
            )
            .unwrap();

        assert!(api.release("ORD-1", "cassa").unwrap());
        assert!(consumed_of(&state, &limit.limit_id).abs() < QUANTITY_EPSILON);
    }

    // ==========================================
    // 未配置产品 / 未启用记录 / 强制放行
    // ==========================================

    #[test]
    fn test_lazily_created_limit_covers_oversized_order() {
        let (_tmp, state) = setup_state();
        assert!(state.config.default_ceiling_kg < 60.0);

        let outcome = state
            .order_capacity_api
            .reserve("ORD-1", pickup_date(), &[kg("Lasagne", 60.0)], false, "cassa")
            .unwrap();
        assert!(outcome.committed);

        let created = find_limit(&state, "Lasagne").unwrap();
        assert!((created.ceiling - 60.0).abs() < QUANTITY_EPSILON);
        assert!((created.consumed - 60.0).abs() < QUANTITY_EPSILON);
        assert!(created.consumed <= created.ceiling);

        // 已满，后续订单被拦截
        let err = state
            .order_capacity_api
            .reserve("ORD-2", pickup_date(), &[kg("Lasagne", 1.0)], false, "cassa")
            .unwrap_err();
        assert!(matches!(err, ApiError::AdmissionBlocked { .. }));
    }

    #[test]
    fn test_unconfigured_product_is_lazily_created() {
        let (_tmp, state) = setup_state();

        let result = state
            .limit_api
            .verify(pickup_date(), &[kg("Panettone", 3.0)], false)
            .unwrap();
        assert!(result.ok);
        assert!(find_limit(&state, "Panettone").is_none());

        state
            .order_capacity_api
            .reserve("ORD-1", pickup_date(), &[kg("Panettone", 3.0)], false, "cassa")
            .unwrap();

        let created = find_limit(&state, "Panettone").unwrap();
        assert!((created.ceiling - state.config.default_ceiling_kg).abs() < QUANTITY_EPSILON);
        assert!((created.consumed - 3.0).abs() < QUANTITY_EPSILON);
        assert!(created.active);
    }

    #[test]
    fn test_inactive_limit_is_ignored() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Tortellini", 10.0);
        state
            .limit_api
            .update_limit(
                &limit.limit_id,
                LimitPatch {
                    active: Some(false),
                    ..Default::default()
                },
                "admin",
            )
            .unwrap();

        let outcome = state
            .order_capacity_api
            .reserve("ORD-1", pickup_date(), &[kg("Tortellini", 20.0)], false, "cassa")
            .unwrap();
        assert!(outcome.admission.ok);
        assert!(outcome.admission.findings.is_empty());

        // 未启用记录既不累加也不被惰性创建替代
        let limits = state.limit_api.list_limits(Some(pickup_date()), None).unwrap();
        assert_eq!(limits.len(), 1);
        assert!(limits[0].consumed.abs() < QUANTITY_EPSILON);
    }

    #[test]
    fn test_force_override_commits_past_ceiling_and_audits() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Tortellini", 10.0);

        let api = &state.order_capacity_api;
        api.reserve("ORD-1", pickup_date(), &[kg("Tortellini", 8.0)], false, "cassa")
            .unwrap();

        let forced = state
            .limit_api
            .verify(pickup_date(), &[kg("Tortellini", 5.0)], true)
            .unwrap();
        assert!(forced.ok);
        assert!(forced.overridden);

        let outcome = api
            .reserve("ORD-2", pickup_date(), &[kg("Tortellini", 5.0)], true, "responsabile")
            .unwrap();
        assert!(outcome.committed);
        assert!(outcome.admission.overridden);
        assert!((consumed_of(&state, &limit.limit_id) - 13.0).abs() < QUANTITY_EPSILON);
        assert!(api.get_reservation("ORD-2").unwrap().forced);

        let history = api.order_history("ORD-2").unwrap();
        assert!(history
            .iter()
            .any(|log| log.action_type == "CAPACITY_FORCE_OVERRIDE" && log.actor == "responsabile"));
    }

    #[test]
    fn test_direct_sale_consumes_capacity() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Tiramisu", 4.0);

        let outcome = state
            .limit_api
            .direct_sale(pickup_date(), kg("Tiramisu", 3.0), false, "banco")
            .unwrap();
        assert!((outcome.remaining[0].remaining - 1.0).abs() < QUANTITY_EPSILON);

        let err = state
            .limit_api
            .direct_sale(pickup_date(), kg("Tiramisu", 2.0), false, "banco")
            .unwrap_err();
        assert!(matches!(err, ApiError::AdmissionBlocked { .. }));
        assert!((consumed_of(&state, &limit.limit_id) - 3.0).abs() < QUANTITY_EPSILON);

        let audit = state.limit_api.recent_audit(None).unwrap();
        assert!(audit.iter().any(|log| log.action_type == "DIRECT_SALE"));
    }

    #[test]
    fn test_unit_change_rejected_while_reserved() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Tortellini", 10.0);
        state
            .order_capacity_api
            .reserve("ORD-1", pickup_date(), &[kg("Tortellini", 4.0)], false, "cassa")
            .unwrap();

        let unit_patch = || LimitPatch {
            unit: Some("pz".to_string()),
            ..Default::default()
        };
        let err = state
            .limit_api
            .update_limit(&limit.limit_id, unit_patch(), "admin")
            .unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));

        let current = find_limit(&state, "Tortellini").unwrap();
        assert_eq!(current.unit.as_str(), "kg");
        assert!((current.consumed - 4.0).abs() < QUANTITY_EPSILON);

        // 释放后允许改单位
        state.order_capacity_api.release("ORD-1", "cassa").unwrap();
        let updated = state
            .limit_api
            .update_limit(&limit.limit_id, unit_patch(), "admin")
            .unwrap();
        assert_eq!(updated.unit.as_str(), "pz");
    }

    #[test]
    fn test_duplicate_scope_rejected() {
        let (_tmp, state) = setup_state();
        seed_product_limit(&state, "Tortellini", 10.0);

        let err = state
            .limit_api
            .create_limit(
                order_capacity::domain::limit::NewProductionLimit {
                    date: Some(pickup_date()),
                    product: Some("  tortellini ".to_string()),
                    ceiling: Some(5.0),
                    ..Default::default()
                },
                "admin",
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
