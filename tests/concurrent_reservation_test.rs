// ==========================================
// 并发预占测试
// ==========================================
// 职责: 验证并发预占不会超出上限（同连接与多连接两种场景）
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod concurrent_reservation_test {
    use std::sync::Arc;
    use std::thread;

    use order_capacity::api::ApiError;
    use order_capacity::app::AppState;
    use order_capacity::domain::QUANTITY_EPSILON;

    use crate::test_helpers::{
        consumed_of, create_test_db, kg, pickup_date, seed_product_limit, setup_state,
    };

    /// 各线程使用独立连接访问同一数据库文件
    #[test]
    fn test_separate_connections_never_exceed_ceiling() {
        const CEILING: f64 = 10.0;
        const THREADS: usize = 16;

        let (_tmp, db_path) = create_test_db().unwrap();
        let states: Vec<Arc<AppState>> = (0..THREADS)
            .map(|_| Arc::new(AppState::new(db_path.clone()).unwrap()))
            .collect();
        let limit = seed_product_limit(&states[0], "Tortellini", CEILING);

        let handles: Vec<_> = states
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, state)| {
                thread::spawn(move || {
                    state.order_capacity_api.reserve(
                        &format!("ORD-{}", i),
                        pickup_date(),
                        &[kg("Tortellini", 1.0)],
                        false,
                        "cassa",
                    )
                })
            })
            .collect();

        let mut committed = 0;
        let mut blocked = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(_) => committed += 1,
                Err(ApiError::AdmissionBlocked { .. }) => blocked += 1,
                Err(e) => panic!("意外错误: {}", e),
            }
        }

        assert_eq!(committed, 10);
        assert_eq!(blocked, THREADS - 10);
        assert!((consumed_of(&states[0], &limit.limit_id) - CEILING).abs() < QUANTITY_EPSILON);
    }

    /// 共享同一应用状态的并发请求
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_state_concurrent_reservations() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Lasagne", 10.0);

        let tasks = (0..8).map(|i| {
            let state = state.clone();
            tokio::task::spawn_blocking(move || {
                state.order_capacity_api.reserve(
                    &format!("ORD-{}", i),
                    pickup_date(),
                    &[kg("Lasagne", 2.5)],
                    false,
                    "cassa",
                )
            })
        });
        let results = futures::future::join_all(tasks).await;

        let committed = results
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(committed, 4);
        assert!((consumed_of(&state, &limit.limit_id) - 10.0).abs() < QUANTITY_EPSILON);
    }

    /// 并发修改同一订单：最终台账与最终预占记录一致
    #[test]
    fn test_concurrent_updates_keep_ledger_consistent() {
        let (_tmp, state) = setup_state();
        let limit = seed_product_limit(&state, "Lasagne", 10.0);
        state
            .order_capacity_api
            .reserve("ORD-1", pickup_date(), &[kg("Lasagne", 1.0)], false, "cassa")
            .unwrap();

        let handles: Vec<_> = (1..=6)
            .map(|q| {
                let state = state.clone();
                thread::spawn(move || {
                    state.order_capacity_api.update(
                        "ORD-1",
                        pickup_date(),
                        &[kg("Lasagne", q as f64)],
                        false,
                        "cassa",
                    )
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let stored = state.order_capacity_api.get_reservation("ORD-1").unwrap();
        let consumed = consumed_of(&state, &limit.limit_id);
        assert!((consumed - stored.items[0].quantity).abs() < QUANTITY_EPSILON);
    }
}
