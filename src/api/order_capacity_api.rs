// ==========================================
// 订单产能管控 - 订单产能 API
// ==========================================
// 职责: 供外部订单服务在订单新建/修改/删除时调用
// 约定: 订单服务先调用本接口预占成功，再持久化订单；
//       本接口返回错误时订单服务应放弃本次提交
// ==========================================

use std::sync::Arc;

use chrono::NaiveDate;

use crate::api::error::{ApiError, ApiResult};
use crate::api::limit_api::admitted;
use crate::domain::action_log::ActionLog;
use crate::domain::order::{OrderLineItem, OrderReservation};
use crate::engine::override_gate::{OverrideGate, ReservationOutcome};
use crate::repository::action_log_repo::ActionLogRepository;
use crate::repository::reservation_repo::OrderReservationRepository;

pub struct OrderCapacityApi {
    gate: Arc<OverrideGate>,
    reservation_repo: Arc<OrderReservationRepository>,
    action_log_repo: Arc<ActionLogRepository>,
}

impl OrderCapacityApi {
    pub fn new(
        gate: Arc<OverrideGate>,
        reservation_repo: Arc<OrderReservationRepository>,
        action_log_repo: Arc<ActionLogRepository>,
    ) -> Self {
        Self {
            gate,
            reservation_repo,
            action_log_repo,
        }
    }

    /// 新订单预占
    ///
    /// # 错误
    /// - AdmissionBlocked: 超出限额且未强制放行（台账未变）
    /// - Conflict: 订单已有预占
    pub fn reserve(
        &self,
        order_id: &str,
        date: NaiveDate,
        items: &[OrderLineItem],
        force: bool,
        actor: &str,
    ) -> ApiResult<ReservationOutcome> {
        let order_id = require_order_id(order_id)?;
        admitted(self.gate.reserve_order(order_id, date, items, force, actor)?)
    }

    /// 订单修改后重新预占
    ///
    /// 被阻断时原有预占保持不变。
    pub fn update(
        &self,
        order_id: &str,
        date: NaiveDate,
        items: &[OrderLineItem],
        force: bool,
        actor: &str,
    ) -> ApiResult<ReservationOutcome> {
        let order_id = require_order_id(order_id)?;
        admitted(self.gate.update_order(order_id, date, items, force, actor)?)
    }

    /// 订单删除时释放预占（幂等）
    pub fn release(&self, order_id: &str, actor: &str) -> ApiResult<bool> {
        let order_id = require_order_id(order_id)?;
        Ok(self.gate.release_order(order_id, actor)?)
    }

    /// 查询订单当前预占
    pub fn get_reservation(&self, order_id: &str) -> ApiResult<OrderReservation> {
        let order_id = require_order_id(order_id)?;
        self.reservation_repo
            .find(order_id)?
            .ok_or_else(|| ApiError::NotFound(format!("订单预占(order_id={})不存在", order_id)))
    }

    /// 订单的操作日志
    pub fn order_history(&self, order_id: &str) -> ApiResult<Vec<ActionLog>> {
        let order_id = require_order_id(order_id)?;
        Ok(self.action_log_repo.list_by_order(order_id)?)
    }
}

fn require_order_id(order_id: &str) -> ApiResult<&str> {
    let trimmed = order_id.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidInput("订单ID不能为空".to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::capacity_config::CapacityConfig;
    use crate::db::init_schema;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn api() -> OrderCapacityApi {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let shared = Arc::new(Mutex::new(conn));
        OrderCapacityApi::new(
            Arc::new(OverrideGate::new(shared.clone(), &CapacityConfig::default())),
            Arc::new(OrderReservationRepository::new(shared.clone())),
            Arc::new(ActionLogRepository::new(shared)),
        )
    }

    #[test]
    fn test_blank_order_id_rejected() {
        let api = api();
        let date = NaiveDate::from_ymd_opt(2026, 12, 24).unwrap();
        assert!(matches!(
            api.reserve("  ", date, &[], false, "cassa"),
            Err(ApiError::InvalidInput(_))
        ));
        assert!(matches!(api.release("", "cassa"), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_reservation_lifecycle() {
        let api = api();
        let date = NaiveDate::from_ymd_opt(2026, 12, 24).unwrap();
        let items = vec![OrderLineItem::new("Lasagne", 3.0, "kg")];

        api.reserve("ORD-7", date, &items, false, "cassa").unwrap();
        let stored = api.get_reservation("ORD-7").unwrap();
        assert_eq!(stored.items, items);
        assert!(!stored.forced);

        assert!(api.release("ORD-7", "cassa").unwrap());
        assert!(matches!(
            api.get_reservation("ORD-7"),
            Err(ApiError::NotFound(_))
        ));
        assert_eq!(api.order_history("ORD-7").unwrap().len(), 2);
    }
}
