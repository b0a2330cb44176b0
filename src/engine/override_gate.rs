// ==========================================
// 订单产能管控 - 强制放行闸门 / 原子预占
// ==========================================
// 职责: 准入检查 + 台账提交合并为单个 IMMEDIATE 事务（try-reserve）
// 红线: 检查与预占之间不允许其他写事务插入
// 红线: 强制放行完全跳过检查，但必须在同一事务内写入审计记录
// 红线: 订单修改被阻断时，回退操作随事务一起撤销，台账保持原状
// ==========================================

use crate::config::capacity_config::CapacityConfig;
use crate::db::SharedConnection;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::admission::AdmissionResult;
use crate::domain::limit::CapacityConstraint;
use crate::domain::order::{ChargedEntry, OrderLineItem, OrderReservation};
use crate::domain::types::{LimitUnit, ScopeKind};
use crate::engine::admission::{AdmissionChecker, OrderDemand};
use crate::engine::error::{CapacityError, CapacityResult};
use crate::engine::ledger::{CapacityLedger, LedgerReport, LedgerSign};
use crate::repository::action_log_repo::ActionLogRepository;
use crate::repository::error::RepositoryError;
use crate::repository::limit_repo::ProductionLimitRepository;
use crate::repository::reservation_repo::OrderReservationRepository;
use crate::repository::tx::{run_write_tx, RetryPolicy, TxOutcome};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

/// 预占后单条记录的剩余量
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemainingCapacity {
    pub limit_id: String,
    pub scope_kind: ScopeKind,
    pub name: String,
    pub ceiling: f64,
    pub consumed: f64,
    /// ceiling - consumed（强制放行后可为负）
    pub remaining: f64,
    pub unit: LimitUnit,
}

/// 预占结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationOutcome {
    pub admission: AdmissionResult,
    /// 是否已写入台账
    pub committed: bool,
    pub ledger: LedgerReport,
    /// 本次涉及记录的剩余量（仅 committed 时填充）
    pub remaining: Vec<RemainingCapacity>,
}

impl ReservationOutcome {
    fn blocked(admission: AdmissionResult) -> Self {
        Self {
            admission,
            committed: false,
            ledger: LedgerReport::default(),
            remaining: Vec::new(),
        }
    }
}

/// 调用来源（审计用）
#[derive(Debug, Clone, Copy)]
pub struct ReserveContext<'a> {
    pub actor: &'a str,
    pub order_id: Option<&'a str>,
}

impl<'a> ReserveContext<'a> {
    pub fn new(actor: &'a str) -> Self {
        Self {
            actor,
            order_id: None,
        }
    }

    pub fn for_order(actor: &'a str, order_id: &'a str) -> Self {
        Self {
            actor,
            order_id: Some(order_id),
        }
    }
}

// ==========================================
// OverrideGate - 强制放行闸门
// ==========================================
pub struct OverrideGate {
    conn: SharedConnection,
    checker: Arc<AdmissionChecker>,
    ledger: CapacityLedger,
    retry: RetryPolicy,
}

impl OverrideGate {
    pub fn new(conn: SharedConnection, config: &CapacityConfig) -> Self {
        let checker = Arc::new(AdmissionChecker::from_config(config));
        let ledger = CapacityLedger::new(conn.clone(), checker.clone(), config);
        Self {
            conn,
            checker,
            ledger,
            retry: RetryPolicy::new(config.ledger_retry_attempts),
        }
    }

    pub fn checker(&self) -> &AdmissionChecker {
        &self.checker
    }

    pub fn ledger(&self) -> &CapacityLedger {
        &self.ledger
    }

    // ==========================================
    // 只读检查
    // ==========================================

    /// 准入检查（只读，不预占）
    #[instrument(skip(self, date, items), fields(pickup_date = %date, items = items.len()))]
    pub fn check(&self, date: NaiveDate, items: &[OrderLineItem]) -> CapacityResult<AdmissionResult> {
        let demand = self.checker.build_demand(items)?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let records = ProductionLimitRepository::find_active_by_date_tx(&conn, date)?;
        Ok(self.checker.evaluate(&records, &demand))
    }

    /// 带强制放行的准入检查
    ///
    /// force = true 时完全跳过检查（订单行仍需合法）。
    pub fn check_with_override(
        &self,
        date: NaiveDate,
        items: &[OrderLineItem],
        force: bool,
    ) -> CapacityResult<AdmissionResult> {
        if force {
            self.checker.build_demand(items)?;
            tracing::warn!(pickup_date = %date, "强制放行：跳过产能检查");
            return Ok(AdmissionResult::overridden());
        }
        self.check(date, items)
    }

    // ==========================================
    // 原子预占
    // ==========================================

    /// 检查并预占（单事务）
    ///
    /// 用于直接销售等不需要订单预占记录的场景。
    #[instrument(skip(self, date, items, ctx), fields(pickup_date = %date, actor = ctx.actor))]
    pub fn try_reserve(
        &self,
        date: NaiveDate,
        items: &[OrderLineItem],
        force: bool,
        ctx: ReserveContext<'_>,
    ) -> CapacityResult<ReservationOutcome> {
        let demand = self.checker.build_demand(items)?;

        run_write_tx(&self.conn, &self.retry, "try_reserve", |tx| {
            let outcome = self.admit_and_commit(tx, date, &demand, force)?;
            if !outcome.committed {
                return Ok(TxOutcome::Rollback(outcome));
            }
            if force {
                self.audit_override(tx, date, items, ctx)?;
            }
            if ctx.order_id.is_none() {
                let log = ActionLog::new(ActionType::DirectSale, ctx.actor)
                    .with_pickup_date(date)
                    .with_payload(json!({ "items": items, "forced": force }));
                ActionLogRepository::insert_tx(tx, &log)?;
            }
            Ok(TxOutcome::Commit(outcome))
        })
    }

    /// 订单首次预占
    ///
    /// # 错误
    /// - ReservationExists: 订单已有预占（应使用 update_order）
    #[instrument(skip(self, date, items), fields(pickup_date = %date))]
    pub fn reserve_order(
        &self,
        order_id: &str,
        date: NaiveDate,
        items: &[OrderLineItem],
        force: bool,
        actor: &str,
    ) -> CapacityResult<ReservationOutcome> {
        let demand = self.checker.build_demand(items)?;
        let ctx = ReserveContext::for_order(actor, order_id);

        run_write_tx(&self.conn, &self.retry, "reserve_order", |tx| {
            if OrderReservationRepository::find_tx(tx, order_id)?.is_some() {
                return Err(CapacityError::ReservationExists(order_id.to_string()));
            }
            self.reserve_in_tx(tx, date, items, &demand, force, ctx, None)
        })
    }

    /// 订单修改：回退原预占 → 重新检查 → 预占或整体回滚
    ///
    /// 订单没有预占记录时等同于 reserve_order。
    #[instrument(skip(self, date, items), fields(pickup_date = %date))]
    pub fn update_order(
        &self,
        order_id: &str,
        date: NaiveDate,
        items: &[OrderLineItem],
        force: bool,
        actor: &str,
    ) -> CapacityResult<ReservationOutcome> {
        let demand = self.checker.build_demand(items)?;
        let ctx = ReserveContext::for_order(actor, order_id);

        run_write_tx(&self.conn, &self.retry, "update_order", |tx| {
            let prior = OrderReservationRepository::find_tx(tx, order_id)?;

            if let Some(prior) = &prior {
                let retracted = self.retract_prior(tx, prior)?;
                tracing::debug!(
                    order_id,
                    prior_date = %prior.pickup_date,
                    entries = retracted.entries.len(),
                    "已回退原有预占"
                );
            }

            let result = self.reserve_in_tx(tx, date, items, &demand, force, ctx, prior.as_ref())?;
            if let TxOutcome::Rollback(outcome) = &result {
                tracing::info!(
                    order_id,
                    blocking = outcome.admission.blocking().count(),
                    "订单修改超出产能，保留原有预占"
                );
            }
            Ok(result)
        })
    }

    /// 订单释放（删除订单时调用）
    ///
    /// # 返回
    /// - Ok(true): 已回退并删除预占记录
    /// - Ok(false): 订单没有预占记录（幂等）
    #[instrument(skip(self))]
    pub fn release_order(&self, order_id: &str, actor: &str) -> CapacityResult<bool> {
        run_write_tx(&self.conn, &self.retry, "release_order", |tx| {
            let Some(prior) = OrderReservationRepository::find_tx(tx, order_id)? else {
                return Ok(TxOutcome::Rollback(false));
            };

            let report = self.retract_prior(tx, &prior)?;
            OrderReservationRepository::delete_tx(tx, order_id)?;

            let log = ActionLog::new(ActionType::OrderRelease, actor)
                .with_order(Some(order_id))
                .with_pickup_date(prior.pickup_date)
                .with_payload(json!({ "items": prior.items, "ledger": report }));
            ActionLogRepository::insert_tx(tx, &log)?;

            tracing::info!(order_id, pickup_date = %prior.pickup_date, "订单预占已释放");
            Ok(TxOutcome::Commit(true))
        })
    }

    // ==========================================
    // 事务内辅助
    // ==========================================

    /// 回退原有预占
    ///
    /// 有扣减明细时按 limit_id 精确回退；旧版记录按订单行重新分配后回退。
    fn retract_prior(
        &self,
        conn: &Connection,
        prior: &OrderReservation,
    ) -> CapacityResult<LedgerReport> {
        match &prior.charged {
            Some(charged) => self.ledger.release_tx(conn, charged),
            None => {
                let demand = self.checker.build_demand(&prior.items)?;
                self.ledger
                    .apply_tx(conn, prior.pickup_date, &demand, LedgerSign::Retract)
            }
        }
    }

    /// 检查（force 时跳过）+ 写台账
    fn admit_and_commit(
        &self,
        conn: &Connection,
        date: NaiveDate,
        demand: &OrderDemand,
        force: bool,
    ) -> CapacityResult<ReservationOutcome> {
        let admission = if force {
            AdmissionResult::overridden()
        } else {
            let records = ProductionLimitRepository::find_active_by_date_tx(conn, date)?;
            let result = self.checker.evaluate(&records, demand);
            if !result.ok {
                return Ok(ReservationOutcome::blocked(result));
            }
            result
        };

        let ledger = self.ledger.apply_tx(conn, date, demand, LedgerSign::Commit)?;
        let remaining = remaining_for(conn, &ledger)?;

        Ok(ReservationOutcome {
            admission,
            committed: true,
            ledger,
            remaining,
        })
    }

    /// 订单预占（事务内）：检查、写台账、写预占记录与审计
    #[allow(clippy::too_many_arguments)]
    fn reserve_in_tx(
        &self,
        conn: &Connection,
        date: NaiveDate,
        items: &[OrderLineItem],
        demand: &OrderDemand,
        force: bool,
        ctx: ReserveContext<'_>,
        prior: Option<&OrderReservation>,
    ) -> CapacityResult<TxOutcome<ReservationOutcome>> {
        let outcome = self.admit_and_commit(conn, date, demand, force)?;
        if !outcome.committed {
            return Ok(TxOutcome::Rollback(outcome));
        }

        let now = chrono::Local::now().naive_local();
        let order_id = ctx.order_id.unwrap_or_default();
        let reservation = OrderReservation {
            order_id: order_id.to_string(),
            pickup_date: date,
            items: items.to_vec(),
            charged: Some(outcome.ledger.entries.iter().map(ChargedEntry::from).collect()),
            forced: force,
            created_at: prior.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };
        OrderReservationRepository::upsert_tx(conn, &reservation)?;

        if force {
            self.audit_override(conn, date, items, ctx)?;
        }

        let action = if prior.is_some() {
            ActionType::OrderUpdate
        } else {
            ActionType::OrderReserve
        };
        let mut payload = json!({ "items": items, "forced": force, "ledger": outcome.ledger });
        if let Some(prior) = prior {
            payload["prior_pickup_date"] = json!(prior.pickup_date);
            payload["prior_items"] = json!(prior.items);
        }
        let log = ActionLog::new(action, ctx.actor)
            .with_order(ctx.order_id)
            .with_pickup_date(date)
            .with_payload(payload);
        ActionLogRepository::insert_tx(conn, &log)?;

        tracing::info!(
            order_id,
            pickup_date = %date,
            forced = force,
            warnings = outcome.admission.warnings().count(),
            "订单产能已预占"
        );
        Ok(TxOutcome::Commit(outcome))
    }

    fn audit_override(
        &self,
        conn: &Connection,
        date: NaiveDate,
        items: &[OrderLineItem],
        ctx: ReserveContext<'_>,
    ) -> CapacityResult<()> {
        let log = ActionLog::new(ActionType::ForceOverride, ctx.actor)
            .with_order(ctx.order_id)
            .with_pickup_date(date)
            .with_payload(json!({ "items": items }))
            .with_detail("强制放行，跳过产能检查");
        ActionLogRepository::insert_tx(conn, &log)?;

        tracing::warn!(
            order_id = ctx.order_id.unwrap_or("-"),
            actor = ctx.actor,
            pickup_date = %date,
            "强制放行已记录"
        );
        Ok(())
    }
}

/// 读取本次涉及记录的剩余量
fn remaining_for(conn: &Connection, report: &LedgerReport) -> CapacityResult<Vec<RemainingCapacity>> {
    let mut remaining = Vec::new();
    for limit_id in report.touched_ids() {
        if let Some(limit) = ProductionLimitRepository::find_by_id_tx(conn, limit_id)? {
            remaining.push(RemainingCapacity {
                limit_id: limit.limit_id.clone(),
                scope_kind: limit.scope.kind(),
                name: limit.scope.key().to_string(),
                ceiling: limit.ceiling,
                consumed: limit.consumed,
                remaining: limit.available(),
                unit: limit.unit,
            });
        }
    }
    Ok(remaining)
}
