// ==========================================
// 订单产能管控 - 产能台账
// ==========================================
// 职责: 订单提交后累加已预占；订单修改/删除前回退原有预占
// 红线: 已预占只能通过 SQL 层原子增减，不做应用层读改写
// 红线: 台账写入失败必须返回给调用方，不得吞掉
// ==========================================

use crate::config::capacity_config::CapacityConfig;
use crate::db::SharedConnection;
use crate::domain::limit::{LimitScope, ProductionLimit};
use crate::domain::order::{ChargedEntry, OrderLineItem};
use crate::domain::types::LimitUnit;
use crate::engine::admission::{AdmissionChecker, OrderDemand};
use crate::engine::error::CapacityResult;
use crate::repository::limit_repo::ProductionLimitRepository;
use crate::repository::tx::{run_write_tx, RetryPolicy, TxOutcome};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// 台账方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerSign {
    Commit,  // +1 订单提交
    Retract, // -1 回退
}

impl LedgerSign {
    pub fn factor(&self) -> f64 {
        match self {
            LedgerSign::Commit => 1.0,
            LedgerSign::Retract => -1.0,
        }
    }
}

/// 单条记录的调整
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub limit_id: String,
    pub delta: f64,
    /// 是否为惰性新建（或惰性键命中已有记录）
    pub lazily_created: bool,
}

/// 台账写入结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerReport {
    pub entries: Vec<LedgerEntry>,
    /// 未写入的需求名称（回退时无对应记录，或命中未启用记录）
    pub skipped: Vec<String>,
}

impl From<&LedgerEntry> for ChargedEntry {
    fn from(entry: &LedgerEntry) -> Self {
        ChargedEntry {
            limit_id: entry.limit_id.clone(),
            delta: entry.delta,
        }
    }
}

impl LedgerReport {
    pub fn touched_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.limit_id.as_str())
    }
}

// ==========================================
// CapacityLedger - 产能台账
// ==========================================
pub struct CapacityLedger {
    conn: SharedConnection,
    checker: Arc<AdmissionChecker>,
    default_ceiling_kg: f64,
    default_warn_threshold_pct: f64,
    retry: RetryPolicy,
}

impl CapacityLedger {
    pub fn new(conn: SharedConnection, checker: Arc<AdmissionChecker>, config: &CapacityConfig) -> Self {
        Self {
            conn,
            checker,
            default_ceiling_kg: config.default_ceiling_kg,
            default_warn_threshold_pct: config.default_warn_threshold_pct,
            retry: RetryPolicy::new(config.ledger_retry_attempts),
        }
    }

    /// 独立事务提交台账
    ///
    /// # 参数
    /// - date: 取货日期
    /// - items: 订单行
    /// - sign: Commit(+1) / Retract(-1)
    #[instrument(skip(self, date, items), fields(pickup_date = %date, sign = ?sign, items = items.len()))]
    pub fn commit(
        &self,
        date: NaiveDate,
        items: &[OrderLineItem],
        sign: LedgerSign,
    ) -> CapacityResult<LedgerReport> {
        let demand = self.checker.build_demand(items)?;
        if demand.is_empty() {
            return Ok(LedgerReport::default());
        }

        run_write_tx(&self.conn, &self.retry, "ledger_commit", |tx| {
            let report = self.apply_tx(tx, date, &demand, sign)?;
            Ok(TxOutcome::Commit(report))
        })
    }

    /// 事务内写入台账（调用方持有 IMMEDIATE 事务）
    ///
    /// 规则：
    /// 1) 需求按准入检查同样的规则分配到当日启用记录，按 sign 原子增减
    /// 2) Commit 时无记录承接的产品/品类需求惰性建档（单位 kg，上限取默认上限与本次需求的较大值）
    /// 3) Retract 时无记录承接的需求跳过（已预占不会小于 0）
    pub fn apply_tx(
        &self,
        conn: &Connection,
        date: NaiveDate,
        demand: &OrderDemand,
        sign: LedgerSign,
    ) -> CapacityResult<LedgerReport> {
        let mut report = LedgerReport::default();
        if demand.is_empty() {
            return Ok(report);
        }

        let records = ProductionLimitRepository::find_active_by_date_tx(conn, date)?;
        let allocation = self.checker.allocate(&records, demand);

        for rd in &allocation.per_record {
            let record = &records[rd.index];
            let delta = sign.factor() * rd.requested;
            if ProductionLimitRepository::adjust_consumed_tx(conn, &record.limit_id, delta)? {
                report.entries.push(LedgerEntry {
                    limit_id: record.limit_id.clone(),
                    delta,
                    lazily_created: false,
                });
            } else {
                report.skipped.push(record.scope.key().to_string());
            }
        }

        let unmatched = allocation
            .unmatched_products
            .iter()
            .map(|line| (LimitScope::Product(line.name.clone()), line.kg))
            .chain(
                allocation
                    .unmatched_categories
                    .iter()
                    .map(|line| (LimitScope::Category(line.name.clone()), line.kg)),
            );

        for (scope, kg) in unmatched {
            if sign == LedgerSign::Retract || kg <= 0.0 {
                tracing::debug!(scope = ?scope, kg, "无对应限额记录，跳过");
                report.skipped.push(scope.key().to_string());
                continue;
            }

            let template = ProductionLimit::new(
                date,
                scope,
                self.default_ceiling_kg.max(kg),
                LimitUnit::Kg,
                self.default_warn_threshold_pct,
            );
            match ProductionLimitRepository::upsert_consumed_tx(conn, &template, kg)? {
                Some(limit_id) => {
                    tracing::info!(
                        limit_id = %limit_id,
                        pickup_date = %date,
                        scope = ?template.scope,
                        ceiling = template.ceiling,
                        "惰性创建限额记录"
                    );
                    report.entries.push(LedgerEntry {
                        limit_id,
                        delta: kg,
                        lazily_created: true,
                    });
                }
                None => {
                    tracing::debug!(scope = ?template.scope, "命中未启用的限额记录，跳过");
                    report.skipped.push(template.scope.key().to_string());
                }
            }
        }

        Ok(report)
    }

    /// 事务内按提交时的扣减明细回退（调用方持有 IMMEDIATE 事务）
    ///
    /// 规则：
    /// 1) 按 limit_id 精确回退当时的扣减量，不重新匹配
    /// 2) 记录已删除时跳过；已停用的记录照常回退
    /// 3) 已预占不会小于 0
    pub fn release_tx(
        &self,
        conn: &Connection,
        charged: &[ChargedEntry],
    ) -> CapacityResult<LedgerReport> {
        let mut report = LedgerReport::default();
        for entry in charged {
            if entry.delta <= 0.0 {
                continue;
            }
            if ProductionLimitRepository::release_charged_tx(conn, &entry.limit_id, entry.delta)? {
                report.entries.push(LedgerEntry {
                    limit_id: entry.limit_id.clone(),
                    delta: -entry.delta,
                    lazily_created: false,
                });
            } else {
                tracing::debug!(limit_id = %entry.limit_id, "限额记录已删除，跳过回退");
                report.skipped.push(entry.limit_id.clone());
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::domain::limit::QUANTITY_EPSILON;
    use std::sync::Mutex;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 12, 24).unwrap()
    }

    fn setup() -> (ProductionLimitRepository, CapacityLedger) {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let shared = Arc::new(Mutex::new(conn));
        let config = CapacityConfig::default();
        let checker = Arc::new(AdmissionChecker::from_config(&config));
        (
            ProductionLimitRepository::new(shared.clone()),
            CapacityLedger::new(shared, checker, &config),
        )
    }

    #[test]
    fn test_commit_then_retract_is_exact() {
        let (repo, ledger) = setup();
        let limit = ProductionLimit::new(
            date(),
            LimitScope::Product("Tortellini".into()),
            10.0,
            LimitUnit::Kg,
            80.0,
        );
        repo.insert(&limit).unwrap();

        let items = vec![
            OrderLineItem::new("Tortellini", 0.1, "kg"),
            OrderLineItem::new("tortellini", 200.0, "g"),
        ];
        ledger.commit(date(), &items, LedgerSign::Commit).unwrap();
        let after = repo.find_by_id(&limit.limit_id).unwrap().unwrap();
        assert!((after.consumed - 0.3).abs() < QUANTITY_EPSILON);

        ledger.commit(date(), &items, LedgerSign::Retract).unwrap();
        let back = repo.find_by_id(&limit.limit_id).unwrap().unwrap();
        assert!(back.consumed.abs() < QUANTITY_EPSILON);
    }

    #[test]
    fn test_empty_items_is_noop() {
        let (_, ledger) = setup();
        let report = ledger.commit(date(), &[], LedgerSign::Commit).unwrap();
        assert_eq!(report, LedgerReport::default());
    }

    #[test]
    fn test_lazy_creation_on_commit_only() {
        let (repo, ledger) = setup();
        let items = vec![OrderLineItem::new("Lasagne", 4.0, "kg").with_category("Forno")];

        let retract = ledger.commit(date(), &items, LedgerSign::Retract).unwrap();
        assert!(retract.entries.is_empty());
        assert!(repo.list(Some(date()), None).unwrap().is_empty());

        let report = ledger.commit(date(), &items, LedgerSign::Commit).unwrap();
        assert_eq!(report.entries.len(), 2);
        assert!(report.entries.iter().all(|e| e.lazily_created));

        let limits = repo.list(Some(date()), None).unwrap();
        assert_eq!(limits.len(), 2);
        for limit in limits {
            assert_eq!(limit.ceiling, 50.0);
            assert_eq!(limit.consumed, 4.0);
        }
    }

    #[test]
    fn test_lazy_ceiling_covers_oversized_demand() {
        let (repo, ledger) = setup();
        let items = vec![OrderLineItem::new("Lasagne", 60.0, "kg")];

        ledger.commit(date(), &items, LedgerSign::Commit).unwrap();
        let limits = repo.list(Some(date()), None).unwrap();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].ceiling, 60.0);
        assert_eq!(limits[0].consumed, 60.0);
        assert!(limits[0].consumed <= limits[0].ceiling);
    }

    #[test]
    fn test_release_replays_charged_entries() {
        let (repo, ledger) = setup();
        let general = ProductionLimit::new(
            date(),
            LimitScope::Product("Tortellini".into()),
            10.0,
            LimitUnit::Kg,
            80.0,
        );
        repo.insert(&general).unwrap();

        let items = vec![OrderLineItem::new("Tortellini in brodo", 5.0, "kg")];
        let report = ledger.commit(date(), &items, LedgerSign::Commit).unwrap();
        let charged: Vec<ChargedEntry> = report.entries.iter().map(ChargedEntry::from).collect();
        assert_eq!(charged.len(), 1);
        assert_eq!(charged[0].limit_id, general.limit_id);

        // 回退前新增更具体的记录，回退仍落在原记录上
        let specific = ProductionLimit::new(
            date(),
            LimitScope::Product("Tortellini in brodo".into()),
            10.0,
            LimitUnit::Kg,
            80.0,
        );
        repo.insert(&specific).unwrap();

        let conn = ledger.conn.lock().unwrap();
        let released = ledger.release_tx(&conn, &charged).unwrap();
        drop(conn);
        assert_eq!(released.entries.len(), 1);

        let general_after = repo.find_by_id(&general.limit_id).unwrap().unwrap();
        let specific_after = repo.find_by_id(&specific.limit_id).unwrap().unwrap();
        assert!(general_after.consumed.abs() < QUANTITY_EPSILON);
        assert_eq!(specific_after.consumed, 0.0);
    }

    #[test]
    fn test_release_skips_deleted_record() {
        let (repo, ledger) = setup();
        let charged = vec![ChargedEntry {
            limit_id: "missing".into(),
            delta: 3.0,
        }];
        let conn = ledger.conn.lock().unwrap();
        let released = ledger.release_tx(&conn, &charged).unwrap();
        drop(conn);
        assert!(released.entries.is_empty());
        assert_eq!(released.skipped, vec!["missing".to_string()]);
        assert!(repo.list(None, None).unwrap().is_empty());
    }

    #[test]
    fn test_retract_clamps_at_zero() {
        let (repo, ledger) = setup();
        let limit = ProductionLimit::new(
            date(),
            LimitScope::Product("Tortellini".into()),
            10.0,
            LimitUnit::Kg,
            80.0,
        );
        repo.insert(&limit).unwrap();

        let items = vec![OrderLineItem::new("Tortellini", 3.0, "kg")];
        ledger.commit(date(), &items, LedgerSign::Retract).unwrap();
        let after = repo.find_by_id(&limit.limit_id).unwrap().unwrap();
        assert_eq!(after.consumed, 0.0);
    }
}
