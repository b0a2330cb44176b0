// ==========================================
// 订单产能管控 - 生产限额 API
// ==========================================
// 职责: 限额维护（新增/修改/删除/批量）、准入预检、直接销售、余量与审计查询
// 红线: 人工修改只触及上限/单位/启用/预警阈值，已预占只由台账调整
// ==========================================

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::admission::AdmissionResult;
use crate::domain::limit::{CapacityConstraint, LimitPatch, NewProductionLimit, ProductionLimit};
use crate::domain::order::OrderLineItem;
use crate::domain::types::{LimitStatus, LimitUnit, ScopeKind};
use crate::engine::override_gate::{OverrideGate, ReservationOutcome, ReserveContext};
use crate::repository::action_log_repo::ActionLogRepository;
use crate::repository::limit_repo::ProductionLimitRepository;

/// 审计查询默认条数
pub const DEFAULT_AUDIT_LIMIT: usize = 50;
const MAX_AUDIT_LIMIT: usize = 500;

/// 单条限额的余量视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitAvailability {
    pub limit_id: String,
    pub date: NaiveDate,
    pub scope_kind: ScopeKind,
    pub name: String,
    pub ceiling: f64,
    pub consumed: f64,
    /// max(ceiling - consumed, 0)
    pub available: f64,
    pub usage_pct: f64,
    pub unit: LimitUnit,
    pub status: LimitStatus,
}

impl From<&ProductionLimit> for LimitAvailability {
    fn from(limit: &ProductionLimit) -> Self {
        Self {
            limit_id: limit.limit_id.clone(),
            date: limit.date,
            scope_kind: limit.scope.kind(),
            name: limit.scope.key().to_string(),
            ceiling: limit.ceiling,
            consumed: limit.consumed,
            available: limit.remaining(),
            usage_pct: limit.usage_pct(),
            unit: limit.unit,
            status: limit.status(),
        }
    }
}

// ==========================================
// LimitApi - 生产限额 API
// ==========================================
pub struct LimitApi {
    limit_repo: Arc<ProductionLimitRepository>,
    action_log_repo: Arc<ActionLogRepository>,
    gate: Arc<OverrideGate>,
}

impl LimitApi {
    pub fn new(
        limit_repo: Arc<ProductionLimitRepository>,
        action_log_repo: Arc<ActionLogRepository>,
        gate: Arc<OverrideGate>,
    ) -> Self {
        Self {
            limit_repo,
            action_log_repo,
            gate,
        }
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 查询限额列表
    ///
    /// # 参数
    /// - date: 日期（可选）
    /// - active: 是否启用（可选）
    pub fn list_limits(
        &self,
        date: Option<NaiveDate>,
        active: Option<bool>,
    ) -> ApiResult<Vec<ProductionLimit>> {
        Ok(self.limit_repo.list(date, active)?)
    }

    /// 指定日期启用限额的余量
    pub fn availability(&self, date: NaiveDate) -> ApiResult<Vec<LimitAvailability>> {
        let limits = self.limit_repo.list(Some(date), Some(true))?;
        Ok(limits.iter().map(LimitAvailability::from).collect())
    }

    /// 最近的操作日志
    pub fn recent_audit(&self, limit: Option<usize>) -> ApiResult<Vec<ActionLog>> {
        let limit = limit.unwrap_or(DEFAULT_AUDIT_LIMIT).clamp(1, MAX_AUDIT_LIMIT);
        Ok(self.action_log_repo.list_recent(limit)?)
    }

    // ==========================================
    // 人工维护
    // ==========================================

    /// 新建限额
    ///
    /// # 错误
    /// - ValidationError: 范围同时/均未设置、缺少上限等
    /// - Conflict: 同一日期同一范围已有记录
    pub fn create_limit(&self, req: NewProductionLimit, actor: &str) -> ApiResult<ProductionLimit> {
        let limit = req.validate()?;
        self.limit_repo.insert(&limit)?;

        tracing::info!(
            limit_id = %limit.limit_id,
            pickup_date = %limit.date,
            scope = ?limit.scope,
            ceiling = limit.ceiling,
            actor,
            "新建生产限额"
        );
        self.audit(
            ActionLog::new(ActionType::LimitCreate, actor)
                .with_limit(&limit.limit_id)
                .with_pickup_date(limit.date)
                .with_payload(json!(limit)),
        );
        Ok(limit)
    }

    /// 修改限额（上限/单位/启用/预警阈值）
    pub fn update_limit(
        &self,
        limit_id: &str,
        patch: LimitPatch,
        actor: &str,
    ) -> ApiResult<ProductionLimit> {
        if patch.is_empty() {
            return Err(ApiError::InvalidInput("没有需要修改的字段".to_string()));
        }

        let mut limit = self
            .limit_repo
            .find_by_id(limit_id)?
            .ok_or_else(|| ApiError::NotFound(format!("生产限额(id={})不存在", limit_id)))?;
        let before = limit.clone();

        patch.apply_to(&mut limit)?;
        self.limit_repo.update_settings(&limit)?;

        tracing::info!(limit_id, actor, "修改生产限额");
        self.audit(
            ActionLog::new(ActionType::LimitUpdate, actor)
                .with_limit(limit_id)
                .with_pickup_date(limit.date)
                .with_payload(json!({ "before": before, "patch": patch })),
        );
        Ok(limit)
    }

    /// 删除限额
    pub fn delete_limit(&self, limit_id: &str, actor: &str) -> ApiResult<()> {
        let limit = self
            .limit_repo
            .find_by_id(limit_id)?
            .ok_or_else(|| ApiError::NotFound(format!("生产限额(id={})不存在", limit_id)))?;
        self.limit_repo.delete(limit_id)?;

        tracing::info!(limit_id, actor, "删除生产限额");
        self.audit(
            ActionLog::new(ActionType::LimitDelete, actor)
                .with_limit(limit_id)
                .with_pickup_date(limit.date)
                .with_payload(json!(limit)),
        );
        Ok(())
    }

    /// 批量新建（全部成功或全部失败）
    pub fn bulk_create(
        &self,
        reqs: Vec<NewProductionLimit>,
        actor: &str,
    ) -> ApiResult<Vec<ProductionLimit>> {
        if reqs.is_empty() {
            return Err(ApiError::InvalidInput("批量新建列表为空".to_string()));
        }

        let limits = reqs
            .iter()
            .enumerate()
            .map(|(idx, req)| {
                req.validate()
                    .map_err(|e| ApiError::ValidationError(format!("第{}条: {}", idx + 1, e)))
            })
            .collect::<ApiResult<Vec<_>>>()?;

        let count = self.limit_repo.insert_batch(&limits)?;

        tracing::info!(count, actor, "批量新建生产限额");
        let ids: Vec<&str> = limits.iter().map(|l| l.limit_id.as_str()).collect();
        self.audit(
            ActionLog::new(ActionType::LimitBulkCreate, actor)
                .with_payload(json!({ "count": count, "limit_ids": ids })),
        );
        Ok(limits)
    }

    // ==========================================
    // 准入
    // ==========================================

    /// 准入预检（只读）
    pub fn verify(
        &self,
        date: NaiveDate,
        items: &[OrderLineItem],
        force: bool,
    ) -> ApiResult<AdmissionResult> {
        Ok(self.gate.check_with_override(date, items, force)?)
    }

    /// 直接销售（非订单）：检查并预占
    ///
    /// # 错误
    /// - AdmissionBlocked: 超出限额且未强制放行
    pub fn direct_sale(
        &self,
        date: NaiveDate,
        item: OrderLineItem,
        force: bool,
        actor: &str,
    ) -> ApiResult<ReservationOutcome> {
        let outcome = self
            .gate
            .try_reserve(date, &[item], force, ReserveContext::new(actor))?;
        admitted(outcome)
    }

    /// 审计写入失败只记警告，不影响主操作
    fn audit(&self, log: ActionLog) {
        if let Err(e) = self.action_log_repo.insert(&log) {
            tracing::warn!(action_type = %log.action_type, error = %e, "写入操作日志失败");
        }
    }
}

/// 未写入台账的结果转为 AdmissionBlocked
pub(crate) fn admitted(outcome: ReservationOutcome) -> ApiResult<ReservationOutcome> {
    if outcome.committed {
        Ok(outcome)
    } else {
        Err(ApiError::AdmissionBlocked {
            findings: outcome.admission.findings,
        })
    }
}
