// ==========================================
// 订单产能管控 - 生产限额领域模型
// ==========================================
// 职责: 每日生产限额记录（按产品或按品类）
// 红线: 范围互斥，产品与品类必须且只能设置其一
// ==========================================

use crate::domain::types::{LimitStatus, LimitUnit, ScopeKind};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 数量比较/回退的容差
///
/// 台账写入时按 6 位小数取整，预占后再回退的结果与原值之差不超过该值。
pub const QUANTITY_EPSILON: f64 = 1e-6;

/// 默认预警阈值（百分比）
pub const DEFAULT_WARN_THRESHOLD_PCT: f64 = 80.0;

// ==========================================
// LimitScope - 限额范围
// ==========================================
// 用枚举表达互斥：不存在"两者都有"或"两者都无"的状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitScope {
    Product(String),
    Category(String),
}

impl LimitScope {
    /// 由对外接口的两个可选字段构造范围
    ///
    /// 空白字符串视为未设置。
    pub fn from_parts(
        product: Option<&str>,
        category: Option<&str>,
    ) -> Result<Self, LimitValidationError> {
        let product = product.map(str::trim).filter(|s| !s.is_empty());
        let category = category.map(str::trim).filter(|s| !s.is_empty());

        match (product, category) {
            (Some(_), Some(_)) => Err(LimitValidationError::ScopeBothSet),
            (None, None) => Err(LimitValidationError::ScopeMissing),
            (Some(p), None) => Ok(LimitScope::Product(p.to_string())),
            (None, Some(c)) => Ok(LimitScope::Category(c.to_string())),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            LimitScope::Product(_) => ScopeKind::Product,
            LimitScope::Category(_) => ScopeKind::Category,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            LimitScope::Product(k) | LimitScope::Category(k) => k,
        }
    }

    /// 唯一键使用的归一化名称
    pub fn normalized_key(&self) -> String {
        normalize_name(self.key())
    }

    pub fn product(&self) -> Option<&str> {
        match self {
            LimitScope::Product(k) => Some(k),
            LimitScope::Category(_) => None,
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            LimitScope::Category(k) => Some(k),
            LimitScope::Product(_) => None,
        }
    }
}

/// 名称归一化：去首尾空白、压缩内部空白、小写
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ==========================================
// ProductionLimit - 生产限额记录
// ==========================================
// 唯一键: (date, scope_kind, normalized scope key)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionLimit {
    pub limit_id: String,
    pub date: NaiveDate,
    pub scope: LimitScope,
    pub ceiling: f64,             // 上限（单位 = unit）
    pub unit: LimitUnit,
    pub consumed: f64,            // 已预占（单位 = unit），只由台账调整
    pub active: bool,
    pub warn_threshold_pct: f64,  // 0-100
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ProductionLimit {
    /// 创建新的限额记录（已预占为 0）
    pub fn new(
        date: NaiveDate,
        scope: LimitScope,
        ceiling: f64,
        unit: LimitUnit,
        warn_threshold_pct: f64,
    ) -> Self {
        let now = chrono::Local::now().naive_local();
        Self {
            limit_id: uuid::Uuid::new_v4().to_string(),
            date,
            scope,
            ceiling,
            unit,
            consumed: 0.0,
            active: true,
            warn_threshold_pct,
            created_at: now,
            updated_at: now,
        }
    }

    /// 预警线（绝对数量）
    pub fn warn_level(&self) -> f64 {
        self.ceiling * self.warn_threshold_pct / 100.0
    }

    /// 使用率（百分比），上限为 0 时按 0 计
    pub fn usage_pct(&self) -> f64 {
        if self.ceiling <= 0.0 {
            return 0.0;
        }
        self.consumed / self.ceiling * 100.0
    }

    /// 当前状态（只看已预占，不含新的请求）
    pub fn status(&self) -> LimitStatus {
        if self.is_overflow() {
            LimitStatus::Exceeded
        } else if self.consumed > 0.0 && self.consumed >= self.warn_level() {
            LimitStatus::Warning
        } else {
            LimitStatus::Ok
        }
    }
}

// ==========================================
// Trait: CapacityConstraint
// ==========================================
// 用途: 准入检查的约束接口
pub trait CapacityConstraint {
    /// 检查是否可追加数量
    fn can_admit(&self, quantity: f64) -> bool;

    /// 检查是否超限
    fn is_overflow(&self) -> bool;

    /// 剩余可用量（可为负：强制放行后超限）
    fn available(&self) -> f64;

    /// 剩余可用量（不小于 0）
    fn remaining(&self) -> f64;
}

impl CapacityConstraint for ProductionLimit {
    fn can_admit(&self, quantity: f64) -> bool {
        self.consumed + quantity <= self.ceiling + QUANTITY_EPSILON
    }

    fn is_overflow(&self) -> bool {
        self.consumed > self.ceiling + QUANTITY_EPSILON
    }

    fn available(&self) -> f64 {
        self.ceiling - self.consumed
    }

    fn remaining(&self) -> f64 {
        self.available().max(0.0)
    }
}

// ==========================================
// NewProductionLimit - 新建限额请求
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProductionLimit {
    pub date: Option<NaiveDate>,
    pub product: Option<String>,
    pub category: Option<String>,
    pub ceiling: Option<f64>,
    pub unit: Option<String>,
    pub warn_threshold_pct: Option<f64>,
}

impl NewProductionLimit {
    /// 校验并构造限额记录
    pub fn validate(&self) -> Result<ProductionLimit, LimitValidationError> {
        let date = self.date.ok_or(LimitValidationError::DateMissing)?;
        let scope = LimitScope::from_parts(self.product.as_deref(), self.category.as_deref())?;
        let ceiling = self.ceiling.ok_or(LimitValidationError::CeilingMissing)?;
        validate_ceiling(ceiling)?;

        let unit = match self.unit.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => LimitUnit::parse(raw)
                .ok_or_else(|| LimitValidationError::UnknownUnit(raw.to_string()))?,
            None => LimitUnit::Kg,
        };

        let warn = self.warn_threshold_pct.unwrap_or(DEFAULT_WARN_THRESHOLD_PCT);
        validate_threshold(warn)?;

        Ok(ProductionLimit::new(date, scope, ceiling, unit, warn))
    }
}

// ==========================================
// LimitPatch - 人工修改限额
// ==========================================
// 只允许修改上限/单位/启用/预警阈值；已预占只由台账调整
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitPatch {
    pub ceiling: Option<f64>,
    pub unit: Option<String>,
    pub active: Option<bool>,
    pub warn_threshold_pct: Option<f64>,
}

impl LimitPatch {
    pub fn is_empty(&self) -> bool {
        self.ceiling.is_none()
            && self.unit.is_none()
            && self.active.is_none()
            && self.warn_threshold_pct.is_none()
    }

    /// 校验并应用到已有记录
    pub fn apply_to(&self, limit: &mut ProductionLimit) -> Result<(), LimitValidationError> {
        if let Some(ceiling) = self.ceiling {
            validate_ceiling(ceiling)?;
            limit.ceiling = ceiling;
        }
        if let Some(raw) = self.unit.as_deref() {
            let unit = LimitUnit::parse(raw)
                .ok_or_else(|| LimitValidationError::UnknownUnit(raw.to_string()))?;
            // 已预占按原单位记账，换单位会使其失真
            if unit != limit.unit && limit.consumed > QUANTITY_EPSILON {
                return Err(LimitValidationError::UnitChangeWithConsumption {
                    from: limit.unit,
                    to: unit,
                    consumed: limit.consumed,
                });
            }
            limit.unit = unit;
        }
        if let Some(active) = self.active {
            limit.active = active;
        }
        if let Some(pct) = self.warn_threshold_pct {
            validate_threshold(pct)?;
            limit.warn_threshold_pct = pct;
        }
        limit.updated_at = chrono::Local::now().naive_local();
        Ok(())
    }
}

fn validate_ceiling(ceiling: f64) -> Result<(), LimitValidationError> {
    if !ceiling.is_finite() || ceiling < 0.0 {
        return Err(LimitValidationError::InvalidCeiling(ceiling));
    }
    Ok(())
}

fn validate_threshold(pct: f64) -> Result<(), LimitValidationError> {
    if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
        return Err(LimitValidationError::InvalidThreshold(pct));
    }
    Ok(())
}

// ==========================================
// LimitValidationError - 限额校验错误
// ==========================================
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LimitValidationError {
    #[error("不能同时指定产品和品类")]
    ScopeBothSet,

    #[error("必须指定产品或品类")]
    ScopeMissing,

    #[error("缺少日期")]
    DateMissing,

    #[error("缺少限额数量")]
    CeilingMissing,

    #[error("限额数量无效: {0}")]
    InvalidCeiling(f64),

    #[error("预警阈值必须在 0-100 之间: {0}")]
    InvalidThreshold(f64),

    #[error("未知单位: {0}")]
    UnknownUnit(String),

    #[error("已有预占 {consumed} {from}，不能改为 {to}")]
    UnitChangeWithConsumption {
        from: LimitUnit,
        to: LimitUnit,
        consumed: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 12, 24).unwrap()
    }

    #[test]
    fn test_scope_requires_exactly_one_side() {
        assert_eq!(
            LimitScope::from_parts(Some("Ravioli"), Some("Pasta fresca")),
            Err(LimitValidationError::ScopeBothSet)
        );
        assert_eq!(
            LimitScope::from_parts(None, None),
            Err(LimitValidationError::ScopeMissing)
        );
        // 空白视为未设置
        assert_eq!(
            LimitScope::from_parts(Some("  "), None),
            Err(LimitValidationError::ScopeMissing)
        );
        assert_eq!(
            LimitScope::from_parts(Some(" Ravioli "), Some("")),
            Ok(LimitScope::Product("Ravioli".to_string()))
        );
    }

    #[test]
    fn test_new_limit_validation() {
        let req = NewProductionLimit {
            date: Some(date()),
            category: Some("Dolci".to_string()),
            ceiling: Some(30.0),
            ..Default::default()
        };
        let limit = req.validate().unwrap();
        assert_eq!(limit.scope, LimitScope::Category("Dolci".to_string()));
        assert_eq!(limit.unit, LimitUnit::Kg);
        assert_eq!(limit.consumed, 0.0);
        assert_eq!(limit.warn_threshold_pct, DEFAULT_WARN_THRESHOLD_PCT);
        assert!(limit.active);

        let missing_ceiling = NewProductionLimit {
            ceiling: None,
            ..req.clone()
        };
        assert_eq!(
            missing_ceiling.validate(),
            Err(LimitValidationError::CeilingMissing)
        );

        let negative = NewProductionLimit {
            ceiling: Some(-1.0),
            ..req.clone()
        };
        assert!(matches!(
            negative.validate(),
            Err(LimitValidationError::InvalidCeiling(_))
        ));

        let bad_pct = NewProductionLimit {
            warn_threshold_pct: Some(120.0),
            ..req
        };
        assert!(matches!(
            bad_pct.validate(),
            Err(LimitValidationError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_capacity_constraint() {
        let mut limit = ProductionLimit::new(
            date(),
            LimitScope::Product("Tortellini".to_string()),
            10.0,
            LimitUnit::Kg,
            80.0,
        );
        limit.consumed = 8.0;

        assert!(limit.can_admit(2.0));
        assert!(!limit.can_admit(3.0));
        assert_eq!(limit.available(), 2.0);
        assert_eq!(limit.status(), LimitStatus::Warning);

        limit.consumed = 12.0;
        assert!(limit.is_overflow());
        assert_eq!(limit.remaining(), 0.0);
        assert_eq!(limit.available(), -2.0);
        assert_eq!(limit.status(), LimitStatus::Exceeded);
    }

    #[test]
    fn test_patch_keeps_consumed() {
        let mut limit = ProductionLimit::new(
            date(),
            LimitScope::Product("Tortellini".to_string()),
            10.0,
            LimitUnit::Kg,
            80.0,
        );
        limit.consumed = 4.0;

        let patch = LimitPatch {
            ceiling: Some(20.0),
            active: Some(false),
            ..Default::default()
        };
        patch.apply_to(&mut limit).unwrap();

        assert_eq!(limit.ceiling, 20.0);
        assert!(!limit.active);
        assert_eq!(limit.consumed, 4.0);
    }

    #[test]
    fn test_patch_rejects_unit_change_with_consumption() {
        let mut limit = ProductionLimit::new(
            date(),
            LimitScope::Product("Tortellini".to_string()),
            10.0,
            LimitUnit::Kg,
            80.0,
        );
        limit.consumed = 4.0;

        let patch = LimitPatch {
            unit: Some("pezzi".to_string()),
            ..Default::default()
        };
        let err = patch.apply_to(&mut limit).unwrap_err();
        assert!(matches!(
            err,
            LimitValidationError::UnitChangeWithConsumption { consumed, .. } if consumed == 4.0
        ));
        assert_eq!(limit.unit, LimitUnit::Kg);

        // 同单位或尚无预占时允许
        let same = LimitPatch {
            unit: Some("kg".to_string()),
            ..Default::default()
        };
        same.apply_to(&mut limit).unwrap();

        limit.consumed = 0.0;
        patch.apply_to(&mut limit).unwrap();
        assert_eq!(limit.unit, LimitUnit::Piece);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Ravioli   di  Magro "), "ravioli di magro");
    }
}
