// ==========================================
// 订单产能管控 - 单位换算引擎
// ==========================================
// 职责: 把订单行的 (数量, 单位) 统一换算为公斤
// 红线: 未知单位不拒单（按原值通过），但必须留下可观测信号
// ==========================================

use crate::config::capacity_config::ProductConversion;
use crate::domain::limit::normalize_name;
use crate::domain::types::LimitUnit;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// 订单行单位
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineUnit {
    Kg,
    Gram,
    Piece,
    Currency,
    Unknown(String),
}

impl LineUnit {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "kg" | "kilo" | "chilo" | "chilogrammi" => LineUnit::Kg,
            "g" | "gr" | "gram" | "grammi" | "grammo" => LineUnit::Gram,
            "piece" | "pz" | "pezzo" | "pezzi" => LineUnit::Piece,
            "currency" | "€" | "eur" | "euro" => LineUnit::Currency,
            other => LineUnit::Unknown(other.to_string()),
        }
    }
}

/// 按原值通过的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThroughReason {
    /// 按件销售，未配置每公斤件数
    MissingPieceRatio,
    /// 按金额销售，未配置每公斤价格
    MissingPriceRatio,
    /// 无法识别的单位
    UnknownUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeOutcome {
    Converted,
    PassThrough(PassThroughReason),
}

/// 换算结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedQuantity {
    pub kg: f64,
    pub outcome: NormalizeOutcome,
}

impl NormalizedQuantity {
    fn converted(kg: f64) -> Self {
        Self {
            kg,
            outcome: NormalizeOutcome::Converted,
        }
    }

    fn pass_through(kg: f64, reason: PassThroughReason) -> Self {
        Self {
            kg,
            outcome: NormalizeOutcome::PassThrough(reason),
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self.outcome, NormalizeOutcome::PassThrough(_))
    }
}

// ==========================================
// UnitNormalizer - 单位换算引擎
// ==========================================
pub struct UnitNormalizer {
    conversions: HashMap<String, ProductConversion>,
    pass_through_count: AtomicU64,
}

impl UnitNormalizer {
    /// # 参数
    /// - conversions: 产品名 → 换算参数（产品名大小写不敏感）
    pub fn new(conversions: &HashMap<String, ProductConversion>) -> Self {
        let conversions = conversions
            .iter()
            .map(|(name, conv)| (normalize_name(name), conv.clone()))
            .collect();
        Self {
            conversions,
            pass_through_count: AtomicU64::new(0),
        }
    }

    /// 换算为公斤
    ///
    /// 规则：
    /// - kg → 原值
    /// - g → /1000
    /// - 件 → /每公斤件数；未配置时按原值通过
    /// - 金额 → /每公斤价格；未配置时按原值通过
    /// - 未知单位 → 按原值通过
    pub fn normalize(&self, quantity: f64, unit: &str, product: &str) -> NormalizedQuantity {
        let result = match LineUnit::parse(unit) {
            LineUnit::Kg => NormalizedQuantity::converted(quantity),
            LineUnit::Gram => NormalizedQuantity::converted(quantity / 1000.0),
            LineUnit::Piece => match self.pieces_per_kg(product) {
                Some(ratio) => NormalizedQuantity::converted(quantity / ratio),
                None => NormalizedQuantity::pass_through(
                    quantity,
                    PassThroughReason::MissingPieceRatio,
                ),
            },
            LineUnit::Currency => match self.price_per_kg(product) {
                Some(price) => NormalizedQuantity::converted(quantity / price),
                None => NormalizedQuantity::pass_through(
                    quantity,
                    PassThroughReason::MissingPriceRatio,
                ),
            },
            LineUnit::Unknown(_) => {
                NormalizedQuantity::pass_through(quantity, PassThroughReason::UnknownUnit)
            }
        };

        if let NormalizeOutcome::PassThrough(reason) = result.outcome {
            self.pass_through_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: "unit_normalizer",
                product,
                unit,
                quantity,
                reason = ?reason,
                "单位无法换算为公斤，按原值计入"
            );
        }

        result
    }

    /// 公斤 → 限额记录的展示单位
    pub fn from_kg(&self, kg: f64, unit: LimitUnit, product: Option<&str>) -> f64 {
        match unit {
            LimitUnit::Kg | LimitUnit::Liter => kg,
            LimitUnit::Gram => kg * 1000.0,
            LimitUnit::Piece => product
                .and_then(|p| self.pieces_per_kg(p))
                .map(|ratio| kg * ratio)
                .unwrap_or(kg),
        }
    }

    /// 累计按原值通过的次数（可观测信号）
    pub fn pass_through_count(&self) -> u64 {
        self.pass_through_count.load(Ordering::Relaxed)
    }

    pub fn has_piece_ratio(&self, product: &str) -> bool {
        self.pieces_per_kg(product).is_some()
    }

    fn pieces_per_kg(&self, product: &str) -> Option<f64> {
        self.conversions
            .get(&normalize_name(product))
            .and_then(|c| c.pieces_per_kg)
            .filter(|r| r.is_finite() && *r > 0.0)
    }

    fn price_per_kg(&self, product: &str) -> Option<f64> {
        self.conversions
            .get(&normalize_name(product))
            .and_then(|c| c.price_per_kg)
            .filter(|r| r.is_finite() && *r > 0.0)
    }
}
