// ==========================================
// 订单产能管控 - 准入检查引擎
// ==========================================
// 职责: 汇总订单需求（按产品/按品类），对照当日启用的限额记录分级
// 输入: 限额记录（调用方在事务内读取） + 订单行
// 输出: AdmissionResult（阻断/预警是结果值，不是错误）
// 红线: 本引擎无状态、不访问数据库；台账写入复用同一套汇总与匹配
// ==========================================

use crate::config::capacity_config::CapacityConfig;
use crate::domain::admission::{AdmissionResult, CapacityFinding, FindingSeverity};
use crate::domain::limit::{normalize_name, CapacityConstraint, ProductionLimit};
use crate::domain::order::OrderLineItem;
use crate::domain::types::ScopeKind;
use crate::engine::error::{CapacityError, CapacityResult};
use crate::engine::product_matcher::ProductMatcher;
use crate::engine::unit_normalizer::{LineUnit, UnitNormalizer};
use std::collections::BTreeMap;

/// 汇总后的单项需求（公斤）
#[derive(Debug, Clone, PartialEq)]
pub struct DemandLine {
    /// 首次出现时的原始名称（惰性建档时使用）
    pub name: String,
    pub kg: f64,
}

/// 订单需求：按产品、按品类汇总的公斤数
///
/// 键为规范化名称；BTreeMap 保证台账写入顺序稳定。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderDemand {
    pub products: BTreeMap<String, DemandLine>,
    pub categories: BTreeMap<String, DemandLine>,
}

impl OrderDemand {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.categories.is_empty()
    }

    fn add(map: &mut BTreeMap<String, DemandLine>, key: String, name: &str, kg: f64) {
        map.entry(key)
            .and_modify(|line| line.kg += kg)
            .or_insert_with(|| DemandLine {
                name: name.trim().to_string(),
                kg,
            });
    }
}

/// 单条限额记录分得的需求（记录单位）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordDemand {
    pub index: usize,
    pub requested: f64,
}

/// 需求分配结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    pub per_record: Vec<RecordDemand>,
    /// 没有任何记录承接的产品需求
    pub unmatched_products: Vec<DemandLine>,
    /// 没有任何记录承接的品类需求
    pub unmatched_categories: Vec<DemandLine>,
}

// ==========================================
// AdmissionChecker - 准入检查引擎
// ==========================================
pub struct AdmissionChecker {
    normalizer: UnitNormalizer,
    matcher: ProductMatcher,
    skip_list: Vec<String>,
    require_piece_ratio: bool,
}

impl AdmissionChecker {
    pub fn new(
        normalizer: UnitNormalizer,
        matcher: ProductMatcher,
        skip_list: Vec<String>,
        require_piece_ratio: bool,
    ) -> Self {
        let skip_list = skip_list
            .iter()
            .map(|s| normalize_name(s))
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            normalizer,
            matcher,
            skip_list,
            require_piece_ratio,
        }
    }

    pub fn from_config(config: &CapacityConfig) -> Self {
        Self::new(
            UnitNormalizer::new(&config.product_conversions),
            ProductMatcher::new(&config.product_aliases, config.fuzzy_product_match),
            config.composite_skip_list.clone(),
            config.require_piece_ratio,
        )
    }

    pub fn normalizer(&self) -> &UnitNormalizer {
        &self.normalizer
    }

    /// 组合/托盘伪行判定（显式标记，或名称包含/单位等于跳过关键字）
    pub fn is_composite(&self, item: &OrderLineItem) -> bool {
        if item.composite {
            return true;
        }
        let name = normalize_name(&item.name);
        let unit = normalize_name(&item.unit);
        self.skip_list
            .iter()
            .any(|kw| name.contains(kw.as_str()) || unit == *kw)
    }

    // ==========================================
    // 需求汇总
    // ==========================================

    /// 汇总订单行（跳过组合伪行，换算为公斤）
    ///
    /// # 错误
    /// - InvalidLineItem: 名称为空，或数量不是非负有限数
    /// - PieceRatioMissing: 开启 require_piece_ratio 且按件产品缺少换算
    pub fn build_demand(&self, items: &[OrderLineItem]) -> CapacityResult<OrderDemand> {
        let mut demand = OrderDemand::default();

        for item in items {
            if self.is_composite(item) {
                tracing::debug!(item = %item.name, unit = %item.unit, "跳过组合订单行");
                continue;
            }

            if item.name.trim().is_empty() {
                return Err(CapacityError::InvalidLineItem {
                    item: item.name.clone(),
                    reason: "产品名称为空".to_string(),
                });
            }
            if !item.quantity.is_finite() || item.quantity < 0.0 {
                return Err(CapacityError::InvalidLineItem {
                    item: item.name.clone(),
                    reason: format!("数量无效: {}", item.quantity),
                });
            }
            if self.require_piece_ratio
                && LineUnit::parse(&item.unit) == LineUnit::Piece
                && !self.normalizer.has_piece_ratio(&item.name)
            {
                return Err(CapacityError::PieceRatioMissing(item.name.clone()));
            }

            let kg = self
                .normalizer
                .normalize(item.quantity, &item.unit, &item.name)
                .kg;

            OrderDemand::add(
                &mut demand.products,
                self.matcher.canonical(&item.name),
                &item.name,
                kg,
            );

            if let Some(category) = item.category.as_deref().filter(|c| !c.trim().is_empty()) {
                OrderDemand::add(&mut demand.categories, normalize_name(category), category, kg);
            }
        }

        Ok(demand)
    }

    // ==========================================
    // 需求分配
    // ==========================================

    /// 把需求分配到限额记录
    ///
    /// 产品需求按 ProductMatcher 选记录；品类需求按归一化名称精确匹配。
    /// 分得的数量换算为记录单位。
    pub fn allocate(&self, records: &[ProductionLimit], demand: &OrderDemand) -> Allocation {
        let mut per_record_kg = vec![0.0_f64; records.len()];
        let mut allocation = Allocation::default();

        let product_records: Vec<(usize, &str)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.active)
            .filter_map(|(i, r)| r.scope.product().map(|p| (i, p)))
            .collect();
        let product_names: Vec<&str> = product_records.iter().map(|(_, name)| *name).collect();

        for (key, line) in &demand.products {
            match self.matcher.resolve(key, &product_names) {
                Some((pos, _)) => per_record_kg[product_records[pos].0] += line.kg,
                None => allocation.unmatched_products.push(line.clone()),
            }
        }

        for (key, line) in &demand.categories {
            let hit = records.iter().position(|r| {
                r.active && r.scope.kind() == ScopeKind::Category && r.scope.normalized_key() == *key
            });
            match hit {
                Some(index) => per_record_kg[index] += line.kg,
                None => allocation.unmatched_categories.push(line.clone()),
            }
        }

        allocation.per_record = per_record_kg
            .into_iter()
            .enumerate()
            .filter(|(_, kg)| *kg > 0.0)
            .map(|(index, kg)| {
                let record = &records[index];
                RecordDemand {
                    index,
                    requested: self
                        .normalizer
                        .from_kg(kg, record.unit, record.scope.product()),
                }
            })
            .collect();

        allocation
    }

    // ==========================================
    // 准入判定
    // ==========================================

    /// 对照限额记录判定（纯函数）
    pub fn evaluate(&self, records: &[ProductionLimit], demand: &OrderDemand) -> AdmissionResult {
        if !records.iter().any(|r| r.active) {
            return AdmissionResult::unconstrained();
        }

        let allocation = self.allocate(records, demand);
        let findings = allocation
            .per_record
            .iter()
            .filter_map(|rd| classify(&records[rd.index], rd.requested))
            .collect();

        AdmissionResult::from_findings(findings)
    }

    /// 汇总 + 判定
    pub fn check(
        &self,
        records: &[ProductionLimit],
        items: &[OrderLineItem],
    ) -> CapacityResult<AdmissionResult> {
        let demand = self.build_demand(items)?;
        Ok(self.evaluate(records, &demand))
    }
}

/// 单条记录分级
///
/// - consumed + requested > ceiling → 阻断
/// - consumed + requested ≥ 预警线 → 预警
fn classify(record: &ProductionLimit, requested: f64) -> Option<CapacityFinding> {
    let projected = record.consumed + requested;

    let severity = if !record.can_admit(requested) {
        FindingSeverity::Blocking
    } else if projected >= record.warn_level() {
        FindingSeverity::Warning
    } else {
        return None;
    };

    Some(CapacityFinding {
        limit_id: record.limit_id.clone(),
        scope_kind: record.scope.kind(),
        name: record.scope.key().to_string(),
        requested,
        available: record.available(),
        ceiling: record.ceiling,
        unit: record.unit,
        severity,
    })
}
