// ==========================================
// 订单产能管控 - 产能配置快照
// ==========================================
// 存储: config_kv 表 (scope_id='global')
// 由 ConfigManager 加载；缺失或格式错误的项使用默认值
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 单个产品的换算参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductConversion {
    /// 每公斤件数（件 → 公斤）
    pub pieces_per_kg: Option<f64>,
    /// 每公斤价格（金额 → 公斤）
    pub price_per_kg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// 惰性创建限额时的默认上限（公斤）
    pub default_ceiling_kg: f64,
    /// 默认预警阈值（百分比）
    pub default_warn_threshold_pct: f64,
    /// 精确/别名匹配失败时是否回退到子串匹配
    pub fuzzy_product_match: bool,
    /// 按件销售但未配置每公斤件数的产品是否拒绝
    pub require_piece_ratio: bool,
    /// 组合/托盘伪行关键字（名称包含或单位等于即跳过）
    pub composite_skip_list: Vec<String>,
    /// 产品 → 换算参数
    pub product_conversions: HashMap<String, ProductConversion>,
    /// 产品 → 可接受的别名
    pub product_aliases: HashMap<String, Vec<String>>,
    /// 台账写入遇到数据库繁忙时的尝试次数
    pub ledger_retry_attempts: u32,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            default_ceiling_kg: 50.0,
            default_warn_threshold_pct: 80.0,
            fuzzy_product_match: true,
            require_piece_ratio: false,
            composite_skip_list: vec![
                "vassoio".to_string(),
                "tray".to_string(),
                "composizione".to_string(),
            ],
            product_conversions: HashMap::new(),
            product_aliases: HashMap::new(),
            ledger_retry_attempts: 3,
        }
    }
}
