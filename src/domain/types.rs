// ==========================================
// 订单产能管控 - 领域类型定义
// ==========================================
// 职责: 限额单位、限额范围类型、限额状态
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 限额单位 (Limit Unit)
// ==========================================
// 限额的展示单位；内部比较统一换算为公斤
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitUnit {
    #[default]
    Kg,    // 公斤（默认）
    Piece, // 件
    Gram,  // 克
    Liter, // 升
}

impl LimitUnit {
    /// 数据库存储值
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitUnit::Kg => "kg",
            LimitUnit::Piece => "pz",
            LimitUnit::Gram => "g",
            LimitUnit::Liter => "l",
        }
    }

    /// 解析单位文本（大小写不敏感，兼容意大利语写法）
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "kg" | "kilo" | "chilo" | "chilogrammi" => Some(LimitUnit::Kg),
            "pz" | "piece" | "pezzo" | "pezzi" => Some(LimitUnit::Piece),
            "g" | "gr" | "gram" | "grammi" | "grammo" => Some(LimitUnit::Gram),
            "l" | "lt" | "liter" | "litro" | "litri" => Some(LimitUnit::Liter),
            _ => None,
        }
    }
}

impl fmt::Display for LimitUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 限额范围类型 (Scope Kind)
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeKind {
    Product,  // 按产品
    Category, // 按品类
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Product => "PRODUCT",
            ScopeKind::Category => "CATEGORY",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PRODUCT" => Some(ScopeKind::Product),
            "CATEGORY" => Some(ScopeKind::Category),
            _ => None,
        }
    }

    /// 对外接口中的名称（prodotto / categoria）
    pub fn wire_name(&self) -> &'static str {
        match self {
            ScopeKind::Product => "prodotto",
            ScopeKind::Category => "categoria",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 限额状态 (Limit Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ATTENZIONE")]
    Warning,
    #[serde(rename = "SUPERATO")]
    Exceeded,
}

impl fmt::Display for LimitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitStatus::Ok => write!(f, "OK"),
            LimitStatus::Warning => write!(f, "ATTENZIONE"),
            LimitStatus::Exceeded => write!(f, "SUPERATO"),
        }
    }
}
