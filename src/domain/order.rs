// ==========================================
// 订单产能管控 - 订单行与预占记录
// ==========================================
// 订单本身由外部订单服务管理，这里只保留准入检查需要的视图
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// OrderLineItem - 订单行（准入检查输入）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: Option<String>,
    /// 组合/托盘类伪行（其内容已在别处展开）
    #[serde(default)]
    pub composite: bool,
}

impl OrderLineItem {
    pub fn new(name: impl Into<String>, quantity: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit: unit.into(),
            category: None,
            composite: false,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

// ==========================================
// OrderReservation - 订单预占记录
// ==========================================
// 记录订单实际提交到台账的内容，用于精确回退
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReservation {
    pub order_id: String,
    pub pickup_date: NaiveDate,
    pub items: Vec<OrderLineItem>,
    /// 实际计入的扣减明细；None 为旧版记录（回退时按订单行重新分配）
    #[serde(default)]
    pub charged: Option<Vec<ChargedEntry>>,
    pub forced: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// ChargedEntry - 已计入台账的扣减
// ==========================================
// delta 的单位为提交时限额记录的单位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargedEntry {
    pub limit_id: String,
    pub delta: f64,
}
