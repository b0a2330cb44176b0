// ==========================================
// 订单产能管控 - 操作日志领域模型
// ==========================================
// 红线: 强制放行与限额人工修改必须留痕
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,
    pub action_type: String,       // 操作类型 (存储为字符串)
    pub action_ts: NaiveDateTime,
    pub actor: String,

    // ===== 关联对象 =====
    pub order_id: Option<String>,
    pub pickup_date: Option<NaiveDate>,
    pub limit_id: Option<String>,

    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>,
}

impl ActionLog {
    pub fn new(action_type: ActionType, actor: &str) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            action_type: action_type.as_str().to_string(),
            action_ts: chrono::Local::now().naive_local(),
            actor: actor.to_string(),
            order_id: None,
            pickup_date: None,
            limit_id: None,
            payload_json: None,
            detail: None,
        }
    }

    pub fn with_order(mut self, order_id: Option<&str>) -> Self {
        self.order_id = order_id.map(str::to_string);
        self
    }

    pub fn with_pickup_date(mut self, date: NaiveDate) -> Self {
        self.pickup_date = Some(date);
        self
    }

    pub fn with_limit(mut self, limit_id: &str) -> Self {
        self.limit_id = Some(limit_id.to_string());
        self
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload_json = Some(payload);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    ForceOverride,   // 强制放行
    LimitCreate,     // 新建限额
    LimitUpdate,     // 修改限额
    LimitDelete,     // 删除限额
    LimitBulkCreate, // 批量新建限额
    DirectSale,      // 直接销售预占
    OrderReserve,    // 订单预占
    OrderUpdate,     // 订单修改重新预占
    OrderRelease,    // 订单释放
}

impl ActionType {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ForceOverride => "CAPACITY_FORCE_OVERRIDE",
            ActionType::LimitCreate => "LIMIT_CREATE",
            ActionType::LimitUpdate => "LIMIT_UPDATE",
            ActionType::LimitDelete => "LIMIT_DELETE",
            ActionType::LimitBulkCreate => "LIMIT_BULK_CREATE",
            ActionType::DirectSale => "DIRECT_SALE",
            ActionType::OrderReserve => "ORDER_RESERVE",
            ActionType::OrderUpdate => "ORDER_UPDATE",
            ActionType::OrderRelease => "ORDER_RELEASE",
        }
    }
}
