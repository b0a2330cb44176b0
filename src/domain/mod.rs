// ==========================================
// 订单产能管控 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod admission;
pub mod limit;
pub mod order;
pub mod types;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use admission::{AdmissionResult, CapacityFinding, FindingSeverity};
pub use limit::{
    normalize_name, CapacityConstraint, LimitPatch, LimitScope, LimitValidationError,
    NewProductionLimit, ProductionLimit, DEFAULT_WARN_THRESHOLD_PCT, QUANTITY_EPSILON,
};
pub use order::{ChargedEntry, OrderLineItem, OrderReservation};
pub use types::{LimitStatus, LimitUnit, ScopeKind};
