// ==========================================
// 订单产能管控 - 引擎层
// ==========================================
// 职责: 单位换算、名称匹配、准入检查、台账、强制放行
// 红线: 准入检查不拼 SQL；台账写入只经由仓储层原子操作
// ==========================================

pub mod admission;
pub mod error;
pub mod ledger;
pub mod override_gate;
pub mod product_matcher;
pub mod unit_normalizer;

// 重导出核心引擎
pub use admission::{AdmissionChecker, Allocation, DemandLine, OrderDemand, RecordDemand};
pub use error::{CapacityError, CapacityResult};
pub use ledger::{CapacityLedger, LedgerEntry, LedgerReport, LedgerSign};
pub use override_gate::{OverrideGate, RemainingCapacity, ReservationOutcome, ReserveContext};
pub use product_matcher::{MatchKind, ProductMatcher};
pub use unit_normalizer::{
    LineUnit, NormalizeOutcome, NormalizedQuantity, PassThroughReason, UnitNormalizer,
};
