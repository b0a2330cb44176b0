// ==========================================
// 订单产能管控 - API 层
// ==========================================
// 职责: 提供业务 API 接口，供 HTTP 处理器与命令行工具调用
// ==========================================

pub mod error;
pub mod limit_api;
pub mod limit_import;
pub mod order_capacity_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use limit_api::{LimitApi, LimitAvailability, DEFAULT_AUDIT_LIMIT};
pub use limit_import::{import_limits_csv, parse_limits_csv};
pub use order_capacity_api::OrderCapacityApi;
