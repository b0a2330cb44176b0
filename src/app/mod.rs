// ==========================================
// 订单产能管控 - 应用层
// ==========================================
// 职责: 应用状态装配与 HTTP 接口
// ==========================================

pub mod http;
pub mod state;

// 重导出
pub use http::{router, serve};
pub use state::{get_bind_addr, get_default_db_path, AppState};
