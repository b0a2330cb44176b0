// ==========================================
// 订单产能管控 - 配置层
// ==========================================
// 职责: 业务配置管理（默认上限、换算参数、别名表等）
// 存储: config_kv 表
// ==========================================

pub mod capacity_config;
pub mod config_manager;

// 重导出核心配置管理器
pub use capacity_config::{CapacityConfig, ProductConversion};
pub use config_manager::{config_keys, ConfigManager};
