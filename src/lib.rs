// ==========================================
// 订单产能管控 - 核心库
// ==========================================
// 职责: 按取货日期的生产限额准入、预占台账、强制放行
// 技术栈: axum + Rust + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 准入规则与台账
pub mod engine;

// 配置层 - 业务配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 状态装配与 HTTP
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{LimitStatus, LimitUnit, ScopeKind};

// 领域实体
pub use domain::{
    ActionLog, ActionType, AdmissionResult, CapacityFinding, LimitScope, OrderLineItem,
    OrderReservation, ProductionLimit,
};

// 引擎
pub use engine::{AdmissionChecker, CapacityLedger, OverrideGate, UnitNormalizer};

// API
pub use api::{ApiError, LimitApi, OrderCapacityApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "订单产能管控";
