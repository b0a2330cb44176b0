// ==========================================
// 订单产能管控 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// 所有仓储共享同一个连接（Arc<Mutex<Connection>>）
// ==========================================

use std::sync::Arc;

use crate::api::{LimitApi, OrderCapacityApi};
use crate::config::capacity_config::CapacityConfig;
use crate::config::config_manager::ConfigManager;
use crate::db::{open_shared_connection, read_schema_version, SharedConnection};
use crate::engine::OverrideGate;
use crate::repository::{
    ActionLogRepository, OrderReservationRepository, ProductionLimitRepository,
};

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "ORDER_CAPACITY_DB_PATH";
/// 监听地址环境变量
pub const BIND_ADDR_ENV: &str = "ORDER_CAPACITY_BIND";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// 应用状态
///
/// 在 HTTP 路由中作为共享状态（Arc<AppState>）
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 加载时的产能配置快照
    pub config: CapacityConfig,

    pub limit_api: Arc<LimitApi>,
    pub order_capacity_api: Arc<OrderCapacityApi>,
    pub gate: Arc<OverrideGate>,

    conn: SharedConnection,
}

impl AppState {
    /// 创建应用状态
    ///
    /// # 参数
    /// - db_path: 数据库文件路径（不存在时自动建库建表）
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!(db_path = %db_path, "初始化AppState");

        let conn = open_shared_connection(&db_path)
            .map_err(|e| format!("无法打开数据库 {}: {}", db_path, e))?;

        let config = ConfigManager::new(conn.clone())
            .load_capacity_config()
            .map_err(|e| format!("无法加载产能配置: {}", e))?;
        tracing::info!(
            default_ceiling_kg = config.default_ceiling_kg,
            fuzzy_product_match = config.fuzzy_product_match,
            require_piece_ratio = config.require_piece_ratio,
            conversions = config.product_conversions.len(),
            aliases = config.product_aliases.len(),
            "产能配置已加载"
        );

        Ok(Self::from_parts(db_path, conn, config))
    }

    /// 由已打开的连接与配置构造（测试与导入工具复用）
    pub fn from_parts(db_path: String, conn: SharedConnection, config: CapacityConfig) -> Self {
        let limit_repo = Arc::new(ProductionLimitRepository::new(conn.clone()));
        let reservation_repo = Arc::new(OrderReservationRepository::new(conn.clone()));
        let action_log_repo = Arc::new(ActionLogRepository::new(conn.clone()));
        let gate = Arc::new(OverrideGate::new(conn.clone(), &config));

        let limit_api = Arc::new(LimitApi::new(
            limit_repo,
            action_log_repo.clone(),
            gate.clone(),
        ));
        let order_capacity_api = Arc::new(OrderCapacityApi::new(
            gate.clone(),
            reservation_repo,
            action_log_repo,
        ));

        Self {
            db_path,
            config,
            limit_api,
            order_capacity_api,
            gate,
            conn,
        }
    }

    /// 当前数据库 schema 版本
    pub fn schema_version(&self) -> Result<Option<i64>, String> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| format!("锁获取失败: {}", e))?;
        read_schema_version(&conn).map_err(|e| e.to_string())
    }
}

/// 获取默认数据库路径
///
/// 优先使用环境变量 ORDER_CAPACITY_DB_PATH，否则放在用户数据目录下。
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./order_capacity.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("order-capacity");
        // 目录创建失败时回落到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("order_capacity.db");
        }
    }

    path.to_string_lossy().to_string()
}

/// 获取 HTTP 监听地址
pub fn get_bind_addr() -> String {
    std::env::var(BIND_ADDR_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
}
