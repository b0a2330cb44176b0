// ==========================================
// 订单产能管控 - HTTP 服务入口
// ==========================================
// 环境变量: ORDER_CAPACITY_DB_PATH / ORDER_CAPACITY_BIND / RUST_LOG
// ==========================================

use std::sync::Arc;

use anyhow::anyhow;
use order_capacity::app::{get_bind_addr, get_default_db_path, serve, AppState};
use order_capacity::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} - 系统版本: {}", order_capacity::APP_NAME, order_capacity::VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let state = tokio::task::spawn_blocking(move || AppState::new(db_path))
        .await?
        .map_err(|e| anyhow!("无法初始化AppState: {}", e))?;
    tracing::info!("AppState初始化成功");

    serve(Arc::new(state), &get_bind_addr()).await
}
