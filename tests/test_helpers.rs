// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、应用状态装配、限额种子数据
// ==========================================

#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;

use chrono::NaiveDate;
use order_capacity::app::AppState;
use order_capacity::db::open_shared_connection;
use order_capacity::domain::limit::{NewProductionLimit, ProductionLimit};
use order_capacity::domain::order::OrderLineItem;
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    order_capacity::logging::init_test();

    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是 UTF-8")?
        .to_string();

    // 建表后立即释放连接
    drop(open_shared_connection(&db_path)?);

    Ok((temp_file, db_path))
}

/// 在临时数据库上装配应用状态
pub fn setup_state() -> (NamedTempFile, Arc<AppState>) {
    let (temp_file, db_path) = create_test_db().unwrap();
    let state = AppState::new(db_path).unwrap();
    (temp_file, Arc::new(state))
}

pub fn pickup_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 12, 24).unwrap()
}

pub fn kg(name: &str, quantity: f64) -> OrderLineItem {
    OrderLineItem::new(name, quantity, "kg")
}

/// 新建产品限额（公斤）
pub fn seed_product_limit(state: &AppState, product: &str, ceiling: f64) -> ProductionLimit {
    state
        .limit_api
        .create_limit(
            NewProductionLimit {
                date: Some(pickup_date()),
                product: Some(product.to_string()),
                ceiling: Some(ceiling),
                unit: Some("kg".to_string()),
                ..Default::default()
            },
            "test",
        )
        .unwrap()
}

/// 新建品类限额（公斤）
pub fn seed_category_limit(state: &AppState, category: &str, ceiling: f64) -> ProductionLimit {
    state
        .limit_api
        .create_limit(
            NewProductionLimit {
                date: Some(pickup_date()),
                category: Some(category.to_string()),
                ceiling: Some(ceiling),
                unit: Some("kg".to_string()),
                ..Default::default()
            },
            "test",
        )
        .unwrap()
}

/// 按 ID 读取当前已预占量
pub fn consumed_of(state: &AppState, limit_id: &str) -> f64 {
    state
        .limit_api
        .list_limits(None, None)
        .unwrap()
        .into_iter()
        .find(|l| l.limit_id == limit_id)
        .map(|l| l.consumed)
        .unwrap()
}

/// 按名称查找记录（产品或品类）
pub fn find_limit(state: &AppState, name: &str) -> Option<ProductionLimit> {
    state
        .limit_api
        .list_limits(Some(pickup_date()), None)
        .unwrap()
        .into_iter()
        .find(|l| l.scope.key().eq_ignore_ascii_case(name))
}
