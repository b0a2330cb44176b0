// ==========================================
// 订单产能管控 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 建表（幂等）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 仓储共享的数据库连接
pub type SharedConnection = Arc<Mutex<Connection>>;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys / busy_timeout 需要"每个连接"单独配置
/// - WAL 让读请求不阻塞预占写事务（内存库会返回 memory，忽略即可）
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!(journal_mode = %mode, "sqlite connection configured");
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、建表，并包装为共享连接
pub fn open_shared_connection(db_path: &str) -> rusqlite::Result<SharedConnection> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 初始化数据库 schema（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS production_limit (
            limit_id TEXT PRIMARY KEY,
            pickup_date TEXT NOT NULL,
            scope_kind TEXT NOT NULL CHECK (scope_kind IN ('PRODUCT', 'CATEGORY')),
            scope_key TEXT NOT NULL,
            scope_key_norm TEXT NOT NULL,
            ceiling REAL NOT NULL CHECK (ceiling >= 0),
            unit TEXT NOT NULL DEFAULT 'kg',
            consumed REAL NOT NULL DEFAULT 0 CHECK (consumed >= 0),
            active INTEGER NOT NULL DEFAULT 1,
            warn_threshold_pct REAL NOT NULL DEFAULT 80
                CHECK (warn_threshold_pct >= 0 AND warn_threshold_pct <= 100),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (pickup_date, scope_kind, scope_key_norm)
        );

        CREATE INDEX IF NOT EXISTS idx_production_limit_date
            ON production_limit (pickup_date, active);

        CREATE TABLE IF NOT EXISTS order_reservation (
            order_id TEXT PRIMARY KEY,
            pickup_date TEXT NOT NULL,
            items_json TEXT NOT NULL,
            ledger_json TEXT,
            forced INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS action_log (
            action_id TEXT PRIMARY KEY,
            action_type TEXT NOT NULL,
            action_ts TEXT NOT NULL,
            actor TEXT NOT NULL,
            order_id TEXT,
            pickup_date TEXT,
            limit_id TEXT,
            payload_json TEXT,
            detail TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_action_log_ts ON action_log (action_ts DESC);
        CREATE INDEX IF NOT EXISTS idx_action_log_order ON action_log (order_id);
        "#,
    )?;

    // v1 → v2: 订单预占记录台账扣减明细
    if !has_column(conn, "order_reservation", "ledger_json")? {
        conn.execute_batch("ALTER TABLE order_reservation ADD COLUMN ledger_json TEXT;")?;
        tracing::info!("schema 迁移: order_reservation 增加 ledger_json");
    }

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
