// ==========================================
// 订单产能管控 - 操作日志数据仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
// ==========================================

use crate::db::SharedConnection;
use crate::domain::action_log::ActionLog;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::limit_repo::format_ts;
use rusqlite::{params, Connection, Row};

pub struct ActionLogRepository {
    conn: SharedConnection,
}

impl ActionLogRepository {
    /// 创建新的操作日志仓储
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入操作日志
    ///
    /// # 返回
    /// - `Ok(action_id)`: 成功插入,返回action_id
    /// - `Err(...)`: 数据库错误
    pub fn insert(&self, log: &ActionLog) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, log)
    }

    /// 事务内插入（与台账写入同一事务）
    pub fn insert_tx(conn: &Connection, log: &ActionLog) -> RepositoryResult<String> {
        conn.execute(
            r#"
            INSERT INTO action_log (
                action_id, action_type, action_ts, actor,
                order_id, pickup_date, limit_id, payload_json, detail
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                log.action_id,
                log.action_type,
                format_ts(&log.action_ts),
                log.actor,
                log.order_id,
                log.pickup_date,
                log.limit_id,
                log.payload_json.as_ref().map(|v| v.to_string()),
                log.detail,
            ],
        )?;

        Ok(log.action_id.clone())
    }

    /// 最近的操作日志（按时间倒序）
    pub fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT action_id, action_type, action_ts, actor,
                   order_id, pickup_date, limit_id, payload_json, detail
            FROM action_log
            ORDER BY action_ts DESC, rowid DESC
            LIMIT ?1
            "#,
        )?;
        let logs = stmt
            .query_map(params![limit as i64], map_log_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    /// 指定订单的操作日志（按时间正序）
    pub fn list_by_order(&self, order_id: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT action_id, action_type, action_ts, actor,
                   order_id, pickup_date, limit_id, payload_json, detail
            FROM action_log
            WHERE order_id = ?1
            ORDER BY action_ts, rowid
            "#,
        )?;
        let logs = stmt
            .query_map(params![order_id], map_log_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }
}

fn map_log_row(row: &Row<'_>) -> rusqlite::Result<ActionLog> {
    let payload: Option<String> = row.get(7)?;
    Ok(ActionLog {
        action_id: row.get(0)?,
        action_type: row.get(1)?,
        action_ts: row.get(2)?,
        actor: row.get(3)?,
        order_id: row.get(4)?,
        pickup_date: row.get(5)?,
        limit_id: row.get(6)?,
        payload_json: payload.and_then(|s| serde_json::from_str(&s).ok()),
        detail: row.get(8)?,
    })
}
