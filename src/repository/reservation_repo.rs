// ==========================================
// 订单产能管控 - 订单预占数据仓储
// ==========================================
// 职责: 记录每个订单实际提交到台账的订单行
// 用途: 修改/删除订单时精确回退原有预占
// ==========================================

use crate::db::SharedConnection;
use crate::domain::order::{ChargedEntry, OrderLineItem, OrderReservation};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::limit_repo::format_ts;
use rusqlite::{params, Connection, OptionalExtension};

pub struct OrderReservationRepository {
    conn: SharedConnection,
}

impl OrderReservationRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// 按订单ID查询预占
    pub fn find(&self, order_id: &str) -> RepositoryResult<Option<OrderReservation>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Self::find_tx(&conn, order_id)
    }

    pub fn find_tx(
        conn: &Connection,
        order_id: &str,
    ) -> RepositoryResult<Option<OrderReservation>> {
        let row = conn
            .query_row(
                r#"
                SELECT order_id, pickup_date, items_json, ledger_json, forced,
                       created_at, updated_at
                FROM order_reservation
                WHERE order_id = ?1
                "#,
                params![order_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, chrono::NaiveDate>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, chrono::NaiveDateTime>(5)?,
                        row.get::<_, chrono::NaiveDateTime>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((order_id, pickup_date, items_json, ledger_json, forced, created_at, updated_at)) =
            row
        else {
            return Ok(None);
        };

        let items: Vec<OrderLineItem> = serde_json::from_str(&items_json)?;
        let charged: Option<Vec<ChargedEntry>> = ledger_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(Some(OrderReservation {
            order_id,
            pickup_date,
            items,
            charged,
            forced,
            created_at,
            updated_at,
        }))
    }

    /// 插入或覆盖订单预占
    pub fn upsert_tx(conn: &Connection, reservation: &OrderReservation) -> RepositoryResult<()> {
        let items_json = serde_json::to_string(&reservation.items)?;
        let ledger_json = reservation
            .charged
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            r#"
            INSERT INTO order_reservation (
                order_id, pickup_date, items_json, ledger_json, forced, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (order_id) DO UPDATE SET
                pickup_date = excluded.pickup_date,
                items_json = excluded.items_json,
                ledger_json = excluded.ledger_json,
                forced = excluded.forced,
                updated_at = excluded.updated_at
            "#,
            params![
                reservation.order_id,
                reservation.pickup_date,
                items_json,
                ledger_json,
                reservation.forced,
                format_ts(&reservation.created_at),
                format_ts(&reservation.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 删除订单预占
    ///
    /// # 返回
    /// - Ok(true): 已删除
    /// - Ok(false): 不存在
    pub fn delete_tx(conn: &Connection, order_id: &str) -> RepositoryResult<bool> {
        let affected = conn.execute(
            "DELETE FROM order_reservation WHERE order_id = ?1",
            params![order_id],
        )?;
        Ok(affected > 0)
    }
}
