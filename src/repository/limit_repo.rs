// ==========================================
// 订单产能管控 - 生产限额数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 已预占只能通过 adjust_consumed_tx 原子增减（SQL 层 consumed = consumed + ?）
// ==========================================

use crate::db::SharedConnection;
use crate::domain::limit::{LimitScope, LimitValidationError, ProductionLimit, QUANTITY_EPSILON};
use crate::domain::types::{LimitUnit, ScopeKind};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

const SELECT_COLUMNS: &str = r#"
    limit_id, pickup_date, scope_kind, scope_key, ceiling, unit,
    consumed, active, warn_threshold_pct, created_at, updated_at
"#;

// ==========================================
// ProductionLimitRepository - 生产限额仓储
// ==========================================
pub struct ProductionLimitRepository {
    conn: SharedConnection,
}

impl ProductionLimitRepository {
    /// 从已有连接创建仓储实例
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按条件查询限额列表
    ///
    /// # 参数
    /// - date: 日期（可选）
    /// - active: 是否启用（可选）
    pub fn list(
        &self,
        date: Option<NaiveDate>,
        active: Option<bool>,
    ) -> RepositoryResult<Vec<ProductionLimit>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM production_limit
            WHERE (?1 IS NULL OR pickup_date = ?1)
              AND (?2 IS NULL OR active = ?2)
            ORDER BY pickup_date, scope_kind, scope_key_norm
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let limits = stmt
            .query_map(params![date, active], map_limit_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(limits)
    }

    /// 按ID查询
    pub fn find_by_id(&self, limit_id: &str) -> RepositoryResult<Option<ProductionLimit>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, limit_id)
    }

    /// 查询指定日期的启用限额
    pub fn find_active_by_date(&self, date: NaiveDate) -> RepositoryResult<Vec<ProductionLimit>> {
        let conn = self.get_conn()?;
        Self::find_active_by_date_tx(&conn, date)
    }

    // ==========================================
    // 人工维护（新增/修改/删除）
    // ==========================================

    /// 插入单条限额
    pub fn insert(&self, limit: &ProductionLimit) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, limit)
    }

    /// 批量插入（全部成功或全部失败）
    pub fn insert_batch(&self, limits: &[ProductionLimit]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        for limit in limits {
            Self::insert_tx(&tx, limit)?;
        }

        tx.commit()?;
        Ok(limits.len())
    }

    /// 更新人工可修改字段（上限/单位/启用/预警阈值）
    ///
    /// 已有预占的记录不允许改单位（SQL 层二次校验，防止读取后被并发预占）。
    pub fn update_settings(&self, limit: &ProductionLimit) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE production_limit
            SET ceiling = ?1, unit = ?2, active = ?3, warn_threshold_pct = ?4, updated_at = ?5
            WHERE limit_id = ?6 AND (unit = ?2 OR consumed <= ?7)
            "#,
            params![
                limit.ceiling,
                limit.unit.as_str(),
                limit.active,
                limit.warn_threshold_pct,
                format_ts(&limit.updated_at),
                limit.limit_id,
                QUANTITY_EPSILON,
            ],
        )?;

        if affected == 0 {
            let current: Option<(String, f64)> = conn
                .query_row(
                    "SELECT unit, consumed FROM production_limit WHERE limit_id = ?1",
                    params![limit.limit_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            return match current {
                Some((unit, consumed)) => Err(LimitValidationError::UnitChangeWithConsumption {
                    from: LimitUnit::parse(&unit).unwrap_or_default(),
                    to: limit.unit,
                    consumed,
                }
                .into()),
                None => Err(RepositoryError::not_found("ProductionLimit", &limit.limit_id)),
            };
        }
        Ok(())
    }

    /// 删除限额
    pub fn delete(&self, limit_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "DELETE FROM production_limit WHERE limit_id = ?1",
            params![limit_id],
        )?;

        if affected == 0 {
            return Err(RepositoryError::not_found("ProductionLimit", limit_id));
        }
        Ok(())
    }

    // ==========================================
    // 事务内操作（调用方持有事务）
    // ==========================================

    pub fn find_by_id_tx(
        conn: &Connection,
        limit_id: &str,
    ) -> RepositoryResult<Option<ProductionLimit>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM production_limit WHERE limit_id = ?1");
        let limit = conn
            .query_row(&sql, params![limit_id], map_limit_row)
            .optional()?;
        Ok(limit)
    }

    pub fn find_active_by_date_tx(
        conn: &Connection,
        date: NaiveDate,
    ) -> RepositoryResult<Vec<ProductionLimit>> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM production_limit
            WHERE pickup_date = ?1 AND active = 1
            ORDER BY scope_kind, scope_key_norm
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let limits = stmt
            .query_map(params![date], map_limit_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(limits)
    }

    pub fn insert_tx(conn: &Connection, limit: &ProductionLimit) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO production_limit (
                limit_id, pickup_date, scope_kind, scope_key, scope_key_norm,
                ceiling, unit, consumed, active, warn_threshold_pct, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                limit.limit_id,
                limit.date,
                limit.scope.kind().as_str(),
                limit.scope.key(),
                limit.scope.normalized_key(),
                limit.ceiling,
                limit.unit.as_str(),
                limit.consumed,
                limit.active,
                limit.warn_threshold_pct,
                format_ts(&limit.created_at),
                format_ts(&limit.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 原子调整已预占量
    ///
    /// 单条 UPDATE 完成增减；结果按 6 位小数取整并且不小于 0。
    /// 只作用于启用的记录。
    ///
    /// # 返回
    /// - Ok(true): 已调整
    /// - Ok(false): 记录不存在或未启用
    pub fn adjust_consumed_tx(
        conn: &Connection,
        limit_id: &str,
        delta: f64,
    ) -> RepositoryResult<bool> {
        let affected = conn.execute(
            r#"
            UPDATE production_limit
            SET consumed = MAX(ROUND(consumed + ?1, 6), 0),
                updated_at = ?2
            WHERE limit_id = ?3 AND active = 1
            "#,
            params![delta, now_ts(), limit_id],
        )?;
        Ok(affected > 0)
    }

    /// 按提交时的扣减明细回退（不区分启用状态）
    ///
    /// 记录已删除时不做任何修改。
    ///
    /// # 返回
    /// - Ok(true): 已回退
    /// - Ok(false): 记录不存在
    pub fn release_charged_tx(
        conn: &Connection,
        limit_id: &str,
        amount: f64,
    ) -> RepositoryResult<bool> {
        let affected = conn.execute(
            r#"
            UPDATE production_limit
            SET consumed = MAX(ROUND(consumed - ?1, 6), 0),
                updated_at = ?2
            WHERE limit_id = ?3
            "#,
            params![amount, now_ts(), limit_id],
        )?;
        Ok(affected > 0)
    }

    /// 惰性创建并累加（原子 UPSERT）
    ///
    /// 记录不存在时以 `template` 的上限创建并直接记入 `delta`；
    /// 已存在且启用时在 SQL 层累加；已存在但未启用时不做任何修改。
    ///
    /// # 返回
    /// - Ok(Some(limit_id)): 新建或累加的记录ID
    /// - Ok(None): 命中未启用记录
    pub fn upsert_consumed_tx(
        conn: &Connection,
        template: &ProductionLimit,
        delta: f64,
    ) -> RepositoryResult<Option<String>> {
        let affected = conn.execute(
            r#"
            INSERT INTO production_limit (
                limit_id, pickup_date, scope_kind, scope_key, scope_key_norm,
                ceiling, unit, consumed, active, warn_threshold_pct, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, MAX(ROUND(?8, 6), 0), 1, ?9, ?10, ?10)
            ON CONFLICT (pickup_date, scope_kind, scope_key_norm) DO UPDATE
                SET consumed = MAX(ROUND(production_limit.consumed + excluded.consumed, 6), 0),
                    updated_at = excluded.updated_at
                WHERE production_limit.active = 1
            "#,
            params![
                template.limit_id,
                template.date,
                template.scope.kind().as_str(),
                template.scope.key(),
                template.scope.normalized_key(),
                template.ceiling,
                template.unit.as_str(),
                delta,
                template.warn_threshold_pct,
                now_ts(),
            ],
        )?;

        if affected == 0 {
            return Ok(None);
        }

        let id: String = conn.query_row(
            r#"
            SELECT limit_id FROM production_limit
            WHERE pickup_date = ?1 AND scope_kind = ?2 AND scope_key_norm = ?3
            "#,
            params![
                template.date,
                template.scope.kind().as_str(),
                template.scope.normalized_key()
            ],
            |row| row.get(0),
        )?;
        Ok(Some(id))
    }
}

// ==========================================
// 行映射
// ==========================================

fn map_limit_row(row: &Row<'_>) -> rusqlite::Result<ProductionLimit> {
    let kind_raw: String = row.get(2)?;
    let key: String = row.get(3)?;
    let scope = match ScopeKind::parse(&kind_raw) {
        Some(ScopeKind::Product) => LimitScope::Product(key),
        Some(ScopeKind::Category) => LimitScope::Category(key),
        None => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("未知的限额范围: {}", kind_raw).into(),
            ))
        }
    };

    let unit_raw: String = row.get(5)?;
    let unit = LimitUnit::parse(&unit_raw).unwrap_or_default();

    Ok(ProductionLimit {
        limit_id: row.get(0)?,
        date: row.get(1)?,
        scope,
        ceiling: row.get(4)?,
        unit,
        consumed: row.get(6)?,
        active: row.get(7)?,
        warn_threshold_pct: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

pub(crate) fn format_ts(ts: &chrono::NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) fn now_ts() -> String {
    format_ts(&chrono::Local::now().naive_local())
}
