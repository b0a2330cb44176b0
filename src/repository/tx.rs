// ==========================================
// 订单产能管控 - 写事务执行器
// ==========================================
// 约束:
// - 所有台账写入都在 BEGIN IMMEDIATE 事务中执行（读之前先拿写锁），
//   检查与预占在同一事务内完成，不存在"先读后写"的竞争窗口
// - SQLITE_BUSY / LOCKED 按策略重试，最终失败记 error 日志并返回
// ==========================================

use crate::db::SharedConnection;
use crate::repository::error::RepositoryError;
use rusqlite::{Transaction, TransactionBehavior};
use std::time::Duration;

/// 事务结束方式
///
/// `Rollback` 用于"正常结果但不落库"的场景（例如准入被阻断）。
#[derive(Debug)]
pub enum TxOutcome<T> {
    Commit(T),
    Rollback(T),
}

/// 可重试错误判定
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for RepositoryError {
    fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::DatabaseBusy(_))
    }
}

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff_ms: 25,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// 在 IMMEDIATE 写事务中执行 `f`
///
/// # 参数
/// - conn: 共享连接
/// - policy: 重试策略
/// - op: 操作名（日志用）
/// - f: 事务体，可被多次调用（重试时）
pub fn run_write_tx<T, E, F>(
    conn: &SharedConnection,
    policy: &RetryPolicy,
    op: &'static str,
    mut f: F,
) -> Result<T, E>
where
    E: From<RepositoryError> + Retryable + std::fmt::Display,
    F: FnMut(&Transaction<'_>) -> Result<TxOutcome<T>, E>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        let result = {
            let mut guard = conn
                .lock()
                .map_err(|e| E::from(RepositoryError::LockError(e.to_string())))?;
            run_once(&mut guard, &mut f)
        };

        match result {
            Err(e) if e.is_retryable() && attempt < policy.attempts => {
                tracing::warn!(op, attempt, error = %e, "写事务繁忙，稍后重试");
                std::thread::sleep(Duration::from_millis(policy.backoff_ms * attempt as u64));
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(op, attempt, error = %e, "写事务重试耗尽");
                }
                return Err(e);
            }
            Ok(value) => return Ok(value),
        }
    }
}

fn run_once<T, E, F>(conn: &mut rusqlite::Connection, f: &mut F) -> Result<T, E>
where
    E: From<RepositoryError>,
    F: FnMut(&Transaction<'_>) -> Result<TxOutcome<T>, E>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| E::from(RepositoryError::from(e)))?;

    // 事务体返回 Err 时 tx 被 drop，自动回滚
    match f(&tx)? {
        TxOutcome::Commit(value) => {
            tx.commit().map_err(|e| E::from(RepositoryError::from(e)))?;
            Ok(value)
        }
        TxOutcome::Rollback(value) => {
            tx.rollback().map_err(|e| E::from(RepositoryError::from(e)))?;
            Ok(value)
        }
    }
}
