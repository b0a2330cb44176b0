// ==========================================
// 订单产能管控 - 引擎层错误类型
// ==========================================
// 注意: 准入被阻断不是错误，而是 AdmissionResult { ok: false }
// ==========================================

use crate::repository::error::RepositoryError;
use crate::repository::tx::Retryable;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapacityError {
    #[error("订单行无效 ({item}): {reason}")]
    InvalidLineItem { item: String, reason: String },

    /// 按件销售的产品未配置每公斤件数（require_piece_ratio 开启时）
    #[error("产品 {0} 按件销售但未配置每公斤件数")]
    PieceRatioMissing(String),

    #[error("订单 {0} 已存在产能预占")]
    ReservationExists(String),

    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

impl Retryable for CapacityError {
    fn is_retryable(&self) -> bool {
        matches!(self, CapacityError::Storage(e) if e.is_retryable())
    }
}

pub type CapacityResult<T> = Result<T, CapacityError>;
