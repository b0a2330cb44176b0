// ==========================================
// 订单产能管控 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，把仓储/引擎错误转换为带原因的业务错误
// 注意: 准入被阻断在引擎层是结果值，到 API 边界才转为 AdmissionBlocked
// ==========================================

use crate::domain::admission::CapacityFinding;
use crate::domain::limit::LimitValidationError;
use crate::engine::error::CapacityError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("记录冲突: {0}")]
    Conflict(String),

    /// 超出产能且未强制放行
    #[error("超出生产限额: {} 项", .findings.len())]
    AdmissionBlocked { findings: Vec<CapacityFinding> },

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库繁忙: {0}")]
    DatabaseBusy(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 错误代码（返回给调用方）
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::AdmissionBlocked { .. } => "ADMISSION_BLOCKED",
            ApiError::DatabaseBusy(_) => "DATABASE_BUSY",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::DatabaseConnectionError(_) => "DATABASE_CONNECTION_ERROR",
            ApiError::DatabaseTransactionError(_) => "DATABASE_TRANSACTION_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::Other(_) => "OTHER_ERROR",
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseBusy(msg) => ApiError::DatabaseBusy(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::Conflict(format!("同一日期同一范围的限额已存在: {}", msg))
            }
            RepositoryError::ValidationError(msg) => ApiError::ValidationError(msg),
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 CapacityError 转换
// ==========================================
impl From<CapacityError> for ApiError {
    fn from(err: CapacityError) -> Self {
        match err {
            CapacityError::InvalidLineItem { .. } | CapacityError::PieceRatioMissing(_) => {
                ApiError::ValidationError(err.to_string())
            }
            CapacityError::ReservationExists(_) => ApiError::Conflict(err.to_string()),
            CapacityError::Storage(e) => e.into(),
        }
    }
}

impl From<LimitValidationError> for ApiError {
    fn from(err: LimitValidationError) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
