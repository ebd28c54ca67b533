// ==========================================
// 线索导入系统 - API 层错误类型
// ==========================================
// 职责: 将导入层/仓储层错误转换为调用方可读的错误
// 约束: 每个错误都带显式原因
// ==========================================

use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use serde::Serialize;
use thiserror::Error;

/// API 层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ===== 请求错误 =====
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ===== 导入错误 =====
    #[error("数据源不可用: {0}")]
    SourceUnavailable(String),

    #[error("数据源未授权: {0}")]
    SourceUnauthorized(String),

    #[error("文件导入失败: {0}")]
    ImportError(String),

    #[error("字段映射冲突: {0}")]
    MappingConflict(String),

    // ===== 数据访问错误 =====
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 稳定的错误码（供调用方分支处理）
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::NotFound(_) => "not_found",
            ApiError::SourceUnavailable(_) => "source_unavailable",
            ApiError::SourceUnauthorized(_) => "source_unauthorized",
            ApiError::ImportError(_) => "import_failed",
            ApiError::MappingConflict(_) => "mapping_conflict",
            ApiError::DatabaseError(_) | ApiError::DatabaseConnectionError(_) => "database_error",
            ApiError::InvalidStateTransition { .. } => "invalid_state_transition",
            ApiError::InternalError(_) | ApiError::Other(_) => "internal_error",
        }
    }

    pub fn to_body(&self) -> ApiErrorBody {
        ApiErrorBody {
            success: false,
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// 错误响应体
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub success: bool,
    pub code: String,
    pub message: String,
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
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseBusy(msg) => {
                ApiError::DatabaseError(format!("数据库繁忙，请稍后重试: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::DatabaseError(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::SourceUnavailable(msg) => ApiError::SourceUnavailable(msg),
            ImportError::SourceUnauthorized(msg) => ApiError::SourceUnauthorized(msg),
            e @ (ImportError::MalformedSource(_) | ImportError::TooManyRows { .. }) => {
                ApiError::ImportError(e.to_string())
            }
            ImportError::InvalidSourceDescriptor(msg) => ApiError::InvalidInput(msg),
            e @ ImportError::MappingConflict { .. } => ApiError::MappingConflict(e.to_string()),
            e @ ImportError::EmptyMapping => ApiError::InvalidInput(e.to_string()),
            ImportError::Repository(e) => e.into(),
            ImportError::InternalError(msg) => ApiError::InternalError(msg),
            ImportError::Other(err) => ApiError::Other(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CanonicalField;

    #[test]
    fn test_repository_error_conversion() {
        let api_err: ApiError = RepositoryError::not_found("ImportRun", "R001").into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("ImportRun"));
                assert!(msg.contains("R001"));
            }
            _ => panic!("Expected NotFound"),
        }
    }

    #[test]
    fn test_import_error_conversion() {
        let api_err: ApiError = ImportError::MappingConflict {
            field: CanonicalField::HomeEmail,
            headers: vec!["Email".into(), "E-mail".into()],
        }
        .into();
        assert_eq!(api_err.code(), "mapping_conflict");
        assert!(api_err.to_string().contains("home_email"));

        let api_err: ApiError = ImportError::SourceUnauthorized("no token".into()).into();
        assert_eq!(api_err.to_body().code, "source_unauthorized");
        assert!(!api_err.to_body().success);

        let api_err: ApiError = ImportError::Repository(RepositoryError::LockError("x".into())).into();
        assert_eq!(api_err.code(), "database_error");
    }
}
