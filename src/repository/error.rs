// ==========================================
// 线索导入系统 - 仓储层错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    // ===== 连接 / 锁 =====
    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    /// SQLite 写锁等待超时（busy_timeout 已耗尽）
    #[error("数据库繁忙: {0}")]
    DatabaseBusy(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    /// 唯一索引冲突（去重键或映射方案名）
    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    // ===== ImportRun 状态机 =====
    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("字段值错误 (field={field}): {message}")]
    FieldValueError { field: String, message: String },

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepositoryError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        RepositoryError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// 写冲突类错误（并发导入时可按更新重试）
    pub fn is_write_conflict(&self) -> bool {
        matches!(
            self,
            RepositoryError::UniqueConstraintViolation(_) | RepositoryError::DatabaseBusy(_)
        )
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err {
            rusqlite::Error::SqliteFailure(ref failure, ref msg) => {
                let detail = msg.clone().unwrap_or_else(|| err.to_string());
                match failure.code {
                    ErrorCode::ConstraintViolation if detail.contains("UNIQUE") => {
                        RepositoryError::UniqueConstraintViolation(detail)
                    }
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                        RepositoryError::DatabaseBusy(detail)
                    }
                    ErrorCode::CannotOpen => RepositoryError::DatabaseConnectionError(detail),
                    _ => RepositoryError::DatabaseQueryError(detail),
                }
            }
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                entity: "row".to_string(),
                id: "-".to_string(),
            },
            other => RepositoryError::DatabaseQueryError(other.to_string()),
        }
    }
}

// JSON 列（映射、错误样本、字段集合）
impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::FieldValueError {
            field: "json".to_string(),
            message: err.to_string(),
        }
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;
