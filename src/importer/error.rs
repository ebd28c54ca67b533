// ==========================================
// 线索导入系统 - 导入模块错误类型
// ==========================================
// 分类:
// - 来源错误: 整个运行失败（ImportRun 终结为 failed）
// - 映射错误: 执行前拒绝（不创建 ImportRun）
// - 行级错误不走此类型，见 domain::RowError
// 工具: thiserror 派生宏
// ==========================================

use crate::domain::types::CanonicalField;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 来源错误 =====
    #[error("数据源不可用: {0}")]
    SourceUnavailable(String),

    #[error("数据源未授权: {0}")]
    SourceUnauthorized(String),

    #[error("数据源格式错误: {0}")]
    MalformedSource(String),

    #[error("数据源描述无效: {0}")]
    InvalidSourceDescriptor(String),

    #[error("数据行数 {rows} 超过单次导入上限 {limit}，请拆分文件后重试")]
    TooManyRows { rows: usize, limit: usize },

    // ===== 映射错误 =====
    #[error("字段映射冲突: 标准字段 {field} 同时被 {headers:?} 映射")]
    MappingConflict {
        field: CanonicalField,
        headers: Vec<String>,
    },

    #[error("字段映射为空: 没有任何源列映射到标准字段")]
    EmptyMapping,

    // ===== 存储错误 =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    /// 是否属于来源错误（需将运行终结为 failed）
    pub fn is_source_error(&self) -> bool {
        matches!(
            self,
            ImportError::SourceUnavailable(_)
                | ImportError::SourceUnauthorized(_)
                | ImportError::MalformedSource(_)
                | ImportError::InvalidSourceDescriptor(_)
                | ImportError::TooManyRows { .. }
        )
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::SourceUnavailable(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::MalformedSource(format!("CSV 解析失败: {}", err))
    }
}

// 实现 From<calamine::XlsxError>
impl From<calamine::XlsxError> for ImportError {
    fn from(err: calamine::XlsxError) -> Self {
        ImportError::MalformedSource(format!("Excel 解析失败: {}", err))
    }
}

// 实现 From<reqwest::Error>
impl From<reqwest::Error> for ImportError {
    fn from(err: reqwest::Error) -> Self {
        ImportError::SourceUnavailable(format!("HTTP 请求失败: {}", err))
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_classification() {
        assert!(ImportError::SourceUnavailable("x".into()).is_source_error());
        assert!(ImportError::TooManyRows { rows: 10, limit: 5 }.is_source_error());
        assert!(!ImportError::EmptyMapping.is_source_error());
        assert!(!ImportError::MappingConflict {
            field: CanonicalField::HomeEmail,
            headers: vec!["Email".into(), "E-mail".into()],
        }
        .is_source_error());
    }

    #[test]
    fn test_mapping_conflict_message_names_field() {
        let err = ImportError::MappingConflict {
            field: CanonicalField::HomeEmail,
            headers: vec!["Email".into(), "E-mail".into()],
        };
        assert!(err.to_string().contains("home_email"));
    }
}
