// ==========================================
// 线索导入系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入模块所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::repository::error::RepositoryResult;
use async_trait::async_trait;

// ==========================================
// 默认值
// ==========================================
pub const DEFAULT_ERROR_SAMPLE_CAP: usize = 50;
pub const DEFAULT_PREVIEW_ROW_LIMIT: usize = 25;
pub const DEFAULT_MAX_IMPORT_ROWS: usize = 50_000;
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
pub const DEFAULT_SHEETS_EXPORT_BASE: &str = "https://docs.google.com";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HTTP_RETRY_MAX_ATTEMPTS: u32 = 3;

/// 单次导入使用的配置快照（运行开始时读取一次）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSettings {
    pub error_sample_cap: usize,
    pub preview_row_limit: usize,
    pub max_import_rows: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            error_sample_cap: DEFAULT_ERROR_SAMPLE_CAP,
            preview_row_limit: DEFAULT_PREVIEW_ROW_LIMIT,
            max_import_rows: DEFAULT_MAX_IMPORT_ROWS,
        }
    }
}

/// 表格数据源 HTTP 客户端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetsSettings {
    pub api_base: String,
    pub export_base: String,
    pub timeout_secs: u64,
    pub retry_max_attempts: u32,
}

impl Default for SheetsSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_SHEETS_API_BASE.to_string(),
            export_base: DEFAULT_SHEETS_EXPORT_BASE.to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            retry_max_attempts: DEFAULT_HTTP_RETRY_MAX_ATTEMPTS,
        }
    }
}

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
// 约定: 配置缺失或无法解析时返回默认值，不报错
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    /// 错误样本上限（ImportRun.error_sample 与返回值 error_details）
    ///
    /// # 默认值
    /// - 50
    async fn get_error_sample_cap(&self) -> RepositoryResult<usize>;

    /// 预览样本行数上限
    ///
    /// # 默认值
    /// - 25
    async fn get_preview_row_limit(&self) -> RepositoryResult<usize>;

    /// 单次导入最大行数（超过则运行失败）
    ///
    /// # 默认值
    /// - 50000
    async fn get_max_import_rows(&self) -> RepositoryResult<usize>;

    async fn get_sheets_settings(&self) -> RepositoryResult<SheetsSettings>;

    /// 一次性读取导入配置
    async fn load_import_settings(&self) -> RepositoryResult<ImportSettings> {
        Ok(ImportSettings {
            error_sample_cap: self.get_error_sample_cap().await?,
            preview_row_limit: self.get_preview_row_limit().await?,
            max_import_rows: self.get_max_import_rows().await?,
        })
    }
}
