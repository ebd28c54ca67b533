// ==========================================
// 线索导入系统 - API 层
// ==========================================
// 职责: 提供动作式调用接口，供 CLI 或宿主平台调用
// ==========================================

pub mod error;
pub mod import_api;

// 重导出核心类型
pub use error::{ApiError, ApiErrorBody, ApiResult};
pub use import_api::{ErrorReportResponse, ImportApi, ImportRequest, MappingJson, SourceDescriptor};
