// ==========================================
// 线索导入系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 第三方线索数据导入（映射 / 校验 / 去重 / 审计）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 外部数据
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::{
    CanonicalField, FieldMapping, ImportContext, ImportRun, ImportRunResult, ImportRunStatus,
    Lead, MappingProfile, PreviewResult, RawFieldMapping, RowError, RowOutcome, SourceType,
};

// 导入管道
pub use importer::{ImportError, ImportOptions, ImportSource, LeadImporter, LeadImporterImpl};

// API
pub use api::{ApiError, ImportApi, ImportRequest, SourceDescriptor};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "lead-intake";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
