// ==========================================
// 线索导入系统 - 导入层
// ==========================================
// 职责: 外部线索数据导入（CSV / Excel / 在线表格）
// 管道: 读源 → 字段映射 → 行校验 → 去重 → 落库 + ImportRun 审计
// ==========================================

// 模块声明
pub mod data_cleaner;
pub mod deduplicator;
pub mod error;
pub mod error_report;
pub mod field_mapper;
pub mod file_parser;
pub mod lead_importer_impl;
pub mod lead_importer_trait;
pub mod row_validator;
pub mod sheets_client;
pub mod source_reader;

// 重导出核心类型
pub use data_cleaner::LeadDataCleaner;
pub use deduplicator::{BatchSeen, DedupAction, DedupDecision, LeadDeduplicator};
pub use error::{ImportError, ImportResult};
pub use error_report::{error_report_for_run, omitted_error_count, render_error_report};
pub use field_mapper::{normalize_header, LeadFieldMapper};
pub use file_parser::{CsvParser, ExcelParser};
pub use lead_importer_impl::LeadImporterImpl;
pub use row_validator::LeadRowValidator;
pub use sheets_client::{HttpSheetsClient, RetryPolicy, SheetsClient};
pub use source_reader::LeadSourceReader;

// 重导出 Trait 接口
pub use lead_importer_trait::{
    DataCleaner, Deduplicator, FieldMapper, FileParser, ImportOptions, ImportSource,
    LeadImporter, RowValidator, SourceReader, SourceRow, SourceTable,
};
