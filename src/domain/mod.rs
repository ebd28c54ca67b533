// ==========================================
// 线索导入系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、规范化规则
// 红线: 不含数据访问逻辑,不含导入流程逻辑
// ==========================================

pub mod import_run;
pub mod lead;
pub mod mapping;
pub mod types;

// 重导出核心类型
pub use import_run::{
    ImportContext, ImportCounters, ImportRun, ImportRunResult, PreviewResult, RowError,
    RowErrorKind, RowOutcome,
};
pub use lead::{
    dedup_keys, index_keys, normalize_email, phone_digits, DedupKey, FieldValue, Lead, LeadFieldMap,
    ValidatedLeadRecord,
};
pub use mapping::{FieldMapping, MappingProfile, RawFieldMapping};
pub use types::{now_utc, CanonicalField, ImportRunStatus, SourceType};
