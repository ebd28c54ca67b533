// ==========================================
// 线索导入系统 - 导入运行领域模型
// ==========================================
// 职责: ImportRun 审计记录 / 行级结果 / 导入与预览返回值
// 红线: ImportRun 终结后不可修改（审计记录，而非活动资源）
// ==========================================

use crate::domain::mapping::FieldMapping;
use crate::domain::types::{now_utc, CanonicalField, ImportRunStatus, SourceType};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ==========================================
// ImportContext - 请求上下文
// ==========================================
// 组织/操作人由调用方显式传入，管道内不读取全局状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportContext {
    pub org_id: String,
    pub user_id: Option<String>,
}

impl ImportContext {
    pub fn new(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

// ==========================================
// RowErrorKind - 行级问题类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    MissingIdentifier, // 缺少标识（跳过，不入库）
    InvalidEmail,      // 邮箱格式错误（仍导入，记录警告）
    DuplicateInBatch,  // 同批次重复（首次出现者生效）
    ContactConflict,   // 邮箱/电话已属于其他线索（保留原值，其余字段照常更新）
}

impl RowErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            RowErrorKind::MissingIdentifier => "missing_identifier",
            RowErrorKind::InvalidEmail => "invalid_email",
            RowErrorKind::DuplicateInBatch => "duplicate_in_batch",
            RowErrorKind::ContactConflict => "contact_conflict",
        }
    }

    /// 行是否因此被跳过
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            RowErrorKind::MissingIdentifier | RowErrorKind::DuplicateInBatch
        )
    }
}

// ==========================================
// RowError - 行级错误
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row_index: usize,
    pub kind: RowErrorKind,
    pub message: String,
}

impl RowError {
    pub fn new(row_index: usize, kind: RowErrorKind, message: impl Into<String>) -> Self {
        Self {
            row_index,
            kind,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

// ==========================================
// RowOutcome - 单行处理结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Created { lead_id: String },
    Updated { lead_id: String },
    ImportedWithWarning { lead_id: String, created: bool, warning: String },
    Skipped { reason: String },
    DuplicateInBatch { first_row: usize },
}

// ==========================================
// ImportCounters - 行级计数
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounters {
    pub total_rows: usize,
    pub imported_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
}

impl ImportCounters {
    /// 已处理行数
    pub fn processed(&self) -> usize {
        self.imported_count + self.updated_count + self.skipped_count
    }

    /// 按行结果累计；跳过与警告都计入 error_count
    pub fn record(&mut self, outcome: &RowOutcome) {
        match outcome {
            RowOutcome::Created { .. } => self.imported_count += 1,
            RowOutcome::Updated { .. } => self.updated_count += 1,
            RowOutcome::ImportedWithWarning { created, .. } => {
                if *created {
                    self.imported_count += 1;
                } else {
                    self.updated_count += 1;
                }
                self.error_count += 1;
            }
            RowOutcome::Skipped { .. } | RowOutcome::DuplicateInBatch { .. } => {
                self.skipped_count += 1;
                self.error_count += 1;
            }
        }
    }
}

// ==========================================
// ImportRun - 导入运行（审计/幂等锚点）
// ==========================================
// 对齐: import_run 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRun {
    pub run_id: String,
    pub org_id: String,
    pub source_type: SourceType,
    pub source_reference: Option<String>,       // 文件名或 URL
    pub mapping: FieldMapping,                  // 实际使用的映射
    pub status: ImportRunStatus,
    pub counters: ImportCounters,
    pub error_sample: Vec<RowError>,            // 有界错误样本
    pub error_report_ref: Option<String>,       // 错误报告引用（error_count > 0 时）
    pub failure_reason: Option<String>,         // 失败原因（status = failed）
    pub created_by: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImportRun {
    pub fn new(
        ctx: &ImportContext,
        source_type: SourceType,
        source_reference: Option<String>,
        mapping: FieldMapping,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            org_id: ctx.org_id.clone(),
            source_type,
            source_reference,
            mapping,
            status: ImportRunStatus::Queued,
            counters: ImportCounters::default(),
            error_sample: Vec::new(),
            error_report_ref: None,
            failure_reason: None,
            created_by: ctx.user_id.clone(),
            started_at: now_utc(),
            finished_at: None,
        }
    }

    pub fn error_report_ref_for(run_id: &str) -> String {
        format!("import_run/{}/errors.csv", run_id)
    }
}

// ==========================================
// ImportRunResult - 导入返回值
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRunResult {
    pub success: bool,
    pub import_run_id: String,
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub error_details: Vec<RowError>,
    #[serde(skip)]
    pub outcomes: Vec<(usize, RowOutcome)>,
}

// ==========================================
// PreviewResult - 预览返回值
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResult {
    pub headers: Vec<String>,
    pub rows: Vec<IndexMap<String, String>>,    // 样本行（≤ preview_row_limit）
    pub total_rows: usize,                      // 源数据总行数
    pub suggested_mapping: FieldMapping,
    pub validation_errors: Vec<RowError>,
    pub valid_rows: usize,
    pub problem_rows: usize,
    pub would_create: usize,
    pub would_update: usize,
    pub duplicates_in_sample: usize,
    pub lead_fields: Vec<CanonicalField>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_roll_skips_and_warnings_into_errors() {
        let mut c = ImportCounters::default();
        c.record(&RowOutcome::Created { lead_id: "a".into() });
        c.record(&RowOutcome::Updated { lead_id: "b".into() });
        c.record(&RowOutcome::ImportedWithWarning {
            lead_id: "c".into(),
            created: true,
            warning: "bad email".into(),
        });
        c.record(&RowOutcome::Skipped {
            reason: "missing_identifier".into(),
        });

        assert_eq!(c.imported_count, 2);
        assert_eq!(c.updated_count, 1);
        assert_eq!(c.skipped_count, 1);
        assert_eq!(c.error_count, 2);
    }

    #[test]
    fn test_row_error_codes() {
        assert_eq!(RowErrorKind::MissingIdentifier.code(), "missing_identifier");
        assert!(RowErrorKind::MissingIdentifier.is_skip());
        assert!(!RowErrorKind::InvalidEmail.is_skip());
    }
}
