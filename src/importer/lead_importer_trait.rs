// ==========================================
// 线索导入系统 - 导入管道 Trait
// ==========================================
// 职责: 定义导入管道各阶段接口（不包含实现）
// 管道: SourceReader → FieldMapper → RowValidator → Deduplicator → LeadImporter
// ==========================================

use crate::domain::import_run::{ImportContext, ImportRunResult, PreviewResult, RowError};
use crate::domain::lead::ValidatedLeadRecord;
use crate::domain::mapping::{FieldMapping, RawFieldMapping};
use crate::domain::types::{CanonicalField, SourceType};
use crate::importer::deduplicator::{BatchSeen, DedupDecision};
use crate::importer::error::ImportResult;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ==========================================
// 数据源描述
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum ImportSource {
    /// CSV 原始文本
    Csv {
        data: String,
        file_name: Option<String>,
    },
    /// XLSX 工作簿（默认读取第一个工作表）
    Excel {
        bytes: Vec<u8>,
        file_name: Option<String>,
        sheet_name: Option<String>,
    },
    /// 本地 CSV 文件（在 ImportRun 建立后由 SourceReader 读取）
    CsvFile {
        path: PathBuf,
        file_name: Option<String>,
    },
    /// 本地 XLSX 文件
    ExcelFile {
        path: PathBuf,
        file_name: Option<String>,
        sheet_name: Option<String>,
    },
    /// 公开分享的在线表格（走 CSV 导出地址）
    GoogleSheetsPublic { sheet_url: String },
    /// 已授权的私有在线表格（走 values API）
    GoogleSheetsPrivate {
        spreadsheet_id: String,
        sheet_name: String,
    },
}

impl ImportSource {
    pub fn source_type(&self) -> SourceType {
        match self {
            ImportSource::Csv { .. } | ImportSource::CsvFile { .. } => SourceType::Csv,
            ImportSource::Excel { .. } | ImportSource::ExcelFile { .. } => SourceType::Excel,
            ImportSource::GoogleSheetsPublic { .. } | ImportSource::GoogleSheetsPrivate { .. } => {
                SourceType::GoogleSheets
            }
        }
    }

    /// 审计用来源引用（文件名或 URL）
    pub fn reference(&self) -> Option<String> {
        match self {
            ImportSource::Csv { file_name, .. } | ImportSource::Excel { file_name, .. } => {
                file_name.clone()
            }
            ImportSource::CsvFile { path, file_name } | ImportSource::ExcelFile { path, file_name, .. } => {
                file_name.clone().or_else(|| {
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                })
            }
            ImportSource::GoogleSheetsPublic { sheet_url } => Some(sheet_url.clone()),
            ImportSource::GoogleSheetsPrivate {
                spreadsheet_id,
                sheet_name,
            } => Some(format!("{}#{}", spreadsheet_id, sheet_name)),
        }
    }
}

// ==========================================
// 源数据结构（映射边界之前）
// ==========================================

/// 源数据行（表头 → 原始字符串）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRow {
    /// 1-based 行号（表头为 1，数据从 2 开始）
    pub row_index: usize,
    pub values: IndexMap<String, String>,
}

impl SourceRow {
    pub fn get(&self, header: &str) -> Option<&str> {
        self.values.get(header).map(String::as_str)
    }
}

/// 数据源读取结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTable {
    pub headers: Vec<String>,
    pub rows: Vec<SourceRow>,
}

impl SourceTable {
    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }
}

/// 执行选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// 跳过非致命校验（邮箱格式）；标识字段要求始终生效
    #[serde(default)]
    pub skip_validation: bool,
}

// ==========================================
// FileParser Trait
// ==========================================
// 实现者: CsvParser, ExcelParser
pub trait FileParser: Send + Sync {
    /// 解析文件内容为表头 + 数据行
    ///
    /// # 返回
    /// - Ok(SourceTable): 行号从 2 开始，完全空白行跳过但保留行号
    /// - Err(MalformedSource): 无表头或格式错误
    fn parse_bytes(&self, bytes: &[u8]) -> ImportResult<SourceTable>;
}

// ==========================================
// SourceReader Trait
// ==========================================
// 实现者: LeadSourceReader
// 副作用: 仅网络 I/O，不落库
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn read(&self, ctx: &ImportContext, source: &ImportSource) -> ImportResult<SourceTable>;
}

// ==========================================
// FieldMapper Trait
// ==========================================
// 实现者: LeadFieldMapper
pub trait FieldMapper: Send + Sync {
    /// 根据表头给出映射建议（尽力而为，调用方可覆盖）
    fn suggest(&self, headers: &[String]) -> FieldMapping;

    /// 校验调用方提交的映射
    ///
    /// # 规则
    /// - 两个不同源列指向同一标准字段 → MappingConflict
    /// - 目标为空或不在 canonical 集合内 → 静默丢弃
    fn validate(
        &self,
        mapping: &RawFieldMapping,
        canonical: &[CanonicalField],
    ) -> ImportResult<FieldMapping>;
}

// ==========================================
// DataCleaner Trait
// ==========================================
// 实现者: LeadDataCleaner
pub trait DataCleaner: Send + Sync {
    /// TRIM
    fn clean_text(&self, value: &str) -> String;

    /// 标准化 NULL 值（空字符串/空白 → None）
    fn normalize_null(&self, value: Option<&str>) -> Option<String>;

    /// 数值清洗: 剥离 `$`、千分位、空白后解析；失败返回 None
    fn parse_numeric(&self, value: &str) -> Option<f64>;

    fn normalize_email(&self, value: &str) -> Option<String>;

    /// 电话: 仅保留数字；无数字返回 None
    fn normalize_phone(&self, value: &str) -> Option<String>;
}

// ==========================================
// RowValidator Trait
// ==========================================
// 实现者: LeadRowValidator
pub trait RowValidator: Send + Sync {
    /// # 返回
    /// - Ok: 校验后记录（可能带非致命警告）
    /// - Err(RowError): 致命行错误（该行跳过）
    fn validate(
        &self,
        row: &SourceRow,
        mapping: &FieldMapping,
        options: &ImportOptions,
    ) -> Result<ValidatedLeadRecord, RowError>;
}

// ==========================================
// Deduplicator Trait
// ==========================================
// 实现者: LeadDeduplicator
#[async_trait]
pub trait Deduplicator: Send + Sync {
    /// 按 Email > Phone > NameAddress 优先级判定 create / update / skip_duplicate
    ///
    /// 库内命中优先于批内命中
    async fn resolve(
        &self,
        org_id: &str,
        record: &ValidatedLeadRecord,
        batch_seen: &BatchSeen,
    ) -> ImportResult<DedupDecision>;
}

// ==========================================
// LeadImporter Trait
// ==========================================
// 用途: 导入主接口
// 实现者: LeadImporterImpl
#[async_trait]
pub trait LeadImporter: Send + Sync {
    /// 预览（无副作用，可重复调用）
    ///
    /// # 参数
    /// - mapping: 调用方映射；None 时使用默认方案 + 启发式建议
    ///
    /// # 返回
    /// - Err(MappingConflict): 映射冲突
    /// - Err(来源错误): 数据源不可读
    async fn preview(
        &self,
        ctx: &ImportContext,
        source: &ImportSource,
        mapping: Option<&RawFieldMapping>,
    ) -> ImportResult<PreviewResult>;

    /// 执行导入
    ///
    /// # 流程
    /// 1. 校验映射（冲突则直接拒绝，不创建 ImportRun）
    /// 2. 创建 ImportRun（queued → running）
    /// 3. 读取数据源（失败则 ImportRun → failed）
    /// 4. 逐行: 校验 → 去重 → 写入（写入时复核）
    /// 5. ImportRun → completed
    async fn execute(
        &self,
        ctx: &ImportContext,
        source: &ImportSource,
        mapping: &RawFieldMapping,
        options: &ImportOptions,
    ) -> ImportResult<ImportRunResult>;
}
