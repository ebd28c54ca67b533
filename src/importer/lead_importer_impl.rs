// ==========================================
// 线索导入系统 - 导入执行器实现
// ==========================================
// 职责: 串联导入管道，维护 ImportRun 审计记录
// 流程: 映射校验 → 建 ImportRun → 读源 → 逐行(校验 → 去重 → 写入) → 终结
// 红线:
// - 映射冲突在建 ImportRun 之前拒绝
// - 行级问题不中断批次；来源错误使 ImportRun → failed
// - 行按源顺序串行处理（批内首次出现者生效依赖顺序）
// ==========================================

use crate::config::ImportConfigReader;
use crate::domain::import_run::{
    ImportContext, ImportCounters, ImportRun, ImportRunResult, PreviewResult, RowError,
    RowErrorKind, RowOutcome,
};
use crate::domain::lead::{DedupKey, Lead, ValidatedLeadRecord};
use crate::domain::mapping::{FieldMapping, RawFieldMapping};
use crate::domain::types::{CanonicalField, ImportRunStatus};
use crate::importer::deduplicator::{decide, BatchSeen, DedupAction, LeadDeduplicator};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::LeadFieldMapper;
use crate::importer::lead_importer_trait::{
    Deduplicator, FieldMapper, ImportOptions, ImportSource, LeadImporter, RowValidator,
    SourceReader, SourceRow,
};
use crate::importer::row_validator::LeadRowValidator;
use crate::repository::lead_import_repo::{InsertOutcome, LeadImportRepository, RunFinalization};
use crate::repository::mapping_profile_repo::MappingProfileStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// 写入冲突（SQLITE_BUSY / 唯一约束）的最大尝试次数
const WRITE_CONFLICT_ATTEMPTS: u32 = 3;

// ==========================================
// RunAccumulator - 批次累计（计数 + 有界错误样本）
// ==========================================
struct RunAccumulator {
    counters: ImportCounters,
    error_sample: Vec<RowError>,
    sample_cap: usize,
    outcomes: Vec<(usize, RowOutcome)>,
}

impl RunAccumulator {
    fn new(total_rows: usize, sample_cap: usize) -> Self {
        Self {
            counters: ImportCounters {
                total_rows,
                ..ImportCounters::default()
            },
            error_sample: Vec::new(),
            sample_cap,
            outcomes: Vec::with_capacity(total_rows),
        }
    }

    fn push(&mut self, row_index: usize, outcome: RowOutcome, row_error: Option<RowError>) {
        self.counters.record(&outcome);
        if let Some(err) = row_error {
            // 超出上限后只计数不入样本
            if self.error_sample.len() < self.sample_cap {
                self.error_sample.push(err);
            }
        }
        self.outcomes.push((row_index, outcome));
    }
}

fn contact_conflict_message(key: &DedupKey) -> String {
    match key {
        DedupKey::Phone(_) => format!("电话 {} 已属于其他线索，保留原电话", key.value()),
        _ => format!("邮箱 {} 已属于其他线索，保留原邮箱", key.value()),
    }
}

// ==========================================
// LeadImporterImpl
// ==========================================
pub struct LeadImporterImpl<R, C>
where
    R: LeadImportRepository + 'static,
    C: ImportConfigReader,
{
    // 数据访问层
    repo: Arc<R>,
    profiles: Arc<dyn MappingProfileStore>,

    // 配置读取器
    config: C,

    // 管道组件
    source_reader: Box<dyn SourceReader>,
    field_mapper: LeadFieldMapper,
    row_validator: Box<dyn RowValidator>,
    deduplicator: Box<dyn Deduplicator>,
}

impl<R, C> LeadImporterImpl<R, C>
where
    R: LeadImportRepository + 'static,
    C: ImportConfigReader,
{
    /// 创建导入执行器（校验器与去重器使用默认实现）
    pub fn new(
        repo: Arc<R>,
        profiles: Arc<dyn MappingProfileStore>,
        config: C,
        source_reader: Box<dyn SourceReader>,
    ) -> Self {
        let deduplicator = Box::new(LeadDeduplicator::new(repo.clone()));
        Self {
            repo,
            profiles,
            config,
            source_reader,
            field_mapper: LeadFieldMapper,
            row_validator: Box::new(LeadRowValidator::new()),
            deduplicator,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    /// 建议映射: 默认方案中仍存在的表头优先，其余按别名补齐
    async fn suggested_mapping(&self, org_id: &str, headers: &[String]) -> ImportResult<FieldMapping> {
        let base = self
            .profiles
            .get_default(org_id)
            .await?
            .map(|p| p.mapping)
            .unwrap_or_default();
        if !base.is_empty() {
            debug!(org_id, base_fields = base.len(), "使用默认映射方案预填");
        }
        Ok(self.field_mapper.suggest_with_base(headers, &base))
    }

    /// 单行: 校验 → 去重 → 写入
    ///
    /// # 返回
    /// - Ok((outcome, row_error)): 行级结果（行级问题不是 Err）
    /// - Err: 存储层故障（中断批次）
    async fn process_row(
        &self,
        ctx: &ImportContext,
        run_id: &str,
        row: &SourceRow,
        mapping: &FieldMapping,
        options: &ImportOptions,
        batch_seen: &mut BatchSeen,
    ) -> ImportResult<(RowOutcome, Option<RowError>)> {
        let record = match self.row_validator.validate(row, mapping, options) {
            Ok(record) => record,
            Err(row_error) => {
                debug!(row_index = row.row_index, code = row_error.code(), "行校验未通过，跳过");
                let outcome = RowOutcome::Skipped {
                    reason: row_error.code().to_string(),
                };
                return Ok((outcome, Some(row_error)));
            }
        };

        let keys = record.dedup_keys();
        let decision = self
            .deduplicator
            .resolve(&ctx.org_id, &record, batch_seen)
            .await?;

        let (lead_id, created, withheld) = match decision.action {
            DedupAction::SkipDuplicate => {
                let first_row = decision.first_row.unwrap_or(row.row_index);
                let label = decision.matched_key.as_ref().map_or("key", |k| k.label());
                debug!(row_index = row.row_index, first_row, "批内重复，跳过");
                let row_error = RowError::new(
                    row.row_index,
                    RowErrorKind::DuplicateInBatch,
                    format!("与第 {} 行重复（{}），已跳过", first_row, label),
                );
                return Ok((RowOutcome::DuplicateInBatch { first_row }, Some(row_error)));
            }
            DedupAction::Update => {
                let lead_id = decision.existing_lead_id.ok_or_else(|| {
                    ImportError::InternalError("update 判定缺少目标 Lead".to_string())
                })?;
                let merged = self
                    .repo
                    .merge_into_lead(&ctx.org_id, &lead_id, &record.fields, run_id)
                    .await?;
                (lead_id, false, merged.withheld)
            }
            DedupAction::Create => self.create_or_merge(ctx, run_id, &record).await?,
        };

        batch_seen.record(&keys, row.row_index);

        if record.has_warnings() || !withheld.is_empty() {
            let kind = if record.has_warnings() {
                RowErrorKind::InvalidEmail
            } else {
                RowErrorKind::ContactConflict
            };
            let mut messages = record.warnings.clone();
            messages.extend(withheld.iter().map(|key| {
                debug!(row_index = row.row_index, key = key.label(), "联系方式已属于其他线索，保留原值");
                contact_conflict_message(key)
            }));
            let warning = messages.join("; ");
            let row_error = RowError::new(row.row_index, kind, warning.clone());
            return Ok((
                RowOutcome::ImportedWithWarning {
                    lead_id,
                    created,
                    warning,
                },
                Some(row_error),
            ));
        }

        let outcome = if created {
            RowOutcome::Created { lead_id }
        } else {
            RowOutcome::Updated { lead_id }
        };
        Ok((outcome, None))
    }

    /// 新建；写入时发现并发导入已建同键 Lead → 转为合并更新
    async fn create_or_merge(
        &self,
        ctx: &ImportContext,
        run_id: &str,
        record: &ValidatedLeadRecord,
    ) -> ImportResult<(String, bool, Vec<DedupKey>)> {
        let lead = Lead::new(&ctx.org_id, record.fields.clone(), Some(run_id.to_string()));

        let mut attempt = 1;
        let outcome = loop {
            match self.repo.insert_lead_unless_matched(&lead).await {
                Ok(outcome) => break outcome,
                Err(e) if e.is_write_conflict() && attempt < WRITE_CONFLICT_ATTEMPTS => {
                    warn!(row_index = record.row_index, attempt, error = %e, "写入冲突，重试");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        match outcome {
            InsertOutcome::Inserted { lead_id } => Ok((lead_id, true, Vec::new())),
            InsertOutcome::Matched(m) => {
                warn!(
                    row_index = record.row_index,
                    lead_id = %m.lead_id,
                    key = m.key.label(),
                    "写入时发现同键 Lead，改为更新"
                );
                let merged = self
                    .repo
                    .merge_into_lead(&ctx.org_id, &m.lead_id, &record.fields, run_id)
                    .await?;
                Ok((m.lead_id, false, merged.withheld))
            }
        }
    }

    /// ImportRun → failed（终结失败只记日志，返回原始错误）
    async fn fail_run(&self, run_id: &str, counters: ImportCounters, error_sample: Vec<RowError>, cause: &ImportError) {
        if cause.is_source_error() {
            warn!(run_id, error = %cause, "数据源不可读，ImportRun 终结为 failed");
        } else {
            error!(run_id, processed = counters.processed(), error = %cause, "批次中断，ImportRun 终结为 failed");
        }
        let fin = RunFinalization {
            status: ImportRunStatus::Failed,
            counters,
            error_sample,
            error_report_ref: None,
            failure_reason: Some(cause.to_string()),
        };
        if let Err(e) = self.repo.finalize_run(run_id, fin).await {
            error!(run_id, error = %e, "ImportRun 标记失败时出错");
        }
    }
}

#[async_trait]
impl<R, C> LeadImporter for LeadImporterImpl<R, C>
where
    R: LeadImportRepository + 'static,
    C: ImportConfigReader,
{
    #[instrument(skip(self, ctx, source, mapping), fields(org_id = %ctx.org_id))]
    async fn preview(
        &self,
        ctx: &ImportContext,
        source: &ImportSource,
        mapping: Option<&RawFieldMapping>,
    ) -> ImportResult<PreviewResult> {
        let row_limit = self.config.get_preview_row_limit().await?;
        let table = self.source_reader.read(ctx, source).await?;

        let suggested_mapping = self.suggested_mapping(&ctx.org_id, &table.headers).await?;
        let effective = match mapping {
            Some(raw) => self.field_mapper.validate(raw, &CanonicalField::ALL)?,
            None => suggested_mapping.clone(),
        };

        let sample: Vec<&SourceRow> = table.rows.iter().take(row_limit).collect();
        let options = ImportOptions::default();

        let mut validation_errors = Vec::new();
        let mut valid_rows = 0;
        let mut problem_rows = 0;
        let mut would_create = 0;
        let mut would_update = 0;
        let mut duplicates_in_sample = 0;
        let mut seen = BatchSeen::new();

        for row in &sample {
            let record = match self.row_validator.validate(row, &effective, &options) {
                Ok(record) => record,
                Err(row_error) => {
                    problem_rows += 1;
                    validation_errors.push(row_error);
                    continue;
                }
            };

            if record.has_warnings() {
                problem_rows += 1;
                validation_errors.push(RowError::new(
                    record.row_index,
                    RowErrorKind::InvalidEmail,
                    record.warnings.join("; "),
                ));
            } else {
                valid_rows += 1;
            }

            // 只读预估，不落库
            let keys = record.dedup_keys();
            let existing = if keys.is_empty() {
                None
            } else {
                self.repo.find_first_match(&ctx.org_id, &keys).await?
            };
            match decide(&keys, existing, &seen).action {
                DedupAction::Create => would_create += 1,
                DedupAction::Update => would_update += 1,
                DedupAction::SkipDuplicate => duplicates_in_sample += 1,
            }
            seen.record(&keys, record.row_index);
        }

        info!(
            total_rows = table.total_rows(),
            sample_rows = sample.len(),
            valid_rows,
            problem_rows,
            "预览完成"
        );

        Ok(PreviewResult {
            headers: table.headers.clone(),
            rows: sample.iter().map(|r| r.values.clone()).collect(),
            total_rows: table.total_rows(),
            suggested_mapping,
            validation_errors,
            valid_rows,
            problem_rows,
            would_create,
            would_update,
            duplicates_in_sample,
            lead_fields: CanonicalField::ALL.to_vec(),
        })
    }

    #[instrument(skip(self, ctx, source, mapping, options), fields(org_id = %ctx.org_id, run_id))]
    async fn execute(
        &self,
        ctx: &ImportContext,
        source: &ImportSource,
        mapping: &RawFieldMapping,
        options: &ImportOptions,
    ) -> ImportResult<ImportRunResult> {
        let start_time = Instant::now();

        // === 步骤 1: 映射校验（不建 ImportRun）===
        let mapping = self.field_mapper.validate(mapping, &CanonicalField::ALL)?;
        if mapping.is_empty() {
            return Err(ImportError::EmptyMapping);
        }
        let settings = self.config.load_import_settings().await?;

        // === 步骤 2: 创建 ImportRun ===
        let run = ImportRun::new(ctx, source.source_type(), source.reference(), mapping.clone());
        let run_id = run.run_id.clone();
        tracing::Span::current().record("run_id", run_id.as_str());

        self.repo.insert_run(&run).await?;
        self.repo.mark_running(&run_id).await?;
        info!(
            source_type = source.source_type().as_str(),
            mapped_fields = mapping.len(),
            "开始导入线索"
        );

        // === 步骤 3: 读取数据源 ===
        let table = match self.source_reader.read(ctx, source).await {
            Ok(table) => table,
            Err(e) => {
                self.fail_run(&run_id, ImportCounters::default(), Vec::new(), &e)
                    .await;
                return Err(e);
            }
        };

        let total_rows = table.total_rows();
        if total_rows > settings.max_import_rows {
            let e = ImportError::TooManyRows {
                rows: total_rows,
                limit: settings.max_import_rows,
            };
            self.fail_run(&run_id, ImportCounters::default(), Vec::new(), &e)
                .await;
            return Err(e);
        }
        self.repo.set_total_rows(&run_id, total_rows).await?;
        info!(total_rows, "数据源读取完成");

        // === 步骤 4: 逐行处理 ===
        let mut acc = RunAccumulator::new(total_rows, settings.error_sample_cap);
        let mut batch_seen = BatchSeen::new();

        for row in &table.rows {
            match self
                .process_row(ctx, &run_id, row, &mapping, options, &mut batch_seen)
                .await
            {
                Ok((outcome, row_error)) => acc.push(row.row_index, outcome, row_error),
                Err(e) => {
                    // 已提交的行保留，计数反映到失败的 ImportRun 上
                    warn!(row_index = row.row_index, "行写入失败，批次中止");
                    self.fail_run(&run_id, acc.counters, acc.error_sample, &e)
                        .await;
                    return Err(e);
                }
            }
        }

        // === 步骤 5: 终结 ImportRun ===
        let counters = acc.counters;
        let error_report_ref = if counters.error_count > 0 {
            Some(ImportRun::error_report_ref_for(&run_id))
        } else {
            None
        };
        self.repo
            .finalize_run(
                &run_id,
                RunFinalization {
                    status: ImportRunStatus::Completed,
                    counters,
                    error_sample: acc.error_sample.clone(),
                    error_report_ref,
                    failure_reason: None,
                },
            )
            .await?;

        info!(
            imported = counters.imported_count,
            updated = counters.updated_count,
            skipped = counters.skipped_count,
            errors = counters.error_count,
            batch_dedup_keys = batch_seen.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "导入完成"
        );

        Ok(ImportRunResult {
            success: true,
            import_run_id: run_id,
            imported: counters.imported_count,
            updated: counters.updated_count,
            skipped: counters.skipped_count,
            errors: counters.error_count,
            error_details: acc.error_sample,
            outcomes: acc.outcomes,
        })
    }
}
