// ==========================================
// 线索导入系统 - 导入 Repository 实现
// ==========================================
// 职责: 实现 Lead / ImportRun 数据访问（使用 rusqlite）
// 红线: Repository 不含业务规则，只做数据 CRUD
// 并发: 写入时复核 + 合并更新均在 IMMEDIATE 事务中完成
// ==========================================

use crate::db::{ensure_schema, open_sqlite_connection};
use crate::domain::import_run::{ImportCounters, ImportRun, RowError};
use crate::domain::lead::{index_keys, DedupKey, FieldValue, Lead, LeadFieldMap};
use crate::domain::mapping::FieldMapping;
use crate::domain::types::{now_utc, CanonicalField, ImportRunStatus, SourceType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::lead_import_repo::{
    InsertOutcome, LeadImportRepository, LeadMatch, MergeOutcome, RunFinalization,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// 时间与列辅助函数
// ==========================================

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// lead 表全部列（顺序与 map_lead_row / lead_values 一致）
fn lead_columns() -> Vec<&'static str> {
    let mut cols = Vec::with_capacity(CanonicalField::ALL.len() + 8);
    cols.push("lead_id");
    cols.push("org_id");
    cols.extend(CanonicalField::ALL.iter().map(|f| f.as_str()));
    cols.extend([
        "email_key",
        "phone_key",
        "name_address_key",
        "name_key",
        "last_import_run_id",
        "created_date",
        "updated_date",
    ]);
    cols
}

fn key_value(keys: &[DedupKey], column: &str) -> Value {
    keys.iter()
        .find(|k| k.column() == column)
        .map(|k| Value::Text(k.value().to_string()))
        .unwrap_or(Value::Null)
}

fn lead_values(lead: &Lead) -> Vec<Value> {
    let keys = lead.index_keys();
    let mut values = Vec::with_capacity(CanonicalField::ALL.len() + 8);
    values.push(Value::Text(lead.lead_id.clone()));
    values.push(Value::Text(lead.org_id.clone()));

    for field in CanonicalField::ALL {
        let v = match lead.fields.get(&field) {
            Some(FieldValue::Number(n)) => Value::Real(*n),
            Some(FieldValue::Text(s)) if !s.trim().is_empty() => Value::Text(s.clone()),
            _ => Value::Null,
        };
        values.push(v);
    }

    values.push(key_value(&keys, "email_key"));
    values.push(key_value(&keys, "phone_key"));
    values.push(key_value(&keys, "name_address_key"));
    values.push(key_value(&keys, "name_key"));
    values.push(
        lead.last_import_run_id
            .clone()
            .map(Value::Text)
            .unwrap_or(Value::Null),
    );
    values.push(Value::Text(format_ts(&lead.created_date)));
    values.push(Value::Text(format_ts(&lead.updated_date)));
    values
}

fn map_lead_row(row: &Row) -> rusqlite::Result<Lead> {
    let mut fields = LeadFieldMap::new();
    for (i, field) in CanonicalField::ALL.iter().enumerate() {
        let idx = i + 2;
        if field.is_numeric() {
            if let Some(n) = row.get::<_, Option<f64>>(idx)? {
                fields.insert(*field, FieldValue::Number(n));
            }
        } else if let Some(s) = row.get::<_, Option<String>>(idx)? {
            fields.insert(*field, FieldValue::Text(s));
        }
    }

    let base = CanonicalField::ALL.len() + 2 + 4;
    let created: String = row.get(base + 1)?;
    let updated: String = row.get(base + 2)?;

    Ok(Lead {
        lead_id: row.get(0)?,
        org_id: row.get(1)?,
        fields,
        last_import_run_id: row.get(base)?,
        created_date: parse_ts(&created)?,
        updated_date: parse_ts(&updated)?,
    })
}

fn find_first_match_in(
    conn: &Connection,
    org_id: &str,
    keys: &[DedupKey],
) -> RepositoryResult<Option<LeadMatch>> {
    for key in keys {
        // key.column() 为固定列名，不来自外部输入
        let sql = format!(
            "SELECT lead_id FROM lead WHERE org_id = ?1 AND {} = ?2 ORDER BY created_date ASC, rowid ASC LIMIT 1",
            key.column()
        );
        let found: Option<String> = conn
            .query_row(&sql, params![org_id, key.value()], |row| row.get(0))
            .optional()?;

        if let Some(lead_id) = found {
            return Ok(Some(LeadMatch {
                lead_id,
                key: key.clone(),
            }));
        }
    }
    Ok(None)
}

/// 键是否已被同组织的其他线索占用
fn key_taken_by_other(
    conn: &Connection,
    org_id: &str,
    key: &DedupKey,
    lead_id: &str,
) -> RepositoryResult<bool> {
    let sql = format!(
        "SELECT 1 FROM lead WHERE org_id = ?1 AND {} = ?2 AND lead_id <> ?3 LIMIT 1",
        key.column()
    );
    let taken = conn
        .query_row(&sql, params![org_id, key.value(), lead_id], |_| Ok(()))
        .optional()?;
    Ok(taken.is_some())
}

fn load_lead_in(conn: &Connection, org_id: &str, lead_id: &str) -> RepositoryResult<Option<Lead>> {
    let sql = format!(
        "SELECT {} FROM lead WHERE org_id = ?1 AND lead_id = ?2",
        lead_columns().join(", ")
    );
    let lead = conn
        .query_row(&sql, params![org_id, lead_id], map_lead_row)
        .optional()?;
    Ok(lead)
}

fn insert_lead_in(conn: &Connection, lead: &Lead) -> RepositoryResult<()> {
    let cols = lead_columns();
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO lead ({}) VALUES ({})",
        cols.join(", "),
        placeholders.join(", ")
    );
    conn.execute(&sql, params_from_iter(lead_values(lead)))?;
    Ok(())
}

fn update_lead_in(conn: &Connection, lead: &Lead) -> RepositoryResult<()> {
    let cols = lead_columns();
    // lead_id 作为 WHERE 条件（?1），其余列依次 SET
    let sets: Vec<String> = cols
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, c)| format!("{} = ?{}", c, i + 1))
        .collect();
    let sql = format!("UPDATE lead SET {} WHERE lead_id = ?1", sets.join(", "));
    conn.execute(&sql, params_from_iter(lead_values(lead)))?;
    Ok(())
}

// ==========================================
// ImportRun 行映射
// ==========================================

const RUN_COLUMNS: &str = r#"
    run_id, org_id, source_type, source_reference, mapping_json, status,
    total_rows, imported_count, updated_count, skipped_count, error_count,
    error_sample_json, error_report_ref, failure_reason, created_by,
    started_at, finished_at
"#;

fn map_run_row(row: &Row) -> rusqlite::Result<ImportRun> {
    let source_type_raw: String = row.get(2)?;
    let mapping_json: String = row.get(4)?;
    let status_raw: String = row.get(5)?;
    let sample_json: String = row.get(11)?;
    let started: String = row.get(15)?;
    let finished: Option<String> = row.get(16)?;

    let json_err = |idx: usize, e: serde_json::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    };

    let mapping: FieldMapping = serde_json::from_str(&mapping_json).map_err(|e| json_err(4, e))?;
    let error_sample: Vec<RowError> =
        serde_json::from_str(&sample_json).map_err(|e| json_err(11, e))?;

    Ok(ImportRun {
        run_id: row.get(0)?,
        org_id: row.get(1)?,
        source_type: SourceType::parse(&source_type_raw).unwrap_or(SourceType::Csv),
        source_reference: row.get(3)?,
        mapping,
        status: ImportRunStatus::parse(&status_raw),
        counters: ImportCounters {
            total_rows: row.get::<_, i64>(6)? as usize,
            imported_count: row.get::<_, i64>(7)? as usize,
            updated_count: row.get::<_, i64>(8)? as usize,
            skipped_count: row.get::<_, i64>(9)? as usize,
            error_count: row.get::<_, i64>(10)? as usize,
        },
        error_sample,
        error_report_ref: row.get(12)?,
        failure_reason: row.get(13)?,
        created_by: row.get(14)?,
        started_at: parse_ts(&started)?,
        finished_at: finished.as_deref().map(parse_ts).transpose()?,
    })
}

/// 状态谓词未命中时，区分“记录不存在”与“非法状态转换”
fn transition_error(conn: &Connection, run_id: &str, to: &str) -> RepositoryError {
    let current: Result<Option<String>, rusqlite::Error> = conn
        .query_row(
            "SELECT status FROM import_run WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )
        .optional();

    match current {
        Ok(Some(from)) => RepositoryError::InvalidStateTransition {
            from,
            to: to.to_string(),
        },
        Ok(None) => RepositoryError::not_found("ImportRun", run_id),
        Err(e) => e.into(),
    }
}

// ==========================================
// LeadImportRepositoryImpl
// ==========================================
pub struct LeadImportRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl LeadImportRepositoryImpl {
    /// 基于共享连接创建（与其他仓储共用同一连接）
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        let repo = Self { conn };
        if let Err(e) = repo.ensure_tables() {
            tracing::warn!("lead/import_run ensure failed: {}", e);
        }
        repo
    }

    /// 打开数据库文件创建（独立连接）
    pub fn from_path(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn ensure_tables(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        ensure_schema(&conn)?;
        Ok(())
    }
}

#[async_trait]
impl LeadImportRepository for LeadImportRepositoryImpl {
    async fn find_first_match(
        &self,
        org_id: &str,
        keys: &[DedupKey],
    ) -> RepositoryResult<Option<LeadMatch>> {
        let conn = self.get_conn()?;
        find_first_match_in(&conn, org_id, keys)
    }

    async fn get_lead(&self, org_id: &str, lead_id: &str) -> RepositoryResult<Option<Lead>> {
        let conn = self.get_conn()?;
        load_lead_in(&conn, org_id, lead_id)
    }

    async fn list_leads(&self, org_id: &str) -> RepositoryResult<Vec<Lead>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM lead WHERE org_id = ?1 ORDER BY created_date ASC, rowid ASC",
            lead_columns().join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let leads = stmt
            .query_map(params![org_id], map_lead_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(leads)
    }

    async fn count_leads(&self, org_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM lead WHERE org_id = ?1",
            params![org_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn insert_lead_unless_matched(&self, lead: &Lead) -> RepositoryResult<InsertOutcome> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let keys = lead.dedup_keys();
        if let Some(found) = find_first_match_in(&tx, &lead.org_id, &keys)? {
            // 事务未提交即回滚，不产生写入
            return Ok(InsertOutcome::Matched(found));
        }

        insert_lead_in(&tx, lead)?;
        tx.commit()?;

        Ok(InsertOutcome::Inserted {
            lead_id: lead.lead_id.clone(),
        })
    }

    async fn merge_into_lead(
        &self,
        org_id: &str,
        lead_id: &str,
        fields: &LeadFieldMap,
        import_run_id: &str,
    ) -> RepositoryResult<MergeOutcome> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut lead = load_lead_in(&tx, org_id, lead_id)?
            .ok_or_else(|| RepositoryError::not_found("Lead", lead_id))?;

        // 新邮箱/电话已属于其他线索时保留原值，不写入冲突键
        let current_keys = lead.index_keys();
        let mut incoming = fields.clone();
        let mut withheld = Vec::new();
        for key in index_keys(fields) {
            let Some(field) = key.source_field() else {
                continue;
            };
            if current_keys.contains(&key) {
                continue;
            }
            if key_taken_by_other(&tx, org_id, &key, lead_id)? {
                incoming.remove(&field);
                withheld.push(key);
            }
        }

        lead.apply_fields(&incoming, Some(import_run_id));

        update_lead_in(&tx, &lead)?;
        tx.commit()?;

        Ok(MergeOutcome { lead, withheld })
    }

    async fn insert_run(&self, run: &ImportRun) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO import_run (
              run_id, org_id, source_type, source_reference, mapping_json, status,
              total_rows, imported_count, updated_count, skipped_count, error_count,
              error_sample_json, error_report_ref, failure_reason, created_by,
              started_at, finished_at
            ) VALUES (
              ?1, ?2, ?3, ?4, ?5, ?6,
              ?7, ?8, ?9, ?10, ?11,
              ?12, ?13, ?14, ?15,
              ?16, ?17
            )
            "#,
            params![
                run.run_id,
                run.org_id,
                run.source_type.as_str(),
                run.source_reference,
                serde_json::to_string(&run.mapping)?,
                run.status.as_str(),
                run.counters.total_rows as i64,
                run.counters.imported_count as i64,
                run.counters.updated_count as i64,
                run.counters.skipped_count as i64,
                run.counters.error_count as i64,
                serde_json::to_string(&run.error_sample)?,
                run.error_report_ref,
                run.failure_reason,
                run.created_by,
                format_ts(&run.started_at),
                run.finished_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    async fn mark_running(&self, run_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE import_run SET status = 'running' WHERE run_id = ?1 AND status = 'queued'",
            params![run_id],
        )?;
        if changed == 0 {
            return Err(transition_error(&conn, run_id, ImportRunStatus::Running.as_str()));
        }
        Ok(())
    }

    async fn set_total_rows(&self, run_id: &str, total_rows: usize) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "UPDATE import_run SET total_rows = ?2 WHERE run_id = ?1 AND status = 'running'",
            params![run_id, total_rows as i64],
        )?;
        if changed == 0 {
            return Err(transition_error(&conn, run_id, ImportRunStatus::Running.as_str()));
        }
        Ok(())
    }

    async fn finalize_run(&self, run_id: &str, fin: RunFinalization) -> RepositoryResult<()> {
        if !fin.status.is_final() {
            return Err(RepositoryError::InvalidStateTransition {
                from: ImportRunStatus::Running.as_str().to_string(),
                to: fin.status.as_str().to_string(),
            });
        }

        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"
            UPDATE import_run SET
              status = ?2,
              total_rows = ?3,
              imported_count = ?4,
              updated_count = ?5,
              skipped_count = ?6,
              error_count = ?7,
              error_sample_json = ?8,
              error_report_ref = ?9,
              failure_reason = ?10,
              finished_at = ?11
            WHERE run_id = ?1 AND status = 'running'
            "#,
            params![
                run_id,
                fin.status.as_str(),
                fin.counters.total_rows as i64,
                fin.counters.imported_count as i64,
                fin.counters.updated_count as i64,
                fin.counters.skipped_count as i64,
                fin.counters.error_count as i64,
                serde_json::to_string(&fin.error_sample)?,
                fin.error_report_ref,
                fin.failure_reason,
                format_ts(&now_utc()),
            ],
        )?;
        if changed == 0 {
            return Err(transition_error(&conn, run_id, fin.status.as_str()));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> RepositoryResult<Option<ImportRun>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM import_run WHERE run_id = ?1", RUN_COLUMNS);
        let run = conn
            .query_row(&sql, params![run_id], map_run_row)
            .optional()?;
        Ok(run)
    }

    async fn list_runs(&self, org_id: &str, limit: usize) -> RepositoryResult<Vec<ImportRun>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM import_run WHERE org_id = ?1 ORDER BY started_at DESC, rowid DESC LIMIT ?2",
            RUN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let runs = stmt
            .query_map(params![org_id, limit as i64], map_run_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}
