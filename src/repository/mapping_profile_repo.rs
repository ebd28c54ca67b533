// ==========================================
// 线索导入系统 - 映射方案仓储
// ==========================================
// 职责: lead_mapping_profile 表 CRUD（组织级）
// 约束: 同一组织内 name 唯一；is_default 至多一个
// ==========================================

use crate::domain::mapping::{FieldMapping, MappingProfile};
use crate::domain::types::now_utc;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::lead_import_repo_impl::{format_ts, parse_ts};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// MappingProfileStore Trait
// ==========================================
#[async_trait]
pub trait MappingProfileStore: Send + Sync {
    /// 按 (org_id, name) 新建或覆盖
    ///
    /// is_default = true 时，同组织其他方案的默认标记被清除
    async fn save(
        &self,
        org_id: &str,
        name: &str,
        mapping: &FieldMapping,
        is_default: bool,
        created_by: Option<&str>,
    ) -> RepositoryResult<MappingProfile>;

    /// 组织内全部方案（默认方案在前，其余按名称）
    async fn list(&self, org_id: &str) -> RepositoryResult<Vec<MappingProfile>>;

    async fn get_default(&self, org_id: &str) -> RepositoryResult<Option<MappingProfile>>;

    /// 显式删除；返回是否存在
    async fn delete(&self, org_id: &str, name: &str) -> RepositoryResult<bool>;
}

const PROFILE_COLUMNS: &str =
    "profile_id, org_id, name, mapping_json, is_default, created_by, created_at, updated_at";

fn map_profile_row(row: &Row) -> rusqlite::Result<MappingProfile> {
    let mapping_json: String = row.get(3)?;
    let mapping: FieldMapping = serde_json::from_str(&mapping_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    Ok(MappingProfile {
        profile_id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        mapping,
        is_default: row.get::<_, i64>(4)? != 0,
        created_by: row.get(5)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub struct MappingProfileRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MappingProfileRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

#[async_trait]
impl MappingProfileStore for MappingProfileRepository {
    async fn save(
        &self,
        org_id: &str,
        name: &str,
        mapping: &FieldMapping,
        is_default: bool,
        created_by: Option<&str>,
    ) -> RepositoryResult<MappingProfile> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RepositoryError::FieldValueError {
                field: "name".to_string(),
                message: "方案名称不能为空".to_string(),
            });
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = format_ts(&now_utc());

        if is_default {
            tx.execute(
                "UPDATE lead_mapping_profile SET is_default = 0 WHERE org_id = ?1 AND name <> ?2",
                params![org_id, name],
            )?;
        }

        tx.execute(
            r#"
            INSERT INTO lead_mapping_profile (
              profile_id, org_id, name, mapping_json, is_default, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(org_id, name) DO UPDATE SET
              mapping_json = excluded.mapping_json,
              is_default = excluded.is_default,
              updated_at = excluded.updated_at
            "#,
            params![
                uuid::Uuid::new_v4().to_string(),
                org_id,
                name,
                serde_json::to_string(mapping)?,
                if is_default { 1 } else { 0 },
                created_by,
                now,
            ],
        )?;

        let sql = format!(
            "SELECT {} FROM lead_mapping_profile WHERE org_id = ?1 AND name = ?2",
            PROFILE_COLUMNS
        );
        let profile = tx.query_row(&sql, params![org_id, name], map_profile_row)?;
        tx.commit()?;

        tracing::info!(org_id, name, is_default, "映射方案已保存");
        Ok(profile)
    }

    async fn list(&self, org_id: &str) -> RepositoryResult<Vec<MappingProfile>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM lead_mapping_profile WHERE org_id = ?1 ORDER BY is_default DESC, name ASC",
            PROFILE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let profiles = stmt
            .query_map(params![org_id], map_profile_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(profiles)
    }

    async fn get_default(&self, org_id: &str) -> RepositoryResult<Option<MappingProfile>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM lead_mapping_profile WHERE org_id = ?1 AND is_default = 1 LIMIT 1",
            PROFILE_COLUMNS
        );
        let profile = conn
            .query_row(&sql, params![org_id], map_profile_row)
            .optional()?;
        Ok(profile)
    }

    async fn delete(&self, org_id: &str, name: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "DELETE FROM lead_mapping_profile WHERE org_id = ?1 AND name = ?2",
            params![org_id, name.trim()],
        )?;
        Ok(changed > 0)
    }
}
