// ==========================================
// 线索导入系统 - 连接器凭据仓储
// ==========================================
// 职责: connector_credential 表读写（私有表格数据源授权）
// 说明: OAuth 授权流程不在本系统内，这里只保存其产物
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::lead_import_repo_impl::{format_ts, parse_ts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

/// Google Sheets 提供方标识
pub const PROVIDER_GOOGLE_SHEETS: &str = "google_sheets";

#[derive(Debug, Clone)]
pub struct ConnectorCredential {
    pub org_id: String,
    pub provider: String,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConnectorCredential {
    /// 有效 = 令牌非空且未过期（无过期时间视为长期有效）
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.trim().is_empty() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

// ==========================================
// ConnectorCredentialProvider Trait
// ==========================================
#[async_trait]
pub trait ConnectorCredentialProvider: Send + Sync {
    /// 返回组织在该提供方下的有效凭据；无凭据或已过期时返回 None
    async fn valid_credential(
        &self,
        org_id: &str,
        provider: &str,
    ) -> RepositoryResult<Option<ConnectorCredential>>;
}

pub struct ConnectorCredentialRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ConnectorCredentialRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入/覆盖凭据
    pub fn upsert(&self, cred: &ConnectorCredential) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO connector_credential (org_id, provider, access_token, expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(org_id, provider) DO UPDATE SET
              access_token = excluded.access_token,
              expires_at = excluded.expires_at,
              updated_at = excluded.updated_at
            "#,
            params![
                cred.org_id,
                cred.provider,
                cred.access_token,
                cred.expires_at.as_ref().map(format_ts),
                format_ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn find(&self, org_id: &str, provider: &str) -> RepositoryResult<Option<ConnectorCredential>> {
        let conn = self.get_conn()?;
        let cred = conn
            .query_row(
                "SELECT org_id, provider, access_token, expires_at FROM connector_credential WHERE org_id = ?1 AND provider = ?2",
                params![org_id, provider],
                |row| {
                    let expires: Option<String> = row.get(3)?;
                    Ok(ConnectorCredential {
                        org_id: row.get(0)?,
                        provider: row.get(1)?,
                        access_token: row.get(2)?,
                        expires_at: expires.as_deref().map(parse_ts).transpose()?,
                    })
                },
            )
            .optional()?;
        Ok(cred)
    }
}

#[async_trait]
impl ConnectorCredentialProvider for ConnectorCredentialRepository {
    async fn valid_credential(
        &self,
        org_id: &str,
        provider: &str,
    ) -> RepositoryResult<Option<ConnectorCredential>> {
        let cred = self.find(org_id, provider)?;
        Ok(cred.filter(|c| c.is_valid_at(Utc::now())))
    }
}
