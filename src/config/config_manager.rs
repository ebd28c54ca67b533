// ==========================================
// 线索导入系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::{
    ImportConfigReader, SheetsSettings, DEFAULT_ERROR_SAMPLE_CAP, DEFAULT_HTTP_RETRY_MAX_ATTEMPTS,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_MAX_IMPORT_ROWS, DEFAULT_PREVIEW_ROW_LIMIT,
    DEFAULT_SHEETS_API_BASE, DEFAULT_SHEETS_EXPORT_BASE,
};
use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 所有 global 配置（按 key 排序）
    pub fn list_global_config(&self) -> RepositoryResult<BTreeMap<String, String>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut map = BTreeMap::new();
        for row in rows {
            let (k, v) = row?;
            map.insert(k, v);
        }
        Ok(map)
    }

    /// 读取并解析配置；缺失或格式错误时返回默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr + Copy + std::fmt::Display,
    {
        match self.get_global_config_value(key)? {
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    tracing::warn!(
                        config_key = key,
                        raw_value = %raw,
                        default = %default,
                        "配置格式错误，使用默认值"
                    );
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    fn get_string_or_default(&self, key: &str, default: &str) -> RepositoryResult<String> {
        Ok(self
            .get_global_config_value(key)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string()))
    }
}

// ==========================================
// ImportConfigReader 实现
// ==========================================
#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_error_sample_cap(&self) -> RepositoryResult<usize> {
        self.get_parsed_or_default(config_keys::ERROR_SAMPLE_CAP, DEFAULT_ERROR_SAMPLE_CAP)
    }

    async fn get_preview_row_limit(&self) -> RepositoryResult<usize> {
        self.get_parsed_or_default(config_keys::PREVIEW_ROW_LIMIT, DEFAULT_PREVIEW_ROW_LIMIT)
    }

    async fn get_max_import_rows(&self) -> RepositoryResult<usize> {
        self.get_parsed_or_default(config_keys::MAX_IMPORT_ROWS, DEFAULT_MAX_IMPORT_ROWS)
    }

    async fn get_sheets_settings(&self) -> RepositoryResult<SheetsSettings> {
        Ok(SheetsSettings {
            api_base: self.get_string_or_default(config_keys::SHEETS_API_BASE, DEFAULT_SHEETS_API_BASE)?,
            export_base: self
                .get_string_or_default(config_keys::SHEETS_EXPORT_BASE, DEFAULT_SHEETS_EXPORT_BASE)?,
            timeout_secs: self
                .get_parsed_or_default(config_keys::HTTP_TIMEOUT_SECS, DEFAULT_HTTP_TIMEOUT_SECS)?,
            retry_max_attempts: self.get_parsed_or_default(
                config_keys::HTTP_RETRY_MAX_ATTEMPTS,
                DEFAULT_HTTP_RETRY_MAX_ATTEMPTS,
            )?,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 导入
    pub const ERROR_SAMPLE_CAP: &str = "error_sample_cap";
    pub const PREVIEW_ROW_LIMIT: &str = "preview_row_limit";
    pub const MAX_IMPORT_ROWS: &str = "max_import_rows";

    // 表格数据源
    pub const SHEETS_API_BASE: &str = "sheets_api_base";
    pub const SHEETS_EXPORT_BASE: &str = "sheets_export_base";
    pub const HTTP_TIMEOUT_SECS: &str = "http_timeout_secs";
    pub const HTTP_RETRY_MAX_ATTEMPTS: &str = "http_retry_max_attempts";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::import_config_trait::ImportSettings;
    use crate::db::ensure_schema;

    fn setup() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_when_missing() {
        let cfg = setup();
        assert_eq!(cfg.load_import_settings().await.unwrap(), ImportSettings::default());
        assert_eq!(cfg.get_sheets_settings().await.unwrap(), SheetsSettings::default());
    }

    #[tokio::test]
    async fn test_override_and_fallback_on_garbage() {
        let cfg = setup();
        cfg.set_global_config_value(config_keys::PREVIEW_ROW_LIMIT, "10").unwrap();
        cfg.set_global_config_value(config_keys::ERROR_SAMPLE_CAP, "lots").unwrap();

        assert_eq!(cfg.get_preview_row_limit().await.unwrap(), 10);
        assert_eq!(cfg.get_error_sample_cap().await.unwrap(), DEFAULT_ERROR_SAMPLE_CAP);

        cfg.set_global_config_value(config_keys::SHEETS_API_BASE, "http://127.0.0.1:9").unwrap();
        let sheets = cfg.get_sheets_settings().await.unwrap();
        assert_eq!(sheets.api_base, "http://127.0.0.1:9");
        assert_eq!(cfg.list_global_config().unwrap().len(), 3);
    }
}
