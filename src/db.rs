// ==========================================
// 线索导入系统 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发导入时的偶发 busy 错误
// - ensure_schema 幂等建表（可重复执行）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "LEAD_INTAKE_DB_PATH";

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 建表（幂等）并登记 schema_version
///
/// lead 表的业务列名与 CanonicalField::as_str() 一一对应
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
          version INTEGER PRIMARY KEY,
          applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
          scope_id TEXT NOT NULL DEFAULT 'global',
          key TEXT NOT NULL,
          value TEXT NOT NULL,
          updated_at TEXT NOT NULL DEFAULT (datetime('now')),
          PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS lead (
          lead_id TEXT PRIMARY KEY,
          org_id TEXT NOT NULL,

          first_name TEXT,
          last_name TEXT,
          home_email TEXT,
          work_email TEXT,
          mobile_phone TEXT,
          home_phone TEXT,
          work_phone TEXT,

          property_street TEXT,
          property_city TEXT,
          property_state TEXT,
          property_zip TEXT,
          property_county TEXT,
          property_type TEXT,
          occupancy TEXT,

          estimated_value REAL,
          loan_amount REAL,
          loan_type TEXT,
          loan_purpose TEXT,
          fico_score REAL,
          current_rate REAL,
          current_balance REAL,
          monthly_rental_income REAL,

          source TEXT,
          notes TEXT,
          zillow_link TEXT,

          email_key TEXT,
          phone_key TEXT,
          name_address_key TEXT,
          name_key TEXT,

          last_import_run_id TEXT,
          created_date TEXT NOT NULL,
          updated_date TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_lead_org_email ON lead(org_id, email_key);
        CREATE INDEX IF NOT EXISTS idx_lead_org_phone ON lead(org_id, phone_key);
        CREATE INDEX IF NOT EXISTS idx_lead_org_name_address ON lead(org_id, name_address_key);
        CREATE INDEX IF NOT EXISTS idx_lead_org_name ON lead(org_id, name_key);

        CREATE TABLE IF NOT EXISTS import_run (
          run_id TEXT PRIMARY KEY,
          org_id TEXT NOT NULL,
          source_type TEXT NOT NULL,
          source_reference TEXT,
          mapping_json TEXT NOT NULL,
          status TEXT NOT NULL CHECK(status IN ('queued', 'running', 'completed', 'failed')),
          total_rows INTEGER NOT NULL DEFAULT 0,
          imported_count INTEGER NOT NULL DEFAULT 0,
          updated_count INTEGER NOT NULL DEFAULT 0,
          skipped_count INTEGER NOT NULL DEFAULT 0,
          error_count INTEGER NOT NULL DEFAULT 0,
          error_sample_json TEXT NOT NULL DEFAULT '[]',
          error_report_ref TEXT,
          failure_reason TEXT,
          created_by TEXT,
          started_at TEXT NOT NULL,
          finished_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_import_run_org_started ON import_run(org_id, started_at DESC);

        CREATE TABLE IF NOT EXISTS lead_mapping_profile (
          profile_id TEXT PRIMARY KEY,
          org_id TEXT NOT NULL,
          name TEXT NOT NULL,
          mapping_json TEXT NOT NULL,
          is_default INTEGER NOT NULL DEFAULT 0,
          created_by TEXT,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL,
          UNIQUE (org_id, name)
        );

        CREATE TABLE IF NOT EXISTS connector_credential (
          org_id TEXT NOT NULL,
          provider TEXT NOT NULL,
          access_token TEXT NOT NULL,
          expires_at TEXT,
          updated_at TEXT NOT NULL,
          PRIMARY KEY (org_id, provider)
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 打开连接并确保建表（CLI 与集成测试入口）
pub fn open_and_init(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = open_sqlite_connection(db_path)?;
    ensure_schema(&conn)?;

    match read_schema_version(&conn)? {
        Some(v) if v > CURRENT_SCHEMA_VERSION => {
            tracing::warn!(
                db_version = v,
                expected = CURRENT_SCHEMA_VERSION,
                "数据库 schema_version 高于当前程序版本"
            );
        }
        _ => {}
    }
    Ok(conn)
}

/// 解析数据库路径
///
/// 优先级: 显式参数 > LEAD_INTAKE_DB_PATH > 用户数据目录 > 当前目录
pub fn resolve_db_path(explicit: Option<&str>) -> String {
    if let Some(path) = explicit.map(str::trim).filter(|p| !p.is_empty()) {
        return path.to_string();
    }

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./lead_intake.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("lead-intake");
        match std::fs::create_dir_all(&dir) {
            Ok(()) => path = dir.join("lead_intake.db"),
            Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "无法创建数据目录，使用当前目录"),
        }
    }
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();

        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_lead_table_has_column_per_canonical_field() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('lead')").unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for field in crate::domain::CanonicalField::ALL {
            assert!(columns.iter().any(|c| c == field.as_str()), "缺少列 {}", field);
        }
    }

    #[test]
    fn test_resolve_db_path_prefers_explicit() {
        assert_eq!(resolve_db_path(Some(" /tmp/x.db ")), "/tmp/x.db");
        assert!(resolve_db_path(None).ends_with(".db"));
    }
}
