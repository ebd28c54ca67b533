// ==========================================
// 线索导入系统 - 导入 API
// ==========================================
// 职责: 动作式调用入口（action = preview / import / save_mapping / ...）
// 说明: 组织与操作人由 ImportContext 显式传入
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, ImportConfigReader};
use crate::db::open_and_init;
use crate::domain::import_run::{ImportContext, ImportRun, ImportRunResult, PreviewResult};
use crate::domain::mapping::{MappingProfile, RawFieldMapping};
use crate::domain::types::{CanonicalField, SourceType};
use crate::importer::error_report::{error_report_for_run, omitted_error_count};
use crate::importer::field_mapper::LeadFieldMapper;
use crate::importer::lead_importer_trait::{FieldMapper, ImportOptions, ImportSource, LeadImporter};
use crate::importer::sheets_client::{HttpSheetsClient, SheetsClient};
use crate::importer::{LeadImporterImpl, LeadSourceReader};
use crate::repository::connector_credential_repo::{
    ConnectorCredential, ConnectorCredentialRepository,
};
use crate::repository::error::RepositoryError;
use crate::repository::lead_import_repo::LeadImportRepository;
use crate::repository::lead_import_repo_impl::LeadImportRepositoryImpl;
use crate::repository::mapping_profile_repo::{MappingProfileRepository, MappingProfileStore};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const DEFAULT_RUN_LIST_LIMIT: usize = 20;
const MAX_RUN_LIST_LIMIT: usize = 200;

fn default_run_limit() -> usize {
    DEFAULT_RUN_LIST_LIMIT
}

// ==========================================
// 请求结构
// ==========================================

/// 数据源描述（按 source_type 取用对应字段）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// csv | excel | google_sheets
    pub source_type: String,
    /// CSV 原始文本
    #[serde(default)]
    pub data: Option<String>,
    /// 本地文件路径（CSV / Excel）
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    /// 公开表格分享链接
    #[serde(default)]
    pub sheet_url: Option<String>,
    /// 私有表格 ID + 工作表名
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default)]
    pub sheet_name: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl SourceDescriptor {
    pub fn csv_text(data: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Csv.as_str().to_string(),
            data: Some(data.into()),
            ..Self::default()
        }
    }

    /// 转换为导入源（只校验描述，不读取文件）
    pub fn into_source(self) -> ApiResult<ImportSource> {
        let source_type = SourceType::parse(&self.source_type).ok_or_else(|| {
            ApiError::InvalidInput(format!(
                "不支持的 source_type: {}（应为 csv / excel / google_sheets）",
                self.source_type
            ))
        })?;

        let file_path = non_blank(&self.file_path).map(PathBuf::from);

        match source_type {
            SourceType::Csv => match (self.data, file_path) {
                (Some(data), _) => Ok(ImportSource::Csv {
                    data,
                    file_name: self.file_name,
                }),
                (None, Some(path)) => Ok(ImportSource::CsvFile {
                    path,
                    file_name: self.file_name,
                }),
                (None, None) => Err(ApiError::InvalidInput(
                    "csv 数据源需要 data 或 file_path".to_string(),
                )),
            },
            SourceType::Excel => {
                let path = file_path.ok_or_else(|| {
                    ApiError::InvalidInput("excel 数据源需要 file_path".to_string())
                })?;
                Ok(ImportSource::ExcelFile {
                    path,
                    file_name: self.file_name,
                    sheet_name: non_blank(&self.sheet_name).map(str::to_string),
                })
            }
            SourceType::GoogleSheets => {
                if let Some(url) = non_blank(&self.sheet_url) {
                    return Ok(ImportSource::GoogleSheetsPublic {
                        sheet_url: url.to_string(),
                    });
                }
                match (non_blank(&self.spreadsheet_id), non_blank(&self.sheet_name)) {
                    (Some(id), Some(sheet)) => Ok(ImportSource::GoogleSheetsPrivate {
                        spreadsheet_id: id.to_string(),
                        sheet_name: sheet.to_string(),
                    }),
                    _ => Err(ApiError::InvalidInput(
                        "google_sheets 数据源需要 sheet_url，或 spreadsheet_id + sheet_name".to_string(),
                    )),
                }
            }
        }
    }
}

/// save_mapping 的映射参数: JSON 对象或 JSON 字符串
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingJson {
    Object(RawFieldMapping),
    Text(String),
}

impl MappingJson {
    pub fn into_raw(self) -> ApiResult<RawFieldMapping> {
        match self {
            MappingJson::Object(map) => Ok(map),
            MappingJson::Text(text) => serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidInput(format!("mapping_json 解析失败: {}", e))),
        }
    }
}

/// 动作式请求
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ImportRequest {
    Preview {
        #[serde(flatten)]
        source: SourceDescriptor,
        #[serde(default)]
        mapping: Option<RawFieldMapping>,
    },
    Import {
        #[serde(flatten)]
        source: SourceDescriptor,
        mapping: RawFieldMapping,
        #[serde(default)]
        skip_validation: bool,
    },
    SaveMapping {
        name: String,
        mapping_json: MappingJson,
        #[serde(default)]
        is_default: bool,
    },
    ListMappings,
    DeleteMapping {
        name: String,
    },
    GetImportRun {
        import_run_id: String,
    },
    ListImportRuns {
        #[serde(default = "default_run_limit")]
        limit: usize,
    },
    ExportErrorReport {
        import_run_id: String,
    },
}

// ==========================================
// 响应结构
// ==========================================

/// 错误报告导出响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReportResponse {
    pub import_run_id: String,
    pub file_name: String,
    /// CSV 内容（表头 Row,Error）
    pub csv: String,
    /// 报告中逐行列出的错误数
    pub listed_errors: usize,
    /// 超出样本上限、未逐行列出的错误数
    pub omitted_errors: usize,
}

// ==========================================
// ImportApi
// ==========================================
type LeadImporterService = LeadImporterImpl<LeadImportRepositoryImpl, ConfigManager>;

pub struct ImportApi {
    importer: LeadImporterService,
    runs: Arc<LeadImportRepositoryImpl>,
    profiles: Arc<MappingProfileRepository>,
    credentials: Arc<ConnectorCredentialRepository>,
    field_mapper: LeadFieldMapper,
}

impl ImportApi {
    /// 打开数据库并装配 HTTP 表格客户端
    pub async fn open(db_path: &str) -> ApiResult<Self> {
        let conn = open_and_init(db_path).map_err(RepositoryError::from)?;
        let conn = Arc::new(Mutex::new(conn));

        let config = ConfigManager::from_connection(conn.clone())?;
        let sheets_settings = config.get_sheets_settings().await?;
        let sheets = HttpSheetsClient::new(sheets_settings)?;

        Self::with_sheets_client(conn, Arc::new(sheets))
    }

    /// 使用指定表格客户端装配（测试中注入桩实现）
    pub fn with_sheets_client(
        conn: Arc<Mutex<Connection>>,
        sheets: Arc<dyn SheetsClient>,
    ) -> ApiResult<Self> {
        let runs = Arc::new(LeadImportRepositoryImpl::new(conn.clone()));
        let profiles = Arc::new(MappingProfileRepository::new(conn.clone()));
        let credentials = Arc::new(ConnectorCredentialRepository::new(conn.clone()));
        let config = ConfigManager::from_connection(conn)?;

        let source_reader = LeadSourceReader::new(sheets, credentials.clone());
        let importer = LeadImporterImpl::new(
            runs.clone(),
            profiles.clone(),
            config,
            Box::new(source_reader),
        );

        Ok(Self {
            importer,
            runs,
            profiles,
            credentials,
            field_mapper: LeadFieldMapper,
        })
    }

    // ==========================================
    // 导入
    // ==========================================

    /// 预览（无副作用）
    pub async fn preview(
        &self,
        ctx: &ImportContext,
        source: SourceDescriptor,
        mapping: Option<RawFieldMapping>,
    ) -> ApiResult<PreviewResult> {
        let source = source.into_source()?;
        Ok(self.importer.preview(ctx, &source, mapping.as_ref()).await?)
    }

    /// 执行导入
    pub async fn import(
        &self,
        ctx: &ImportContext,
        source: SourceDescriptor,
        mapping: RawFieldMapping,
        skip_validation: bool,
    ) -> ApiResult<ImportRunResult> {
        let source = source.into_source()?;
        let options = ImportOptions { skip_validation };
        Ok(self.importer.execute(ctx, &source, &mapping, &options).await?)
    }

    // ==========================================
    // 映射方案
    // ==========================================

    pub async fn save_mapping(
        &self,
        ctx: &ImportContext,
        name: &str,
        mapping: RawFieldMapping,
        is_default: bool,
    ) -> ApiResult<MappingProfile> {
        let validated = self.field_mapper.validate(&mapping, &CanonicalField::ALL)?;
        if validated.is_empty() {
            return Err(ApiError::InvalidInput("映射方案至少需要一个有效字段".to_string()));
        }
        Ok(self
            .profiles
            .save(&ctx.org_id, name, &validated, is_default, ctx.user_id.as_deref())
            .await?)
    }

    pub async fn list_mappings(&self, ctx: &ImportContext) -> ApiResult<Vec<MappingProfile>> {
        Ok(self.profiles.list(&ctx.org_id).await?)
    }

    pub async fn delete_mapping(&self, ctx: &ImportContext, name: &str) -> ApiResult<bool> {
        Ok(self.profiles.delete(&ctx.org_id, name).await?)
    }

    // ==========================================
    // 导入运行查询
    // ==========================================

    /// 读取 ImportRun（限定组织）
    pub async fn get_import_run(&self, ctx: &ImportContext, run_id: &str) -> ApiResult<ImportRun> {
        self.runs
            .get_run(run_id)
            .await?
            .filter(|run| run.org_id == ctx.org_id)
            .ok_or_else(|| ApiError::NotFound(format!("ImportRun(id={})不存在", run_id)))
    }

    pub async fn list_import_runs(&self, ctx: &ImportContext, limit: usize) -> ApiResult<Vec<ImportRun>> {
        let limit = limit.clamp(1, MAX_RUN_LIST_LIMIT);
        Ok(self.runs.list_runs(&ctx.org_id, limit).await?)
    }

    /// 导出错误报告（仅 error_count > 0 时可用）
    pub async fn export_error_report(
        &self,
        ctx: &ImportContext,
        run_id: &str,
    ) -> ApiResult<ErrorReportResponse> {
        let run = self.get_import_run(ctx, run_id).await?;
        let csv = error_report_for_run(&run)?.ok_or_else(|| {
            ApiError::NotFound(format!("ImportRun(id={}) 没有错误记录", run_id))
        })?;

        Ok(ErrorReportResponse {
            import_run_id: run.run_id.clone(),
            file_name: format!("import_errors_{}.csv", run.run_id),
            csv,
            listed_errors: run.error_sample.len(),
            omitted_errors: omitted_error_count(&run),
        })
    }

    // ==========================================
    // 连接器凭据
    // ==========================================

    /// 保存表格连接器凭据（由外部授权流程调用）
    pub fn set_connector_credential(&self, credential: &ConnectorCredential) -> ApiResult<()> {
        if credential.access_token.trim().is_empty() {
            return Err(ApiError::InvalidInput("access_token 不能为空".to_string()));
        }
        self.credentials.upsert(credential)?;
        Ok(())
    }

    // ==========================================
    // 动作分发
    // ==========================================

    /// 按 action 分发，返回 JSON 结果
    pub async fn dispatch(
        &self,
        ctx: &ImportContext,
        request: ImportRequest,
    ) -> ApiResult<serde_json::Value> {
        let value = match request {
            ImportRequest::Preview { source, mapping } => {
                serde_json::to_value(self.preview(ctx, source, mapping).await?)
            }
            ImportRequest::Import {
                source,
                mapping,
                skip_validation,
            } => serde_json::to_value(self.import(ctx, source, mapping, skip_validation).await?),
            ImportRequest::SaveMapping {
                name,
                mapping_json,
                is_default,
            } => {
                let mapping = mapping_json.into_raw()?;
                serde_json::to_value(self.save_mapping(ctx, &name, mapping, is_default).await?)
            }
            ImportRequest::ListMappings => serde_json::to_value(self.list_mappings(ctx).await?),
            ImportRequest::DeleteMapping { name } => {
                let deleted = self.delete_mapping(ctx, &name).await?;
                Ok(serde_json::json!({ "deleted": deleted, "name": name }))
            }
            ImportRequest::GetImportRun { import_run_id } => {
                serde_json::to_value(self.get_import_run(ctx, &import_run_id).await?)
            }
            ImportRequest::ListImportRuns { limit } => {
                serde_json::to_value(self.list_import_runs(ctx, limit).await?)
            }
            ImportRequest::ExportErrorReport { import_run_id } => {
                serde_json::to_value(self.export_error_report(ctx, &import_run_id).await?)
            }
        };

        value.map_err(|e| ApiError::InternalError(format!("响应序列化失败: {}", e)))
    }

    /// JSON 文本入口；错误也以 JSON 返回
    pub async fn dispatch_json(&self, ctx: &ImportContext, request_json: &str) -> serde_json::Value {
        let result = match serde_json::from_str::<ImportRequest>(request_json) {
            Ok(request) => self.dispatch(ctx, request).await,
            Err(e) => Err(ApiError::InvalidInput(format!("请求解析失败: {}", e))),
        };

        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(org_id = %ctx.org_id, code = e.code(), error = %e, "API 调用失败");
                serde_json::to_value(e.to_body()).unwrap_or(serde_json::Value::Null)
            }
        }
    }
}
