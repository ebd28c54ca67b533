// ==========================================
// 线索导入系统 - 数据源读取器实现
// ==========================================
// 来源 → SourceTable:
// - CSV 文本 / 文件 → CsvParser
// - Excel 工作簿 / 文件 → ExcelParser
// - 公开在线表格    → CSV 导出 → CsvParser
// - 私有在线表格    → 连接器凭据 → values API → build_table
// ==========================================

use crate::domain::import_run::ImportContext;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::{build_table, CsvParser, ExcelParser};
use crate::importer::lead_importer_trait::{FileParser, ImportSource, SourceReader, SourceTable};
use crate::importer::sheets_client::SheetsClient;
use crate::repository::connector_credential_repo::{
    ConnectorCredentialProvider, PROVIDER_GOOGLE_SHEETS,
};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// values API 返回的二维数组 → SourceTable（首行为表头）
pub fn table_from_values(values: Vec<Vec<String>>) -> ImportResult<SourceTable> {
    let mut iter = values.into_iter();
    let headers = iter
        .next()
        .ok_or_else(|| ImportError::MalformedSource("在线表格为空".to_string()))?;
    build_table(headers, iter.enumerate().map(|(i, row)| (i + 2, row)))
}

async fn read_file(path: &Path) -> ImportResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        ImportError::SourceUnavailable(format!("读取文件失败 {}: {}", path.display(), e))
    })
}

pub struct LeadSourceReader {
    sheets: Arc<dyn SheetsClient>,
    credentials: Arc<dyn ConnectorCredentialProvider>,
}

impl LeadSourceReader {
    pub fn new(
        sheets: Arc<dyn SheetsClient>,
        credentials: Arc<dyn ConnectorCredentialProvider>,
    ) -> Self {
        Self {
            sheets,
            credentials,
        }
    }

    async fn read_private_sheet(
        &self,
        ctx: &ImportContext,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> ImportResult<SourceTable> {
        if spreadsheet_id.trim().is_empty() || sheet_name.trim().is_empty() {
            return Err(ImportError::InvalidSourceDescriptor(
                "私有表格需要 spreadsheet_id 与 sheet_name".to_string(),
            ));
        }

        let credential = self
            .credentials
            .valid_credential(&ctx.org_id, PROVIDER_GOOGLE_SHEETS)
            .await?
            .ok_or_else(|| {
                ImportError::SourceUnauthorized(format!(
                    "组织 {} 未连接表格账户或授权已过期",
                    ctx.org_id
                ))
            })?;

        let values = self
            .sheets
            .fetch_values(spreadsheet_id.trim(), sheet_name.trim(), &credential.access_token)
            .await?;
        table_from_values(values)
    }
}

#[async_trait]
impl SourceReader for LeadSourceReader {
    async fn read(&self, ctx: &ImportContext, source: &ImportSource) -> ImportResult<SourceTable> {
        let table = match source {
            ImportSource::Csv { data, .. } => CsvParser.parse_text(data)?,
            ImportSource::Excel {
                bytes, sheet_name, ..
            } => ExcelParser::new(sheet_name.clone()).parse_bytes(bytes)?,
            ImportSource::CsvFile { path, .. } => {
                let bytes = read_file(path).await?;
                let text = String::from_utf8(bytes).map_err(|_| {
                    ImportError::MalformedSource(format!("文件不是 UTF-8 文本: {}", path.display()))
                })?;
                CsvParser.parse_text(&text)?
            }
            ImportSource::ExcelFile {
                path, sheet_name, ..
            } => {
                let bytes = read_file(path).await?;
                ExcelParser::new(sheet_name.clone()).parse_bytes(&bytes)?
            }
            ImportSource::GoogleSheetsPublic { sheet_url } => {
                if sheet_url.trim().is_empty() {
                    return Err(ImportError::InvalidSourceDescriptor(
                        "缺少 sheet_url".to_string(),
                    ));
                }
                let text = self.sheets.fetch_public_csv(sheet_url).await?;
                CsvParser.parse_text(&text)?
            }
            ImportSource::GoogleSheetsPrivate {
                spreadsheet_id,
                sheet_name,
            } => {
                self.read_private_sheet(ctx, spreadsheet_id, sheet_name)
                    .await?
            }
        };

        tracing::debug!(
            org_id = %ctx.org_id,
            source_type = %source.source_type().as_str(),
            headers = table.headers.len(),
            rows = table.total_rows(),
            "数据源读取完成"
        );
        Ok(table)
    }
}
