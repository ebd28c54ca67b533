// ==========================================
// 线索导入系统 - 文件解析器实现
// ==========================================
// 支持: CSV 文本 / Excel (.xlsx) 工作簿
// 行号: 表头为第 1 行，数据从第 2 行开始（与表格软件行号一致）
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use crate::importer::lead_importer_trait::{FileParser, SourceRow, SourceTable};
use calamine::{Reader, Xlsx};
use csv::ReaderBuilder;
use indexmap::IndexMap;
use std::io::Cursor;

/// 由表头与 (行号, 单元格) 序列组装 SourceTable
///
/// - 空表头列忽略；重复表头保留首列的值
/// - 完全空白的行跳过，但不影响后续行号
pub(crate) fn build_table<I>(raw_headers: Vec<String>, rows: I) -> ImportResult<SourceTable>
where
    I: IntoIterator<Item = (usize, Vec<String>)>,
{
    let raw_headers: Vec<String> = raw_headers.into_iter().map(|h| h.trim().to_string()).collect();

    let mut headers: Vec<String> = Vec::new();
    for h in &raw_headers {
        if !h.is_empty() && !headers.contains(h) {
            headers.push(h.clone());
        }
    }
    if headers.is_empty() {
        return Err(ImportError::MalformedSource("缺少表头行".to_string()));
    }

    let mut table_rows = Vec::new();
    for (row_index, cells) in rows {
        let mut values: IndexMap<String, String> = IndexMap::with_capacity(headers.len());
        for (col_idx, header) in raw_headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = cells.get(col_idx).map(|v| v.trim()).unwrap_or("");
            values
                .entry(header.clone())
                .or_insert_with(|| value.to_string());
        }

        // 跳过完全空白的行
        if values.values().all(|v| v.is_empty()) {
            continue;
        }

        table_rows.push(SourceRow { row_index, values });
    }

    Ok(SourceTable {
        headers,
        rows: table_rows,
    })
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl CsvParser {
    /// 解析 CSV 文本（标准引号语义: 字段内逗号/换行、双引号转义）
    pub fn parse_text(&self, text: &str) -> ImportResult<SourceTable> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        if text.trim().is_empty() {
            return Err(ImportError::MalformedSource("CSV 内容为空".to_string()));
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .from_reader(text.as_bytes());

        // 读取表头
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

        // 读取所有行（按记录计数，字段内换行不增加行号）
        let mut rows: Vec<(usize, Vec<String>)> = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            rows.push((idx + 2, record.iter().map(|v| v.to_string()).collect()));
        }

        build_table(headers, rows)
    }
}

impl FileParser for CsvParser {
    fn parse_bytes(&self, bytes: &[u8]) -> ImportResult<SourceTable> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ImportError::MalformedSource(format!("CSV 不是有效的 UTF-8 文本: {}", e)))?;
        self.parse_text(text)
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ExcelParser {
    /// 指定工作表；None 时读取第一个
    pub sheet_name: Option<String>,
}

impl ExcelParser {
    pub fn new(sheet_name: Option<String>) -> Self {
        Self { sheet_name }
    }
}

impl FileParser for ExcelParser {
    fn parse_bytes(&self, bytes: &[u8]) -> ImportResult<SourceTable> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;

        let sheet_names = workbook.sheet_names();
        let sheet_name = match &self.sheet_name {
            Some(name) => sheet_names
                .iter()
                .find(|s| s.as_str() == name.trim())
                .cloned()
                .ok_or_else(|| ImportError::MalformedSource(format!("工作表不存在: {}", name)))?,
            None => sheet_names
                .first()
                .cloned()
                .ok_or_else(|| ImportError::MalformedSource("Excel 文件无工作表".to_string()))?,
        };

        let range = workbook.worksheet_range(&sheet_name)?;

        // 区域可能不从 A1 开始，行号按工作表绝对行计算
        let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);

        let mut rows = range.rows();
        let header_row = rows
            .next()
            .ok_or_else(|| ImportError::MalformedSource("Excel 工作表为空".to_string()))?;
        let headers: Vec<String> = header_row.iter().map(|cell| cell.to_string()).collect();

        let data_rows = rows.enumerate().map(|(i, row)| {
            (
                first_row + i + 2,
                row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>(),
            )
        });

        build_table(headers, data_rows)
    }
}
