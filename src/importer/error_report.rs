// ==========================================
// 线索导入系统 - 错误报告导出
// ==========================================
// 格式: CSV，表头 Row,Error；内容来自 ImportRun 的有界错误样本
// 样本被截断时追加一行汇总（Row 列为空）
// ==========================================

use crate::domain::import_run::{ImportRun, RowError};
use crate::importer::error::{ImportError, ImportResult};

/// 未列入样本的错误数
pub fn omitted_error_count(run: &ImportRun) -> usize {
    run.counters.error_count.saturating_sub(run.error_sample.len())
}

/// 将行错误写为 CSV 文本
pub fn render_error_report(errors: &[RowError]) -> ImportResult<String> {
    render_with_omitted(errors, 0)
}

fn render_with_omitted(errors: &[RowError], omitted: usize) -> ImportResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["Row", "Error"])?;
    for err in errors {
        writer.write_record([err.row_index.to_string(), err.message.clone()])?;
    }
    if omitted > 0 {
        writer.write_record([
            String::new(),
            format!("另有 {} 条错误未列出（报告仅保留前 {} 条）", omitted, errors.len()),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ImportError::InternalError(format!("错误报告写出失败: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| ImportError::InternalError(format!("错误报告编码失败: {}", e)))
}

/// ImportRun 的错误报告；无错误时返回 None
pub fn error_report_for_run(run: &ImportRun) -> ImportResult<Option<String>> {
    if run.counters.error_count == 0 || run.error_sample.is_empty() {
        return Ok(None);
    }
    render_with_omitted(&run.error_sample, omitted_error_count(run)).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::import_run::RowErrorKind;

    #[test]
    fn test_render_quotes_messages() {
        let csv = render_error_report(&[
            RowError::new(3, RowErrorKind::MissingIdentifier, "缺少标识字段"),
            RowError::new(7, RowErrorKind::InvalidEmail, "home_email 格式无效: a,b"),
        ])
        .unwrap();

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Row,Error");
        assert_eq!(lines[1], "3,缺少标识字段");
        assert_eq!(lines[2], "7,\"home_email 格式无效: a,b\"");
    }

    #[test]
    fn test_truncated_sample_reports_omitted_count() {
        use crate::domain::import_run::ImportContext;
        use crate::domain::mapping::FieldMapping;
        use crate::domain::types::SourceType;

        let mut run = ImportRun::new(&ImportContext::new("org1"), SourceType::Csv, None, FieldMapping::new());
        run.counters.error_count = 5;
        run.error_sample = vec![
            RowError::new(2, RowErrorKind::MissingIdentifier, "缺少标识字段"),
            RowError::new(3, RowErrorKind::MissingIdentifier, "缺少标识字段"),
        ];

        assert_eq!(omitted_error_count(&run), 3);
        let csv = error_report_for_run(&run).unwrap().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3], ",另有 3 条错误未列出（报告仅保留前 2 条）");

        // 未截断时没有汇总行
        run.counters.error_count = 2;
        let csv = error_report_for_run(&run).unwrap().unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_render_empty_has_header_only() {
        assert_eq!(render_error_report(&[]).unwrap(), "Row,Error\n");
    }
}
