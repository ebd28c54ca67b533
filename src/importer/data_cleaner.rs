// ==========================================
// 线索导入系统 - 数据清洗器实现
// ==========================================
// 职责: TRIM / NULL 标准化 / 数值清洗 / 邮箱与电话规范化
// ==========================================

use crate::domain::lead::{normalize_email, phone_digits};
use crate::importer::lead_importer_trait::DataCleaner;

pub struct LeadDataCleaner;

impl DataCleaner for LeadDataCleaner {
    fn clean_text(&self, value: &str) -> String {
        value.trim().to_string()
    }

    fn normalize_null(&self, value: Option<&str>) -> Option<String> {
        value.and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn parse_numeric(&self, value: &str) -> Option<f64> {
        let stripped: String = value
            .chars()
            .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
            .collect();
        if stripped.is_empty() {
            return None;
        }
        stripped.parse::<f64>().ok().filter(|n| n.is_finite())
    }

    fn normalize_email(&self, value: &str) -> Option<String> {
        self.normalize_null(Some(value)).map(|v| normalize_email(&v))
    }

    fn normalize_phone(&self, value: &str) -> Option<String> {
        let digits = phone_digits(value);
        if digits.is_empty() {
            None
        } else {
            Some(digits)
        }
    }
}
