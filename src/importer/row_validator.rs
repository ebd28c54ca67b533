// ==========================================
// 线索导入系统 - 行校验器实现
// ==========================================
// 步骤:
// 1. 按映射投影到标准字段 + TRIM
// 2. 类型转换（数值字段剥离 $/千分位；失败视为缺失，不报错）
// 3. 标识字段要求（first/last name、home_email、mobile_phone 至少一项）
// 4. 邮箱格式检查（仅警告，仍导入）
// ==========================================

use crate::domain::import_run::{RowError, RowErrorKind};
use crate::domain::lead::{FieldValue, LeadFieldMap, ValidatedLeadRecord};
use crate::domain::mapping::FieldMapping;
use crate::domain::types::CanonicalField;
use crate::importer::data_cleaner::LeadDataCleaner;
use crate::importer::lead_importer_trait::{DataCleaner, ImportOptions, RowValidator, SourceRow};
use regex::Regex;
use std::sync::OnceLock;

/// 简单 local@domain.tld 形态
fn email_regex() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}

pub fn is_valid_email(value: &str) -> bool {
    email_regex().is_match(value)
}

const IDENTIFIER_FIELDS: [CanonicalField; 4] = [
    CanonicalField::FirstName,
    CanonicalField::LastName,
    CanonicalField::HomeEmail,
    CanonicalField::MobilePhone,
];

pub struct LeadRowValidator {
    cleaner: Box<dyn DataCleaner>,
}

impl LeadRowValidator {
    pub fn new() -> Self {
        Self {
            cleaner: Box::new(LeadDataCleaner),
        }
    }

    /// 单字段类型化；返回 None 表示缺失
    fn coerce(&self, field: CanonicalField, raw: &str) -> Option<FieldValue> {
        let text = self.cleaner.normalize_null(Some(raw))?;

        if field.is_numeric() {
            return self.cleaner.parse_numeric(&text).map(FieldValue::Number);
        }
        if field.is_email() {
            return self.cleaner.normalize_email(&text).map(FieldValue::Text);
        }
        if field.is_phone() {
            return self.cleaner.normalize_phone(&text).map(FieldValue::Text);
        }
        Some(FieldValue::Text(self.cleaner.clean_text(&text)))
    }
}

impl Default for LeadRowValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl RowValidator for LeadRowValidator {
    fn validate(
        &self,
        row: &SourceRow,
        mapping: &FieldMapping,
        options: &ImportOptions,
    ) -> Result<ValidatedLeadRecord, RowError> {
        // ===== 1-2. 投影 + 类型转换 =====
        let mut fields = LeadFieldMap::new();
        for (header, field) in mapping.iter() {
            let Some(raw) = row.get(header) else {
                continue;
            };
            if let Some(value) = self.coerce(*field, raw) {
                fields.insert(*field, value);
            }
        }

        // ===== 3. 标识字段要求 =====
        let has_identifier = IDENTIFIER_FIELDS
            .iter()
            .any(|f| fields.get(f).map_or(false, |v| !v.is_empty()));
        if !has_identifier {
            return Err(RowError::new(
                row.row_index,
                RowErrorKind::MissingIdentifier,
                "缺少标识字段: 需要 first_name、last_name、home_email 或 mobile_phone 之一",
            ));
        }

        // ===== 4. 邮箱格式（警告）=====
        let mut warnings = Vec::new();
        if !options.skip_validation {
            for field in [CanonicalField::HomeEmail, CanonicalField::WorkEmail] {
                if let Some(email) = fields.get(&field).and_then(|v| v.as_text()) {
                    if !is_valid_email(email) {
                        warnings.push(format!("{} 格式无效: {}", field, email));
                    }
                }
            }
        }

        Ok(ValidatedLeadRecord {
            row_index: row.row_index,
            fields,
            warnings,
        })
    }
}
