// ==========================================
// 线索导入系统 - 字段映射器实现
// ==========================================
// 职责: 表头 → 标准字段 映射建议 + 映射校验
// 规则:
// - 表头规范化: TRIM + 小写 + 非字母数字连续段折叠为单个空格
// - 别名匹配: 完全相等，或去空格后相等（"firstname" = "first name"）
// - 一个标准字段只接收一个源列（建议阶段跳过已占用目标，校验阶段报冲突）
// ==========================================

use crate::domain::mapping::{FieldMapping, RawFieldMapping};
use crate::domain::types::CanonicalField;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::lead_importer_trait::FieldMapper;
use indexmap::IndexMap;
use std::str::FromStr;

// ==========================================
// 别名表（按标准字段对外顺序）
// ==========================================
const ALIASES: &[(CanonicalField, &[&str])] = &[
    (CanonicalField::FirstName, &["first name", "first", "fname", "given name"]),
    (CanonicalField::LastName, &["last name", "last", "lname", "surname", "family name"]),
    (
        CanonicalField::HomeEmail,
        &["email", "e mail", "email address", "home email", "personal email"],
    ),
    (CanonicalField::WorkEmail, &["work email", "business email", "office email"]),
    (
        CanonicalField::MobilePhone,
        &[
            "phone",
            "mobile",
            "mobile phone",
            "cell",
            "cell phone",
            "phone number",
            "mobile number",
        ],
    ),
    (CanonicalField::HomePhone, &["home phone"]),
    (CanonicalField::WorkPhone, &["work phone", "office phone", "business phone"]),
    (
        CanonicalField::PropertyStreet,
        &["address", "street", "street address", "property address", "property street", "address 1"],
    ),
    (CanonicalField::PropertyCity, &["city", "property city"]),
    (CanonicalField::PropertyState, &["state", "st", "property state"]),
    (
        CanonicalField::PropertyZip,
        &["zip", "zip code", "zipcode", "postal code", "property zip"],
    ),
    (CanonicalField::PropertyCounty, &["county", "property county"]),
    (CanonicalField::PropertyType, &["property type"]),
    (CanonicalField::Occupancy, &["occupancy", "occupancy type"]),
    (
        CanonicalField::EstimatedValue,
        &["estimated value", "home value", "property value", "value", "est value"],
    ),
    (CanonicalField::LoanAmount, &["loan amount", "loan", "mortgage amount"]),
    (CanonicalField::LoanType, &["loan type"]),
    (CanonicalField::LoanPurpose, &["loan purpose", "purpose"]),
    (CanonicalField::FicoScore, &["fico", "fico score", "credit score"]),
    (CanonicalField::CurrentRate, &["current rate", "rate", "interest rate"]),
    (CanonicalField::CurrentBalance, &["current balance", "balance", "loan balance"]),
    (
        CanonicalField::MonthlyRentalIncome,
        &["monthly rental income", "rental income", "rent"],
    ),
    (CanonicalField::Source, &["source", "lead source"]),
    (CanonicalField::Notes, &["notes", "note", "comments"]),
    (CanonicalField::ZillowLink, &["zillow", "zillow link", "zillow url"]),
];

/// 表头规范化
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

fn alias_matches(normalized: &str, alias: &str) -> bool {
    if normalized == alias {
        return true;
    }
    let compact: String = normalized.chars().filter(|c| *c != ' ').collect();
    let alias_compact: String = alias.chars().filter(|c| *c != ' ').collect();
    compact == alias_compact
}

pub struct LeadFieldMapper;

impl LeadFieldMapper {
    /// 单个表头的候选字段（按别名表顺序）
    fn candidates(&self, header: &str) -> Vec<CanonicalField> {
        let normalized = normalize_header(header);
        if normalized.is_empty() {
            return Vec::new();
        }
        ALIASES
            .iter()
            .filter(|(_, aliases)| aliases.iter().any(|a| alias_matches(&normalized, a)))
            .map(|(field, _)| *field)
            .collect()
    }

    /// 在已有映射基础上为剩余表头补充建议（用于默认方案预填）
    pub fn suggest_with_base(&self, headers: &[String], base: &FieldMapping) -> FieldMapping {
        let mut mapping = FieldMapping::new();

        // 先保留基础映射中仍存在于表头的条目
        for header in headers {
            if let Some(field) = base.get(header) {
                if !mapping.targets(field) {
                    mapping.insert(header.clone(), field);
                }
            }
        }

        for header in headers {
            if mapping.get(header).is_some() {
                continue;
            }
            if let Some(field) = self
                .candidates(header)
                .into_iter()
                .find(|f| !mapping.targets(*f))
            {
                tracing::debug!(header = %header, field = %field, "表头匹配别名");
                mapping.insert(header.clone(), field);
            }
        }

        mapping
    }
}

impl FieldMapper for LeadFieldMapper {
    fn suggest(&self, headers: &[String]) -> FieldMapping {
        self.suggest_with_base(headers, &FieldMapping::new())
    }

    fn validate(
        &self,
        mapping: &RawFieldMapping,
        canonical: &[CanonicalField],
    ) -> ImportResult<FieldMapping> {
        let mut by_target: IndexMap<CanonicalField, Vec<String>> = IndexMap::new();

        for (header, target) in mapping {
            let target = target.trim();
            if target.is_empty() {
                continue;
            }
            let field = match CanonicalField::from_str(target) {
                Ok(f) if canonical.contains(&f) => f,
                _ => {
                    tracing::debug!(header = %header, target, "忽略未知目标字段");
                    continue;
                }
            };
            by_target
                .entry(field)
                .or_default()
                .push(header.trim().to_string());
        }

        if let Some((field, headers)) = by_target.iter().find(|(_, hs)| hs.len() > 1) {
            return Err(ImportError::MappingConflict {
                field: *field,
                headers: headers.clone(),
            });
        }

        let mut validated = FieldMapping::new();
        for (field, headers) in by_target {
            if let Some(header) = headers.into_iter().next() {
                validated.insert(header, field);
            }
        }
        Ok(validated)
    }
}
