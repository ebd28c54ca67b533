// ==========================================
// 线索导入系统 - 线索领域模型
// ==========================================
// 职责: Lead 实体 / 校验后记录 / 去重键
// 红线: 导入管道不得物理删除 Lead
// ==========================================

use crate::domain::types::{now_utc, CanonicalField};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// FieldValue - 标准字段取值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            FieldValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    /// 空文本视为缺失
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Number(_) => false,
        }
    }
}

/// 标准字段 → 取值（有序，便于序列化与比较）
pub type LeadFieldMap = BTreeMap<CanonicalField, FieldValue>;

// ==========================================
// 规范化辅助函数（去重键口径）
// ==========================================

/// 邮箱规范化: TRIM + 小写
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// 电话规范化: 仅保留数字
pub fn phone_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn non_empty_text(fields: &LeadFieldMap, field: CanonicalField) -> Option<&str> {
    fields
        .get(&field)
        .and_then(|v| v.as_text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// ==========================================
// DedupKey - 去重键
// ==========================================
// 优先级: Email > Phone > NameAddress（dedup_keys 返回顺序即优先级）
// Name 为兜底键: 仅当前三者都不可用时参与匹配
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DedupKey {
    Email(String),
    Phone(String),
    NameAddress(String),
    Name(String),
}

impl DedupKey {
    /// lead 表中对应的派生列
    pub fn column(&self) -> &'static str {
        match self {
            DedupKey::Email(_) => "email_key",
            DedupKey::Phone(_) => "phone_key",
            DedupKey::NameAddress(_) => "name_address_key",
            DedupKey::Name(_) => "name_key",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            DedupKey::Email(v)
            | DedupKey::Phone(v)
            | DedupKey::NameAddress(v)
            | DedupKey::Name(v) => v.as_str(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DedupKey::Email(_) => "email",
            DedupKey::Phone(_) => "phone",
            DedupKey::NameAddress(_) => "name_address",
            DedupKey::Name(_) => "name",
        }
    }

    /// 键来源的单一标准字段（组合键为 None）
    pub fn source_field(&self) -> Option<CanonicalField> {
        match self {
            DedupKey::Email(_) => Some(CanonicalField::HomeEmail),
            DedupKey::Phone(_) => Some(CanonicalField::MobilePhone),
            DedupKey::NameAddress(_) | DedupKey::Name(_) => None,
        }
    }
}

/// 按优先级计算字段集合的去重键
///
/// 没有邮箱、电话、姓名+地址时退回到姓名键，保证仅有姓名的行重复导入时可匹配
pub fn dedup_keys(fields: &LeadFieldMap) -> Vec<DedupKey> {
    let mut keys = primary_keys(fields);
    if keys.is_empty() {
        keys.extend(name_key(fields));
    }
    keys
}

/// 持久化到 lead 表的全部派生键（含姓名键）
pub fn index_keys(fields: &LeadFieldMap) -> Vec<DedupKey> {
    let mut keys = primary_keys(fields);
    keys.extend(name_key(fields));
    keys
}

/// 姓名键: first + last 小写，至少一项非空
fn name_key(fields: &LeadFieldMap) -> Option<DedupKey> {
    let first = non_empty_text(fields, CanonicalField::FirstName);
    let last = non_empty_text(fields, CanonicalField::LastName);
    if first.is_none() && last.is_none() {
        return None;
    }
    Some(DedupKey::Name(format!(
        "{}\u{1f}{}",
        first.unwrap_or_default().to_lowercase(),
        last.unwrap_or_default().to_lowercase()
    )))
}

fn primary_keys(fields: &LeadFieldMap) -> Vec<DedupKey> {
    let mut keys = Vec::with_capacity(3);

    if let Some(email) = non_empty_text(fields, CanonicalField::HomeEmail) {
        keys.push(DedupKey::Email(normalize_email(email)));
    }

    if let Some(phone) = non_empty_text(fields, CanonicalField::MobilePhone) {
        let digits = phone_digits(phone);
        if !digits.is_empty() {
            keys.push(DedupKey::Phone(digits));
        }
    }

    // 姓名+地址三元组必须完整
    if let (Some(first), Some(last), Some(street)) = (
        non_empty_text(fields, CanonicalField::FirstName),
        non_empty_text(fields, CanonicalField::LastName),
        non_empty_text(fields, CanonicalField::PropertyStreet),
    ) {
        keys.push(DedupKey::NameAddress(format!(
            "{}\u{1f}{}\u{1f}{}",
            first.to_lowercase(),
            last.to_lowercase(),
            street.to_lowercase()
        )));
    }

    keys
}

// ==========================================
// Lead - 线索实体
// ==========================================
// 对齐: lead 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub lead_id: String,                        // 线索 ID（UUID）
    pub org_id: String,                         // 所属组织
    pub fields: LeadFieldMap,                   // 标准字段取值
    pub last_import_run_id: Option<String>,     // 最近一次写入的导入运行
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

impl Lead {
    pub fn new(org_id: &str, fields: LeadFieldMap, import_run_id: Option<String>) -> Self {
        let now = now_utc();
        Self {
            lead_id: uuid::Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            fields,
            last_import_run_id: import_run_id,
            created_date: now,
            updated_date: now,
        }
    }

    pub fn text(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).and_then(|v| v.as_text())
    }

    pub fn number(&self, field: CanonicalField) -> Option<f64> {
        self.fields.get(&field).and_then(|v| v.as_number())
    }

    pub fn dedup_keys(&self) -> Vec<DedupKey> {
        dedup_keys(&self.fields)
    }

    pub fn index_keys(&self) -> Vec<DedupKey> {
        index_keys(&self.fields)
    }

    /// 以新记录覆盖非空字段；缺失字段保持原值，created_date 不变
    pub fn apply_fields(&mut self, incoming: &LeadFieldMap, import_run_id: Option<&str>) {
        for (field, value) in incoming {
            if !value.is_empty() {
                self.fields.insert(*field, value.clone());
            }
        }
        if let Some(run_id) = import_run_id {
            self.last_import_run_id = Some(run_id.to_string());
        }
        self.updated_date = now_utc();
    }
}

// ==========================================
// ValidatedLeadRecord - 校验后的导入记录
// ==========================================
// 生命周期: 仅在单次导入管道内
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedLeadRecord {
    pub row_index: usize,                       // 源文件行号（表头为 1）
    pub fields: LeadFieldMap,                   // 类型化后的非空字段
    pub warnings: Vec<String>,                  // 非致命问题（仍导入）
}

impl ValidatedLeadRecord {
    pub fn dedup_keys(&self) -> Vec<DedupKey> {
        dedup_keys(&self.fields)
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
