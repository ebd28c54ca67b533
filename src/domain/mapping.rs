// ==========================================
// 线索导入系统 - 字段映射领域模型
// ==========================================
// 职责: FieldMapping（源列 → 标准字段）/ MappingProfile（可复用映射方案）
// ==========================================

use crate::domain::types::CanonicalField;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ==========================================
// FieldMapping - 已校验的字段映射
// ==========================================
// 不变量:
// - 一个源列最多映射到一个标准字段（由 map 结构保证）
// - 一个标准字段最多接收一个源列（由 FieldMapper::validate 保证）
// 未映射的源列直接忽略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping(IndexMap<String, CanonicalField>);

impl FieldMapping {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn get(&self, header: &str) -> Option<CanonicalField> {
        self.0.get(header).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CanonicalField)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 目标字段是否已被占用
    pub fn targets(&self, field: CanonicalField) -> bool {
        self.0.values().any(|f| *f == field)
    }

    /// 仅在 crate 内部构造，外部输入必须经过 FieldMapper::validate
    pub(crate) fn insert(&mut self, header: String, field: CanonicalField) {
        self.0.insert(header, field);
    }

    /// 转换为原始字符串映射（用于持久化/回显）
    pub fn to_raw(&self) -> RawFieldMapping {
        self.0
            .iter()
            .map(|(h, f)| (h.clone(), f.as_str().to_string()))
            .collect()
    }
}

/// 调用方提交的原始映射（源列 → 目标字段名，目标可能非法/为空）
pub type RawFieldMapping = IndexMap<String, String>;

// ==========================================
// MappingProfile - 映射方案
// ==========================================
// 对齐: lead_mapping_profile 表
// 生命周期: 组织级，仅显式删除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingProfile {
    pub profile_id: String,
    pub org_id: String,
    pub name: String,
    pub mapping: FieldMapping,
    pub is_default: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
