// ==========================================
// 线索导入系统 - 去重器实现
// ==========================================
// 优先级（命中即短路）: Email > Phone > Name+Address
// 判定顺序:
// 1. 库内命中 → update（目标为命中的 Lead）
// 2. 同批次已出现相同键 → skip_duplicate（首次出现者生效）
// 3. 否则 → create
// 说明: 执行阶段首行已落库，后续同键行走 1 合并为 update；
//       预览阶段不落库，后续同键行走 2
// ==========================================

use crate::domain::lead::{DedupKey, ValidatedLeadRecord};
use crate::importer::error::ImportResult;
use crate::importer::lead_importer_trait::Deduplicator;
use crate::repository::lead_import_repo::{LeadImportRepository, LeadMatch};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ==========================================
// DedupDecision - 去重判定
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupAction {
    Create,
    Update,
    SkipDuplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupDecision {
    pub action: DedupAction,
    pub existing_lead_id: Option<String>,
    pub matched_key: Option<DedupKey>,
    /// skip_duplicate 时为批内首次出现的行号
    pub first_row: Option<usize>,
}

impl DedupDecision {
    pub fn create() -> Self {
        Self {
            action: DedupAction::Create,
            existing_lead_id: None,
            matched_key: None,
            first_row: None,
        }
    }
}

// ==========================================
// BatchSeen - 批内已出现的去重键
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct BatchSeen {
    first_rows: HashMap<DedupKey, usize>,
}

impl BatchSeen {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记记录的全部键（已登记的键保留首次行号）
    pub fn record(&mut self, keys: &[DedupKey], row_index: usize) {
        for key in keys {
            self.first_rows.entry(key.clone()).or_insert(row_index);
        }
    }

    /// 按优先级返回首个已出现的键及其首次行号
    pub fn first_seen<'a>(&self, keys: &'a [DedupKey]) -> Option<(&'a DedupKey, usize)> {
        keys.iter()
            .find_map(|k| self.first_rows.get(k).map(|row| (k, *row)))
    }

    pub fn len(&self) -> usize {
        self.first_rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_rows.is_empty()
    }
}

/// 纯判定逻辑（库内命中结果由调用方查询后传入）
pub fn decide(keys: &[DedupKey], existing: Option<LeadMatch>, batch_seen: &BatchSeen) -> DedupDecision {
    if let Some(m) = existing {
        return DedupDecision {
            action: DedupAction::Update,
            existing_lead_id: Some(m.lead_id),
            matched_key: Some(m.key),
            first_row: None,
        };
    }

    if let Some((key, first_row)) = batch_seen.first_seen(keys) {
        return DedupDecision {
            action: DedupAction::SkipDuplicate,
            existing_lead_id: None,
            matched_key: Some(key.clone()),
            first_row: Some(first_row),
        };
    }

    DedupDecision::create()
}

// ==========================================
// LeadDeduplicator
// ==========================================
pub struct LeadDeduplicator<R>
where
    R: LeadImportRepository,
{
    repo: Arc<R>,
}

impl<R> LeadDeduplicator<R>
where
    R: LeadImportRepository,
{
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl<R> Deduplicator for LeadDeduplicator<R>
where
    R: LeadImportRepository,
{
    async fn resolve(
        &self,
        org_id: &str,
        record: &ValidatedLeadRecord,
        batch_seen: &BatchSeen,
    ) -> ImportResult<DedupDecision> {
        let keys = record.dedup_keys();
        if keys.is_empty() {
            return Ok(DedupDecision::create());
        }

        let existing = self.repo.find_first_match(org_id, &keys).await?;
        Ok(decide(&keys, existing, batch_seen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(v: &str) -> DedupKey {
        DedupKey::Email(v.to_string())
    }

    fn phone(v: &str) -> DedupKey {
        DedupKey::Phone(v.to_string())
    }

    #[test]
    fn test_store_match_wins_over_batch() {
        let mut seen = BatchSeen::new();
        seen.record(&[email("a@x.com")], 2);

        let d = decide(
            &[email("a@x.com")],
            Some(LeadMatch {
                lead_id: "L1".into(),
                key: email("a@x.com"),
            }),
            &seen,
        );

        assert_eq!(d.action, DedupAction::Update);
        assert_eq!(d.existing_lead_id.as_deref(), Some("L1"));
    }

    #[test]
    fn test_batch_duplicate_first_wins() {
        let mut seen = BatchSeen::new();
        seen.record(&[email("a@x.com"), phone("555")], 2);
        seen.record(&[phone("555")], 3);

        let d = decide(&[email("b@x.com"), phone("555")], None, &seen);
        assert_eq!(d.action, DedupAction::SkipDuplicate);
        assert_eq!(d.first_row, Some(2));
        assert_eq!(d.matched_key, Some(phone("555")));
    }

    #[test]
    fn test_batch_lookup_respects_priority() {
        let mut seen = BatchSeen::new();
        seen.record(&[phone("555")], 2);
        seen.record(&[email("a@x.com")], 3);

        let d = decide(&[email("a@x.com"), phone("555")], None, &seen);
        assert_eq!(d.matched_key, Some(email("a@x.com")));
        assert_eq!(d.first_row, Some(3));
    }

    #[test]
    fn test_no_match_creates() {
        let d = decide(&[email("a@x.com")], None, &BatchSeen::new());
        assert_eq!(d, DedupDecision::create());
    }
}
