// ==========================================
// 线索导入系统 - 导入 Repository Trait
// ==========================================
// 职责: 定义 Lead / ImportRun 数据访问接口（不包含业务逻辑）
// 红线: Repository 不含业务规则，只做数据 CRUD
// 例外: insert_lead_unless_matched 在写入时复核去重键（原子化的一部分）
// ==========================================

use crate::domain::import_run::{ImportCounters, ImportRun, RowError};
use crate::domain::lead::{DedupKey, Lead, LeadFieldMap};
use crate::domain::types::ImportRunStatus;
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;

/// 去重键命中结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadMatch {
    pub lead_id: String,
    pub key: DedupKey,
}

/// 写入时复核结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// 未命中任何去重键，已新建
    Inserted { lead_id: String },
    /// 写入时发现已有匹配（并发导入抢先创建），未写入
    Matched(LeadMatch),
}

/// 合并结果
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub lead: Lead,
    /// 已被同组织其他线索占用、因而未写入的邮箱/电话键
    pub withheld: Vec<DedupKey>,
}

/// ImportRun 终结参数
#[derive(Debug, Clone)]
pub struct RunFinalization {
    pub status: ImportRunStatus,
    pub counters: ImportCounters,
    pub error_sample: Vec<RowError>,
    pub error_report_ref: Option<String>,
    pub failure_reason: Option<String>,
}

// ==========================================
// LeadImportRepository Trait
// ==========================================
// 实现者: LeadImportRepositoryImpl（使用 rusqlite）
#[async_trait]
pub trait LeadImportRepository: Send + Sync {
    // ===== Lead 查询 =====

    /// 按优先级顺序查找首个命中的去重键
    ///
    /// # 参数
    /// - org_id: 组织 ID（所有匹配都限定在组织内）
    /// - keys: 按优先级排列的去重键（Email > Phone > NameAddress）
    ///
    /// # 返回
    /// - Ok(Some): 最高优先级命中；同一键命中多条时取最早创建者
    /// - Ok(None): 无命中
    async fn find_first_match(
        &self,
        org_id: &str,
        keys: &[DedupKey],
    ) -> RepositoryResult<Option<LeadMatch>>;

    async fn get_lead(&self, org_id: &str, lead_id: &str) -> RepositoryResult<Option<Lead>>;

    async fn list_leads(&self, org_id: &str) -> RepositoryResult<Vec<Lead>>;

    async fn count_leads(&self, org_id: &str) -> RepositoryResult<usize>;

    // ===== Lead 写入 =====

    /// 写入时复核去重键后新建 Lead
    ///
    /// 复核与插入在同一个 IMMEDIATE 事务中完成
    async fn insert_lead_unless_matched(&self, lead: &Lead) -> RepositoryResult<InsertOutcome>;

    /// 合并更新已有 Lead（读取-合并-写回在同一事务中）
    ///
    /// 传入的邮箱/电话若已属于其他 Lead，则保留目标 Lead 的原值
    ///
    /// # 返回
    /// - Ok(MergeOutcome): 合并后的记录及被保留的冲突键
    /// - Err(NotFound): Lead 不存在或不属于该组织
    async fn merge_into_lead(
        &self,
        org_id: &str,
        lead_id: &str,
        fields: &LeadFieldMap,
        import_run_id: &str,
    ) -> RepositoryResult<MergeOutcome>;

    // ===== ImportRun 生命周期 =====

    /// 新建 ImportRun（status = queued）
    async fn insert_run(&self, run: &ImportRun) -> RepositoryResult<()>;

    /// queued → running
    async fn mark_running(&self, run_id: &str) -> RepositoryResult<()>;

    /// 记录总行数（仅 running 状态可写）
    async fn set_total_rows(&self, run_id: &str, total_rows: usize) -> RepositoryResult<()>;

    /// running → completed | failed（仅一次）
    async fn finalize_run(&self, run_id: &str, fin: RunFinalization) -> RepositoryResult<()>;

    async fn get_run(&self, run_id: &str) -> RepositoryResult<Option<ImportRun>>;

    /// 按开始时间倒序列出组织内的 ImportRun
    async fn list_runs(&self, org_id: &str, limit: usize) -> RepositoryResult<Vec<ImportRun>>;
}
