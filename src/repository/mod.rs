// ==========================================
// 线索导入系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod connector_credential_repo;
pub mod error;
pub mod lead_import_repo;
pub mod lead_import_repo_impl;
pub mod mapping_profile_repo;

pub use connector_credential_repo::{
    ConnectorCredential, ConnectorCredentialProvider, ConnectorCredentialRepository,
    PROVIDER_GOOGLE_SHEETS,
};
pub use error::{RepositoryError, RepositoryResult};
pub use lead_import_repo::{
    InsertOutcome, LeadImportRepository, LeadMatch, MergeOutcome, RunFinalization,
};
pub use lead_import_repo_impl::LeadImportRepositoryImpl;
pub use mapping_profile_repo::{MappingProfileRepository, MappingProfileStore};
