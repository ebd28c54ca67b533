// ==========================================
// 线索导入系统 - 领域类型定义
// ==========================================
// 职责: 标准字段枚举 / 导入来源类型 / 导入运行状态
// 红线: 映射边界之后只允许使用 CanonicalField，不再传递字符串字段名
// ==========================================

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 当前时间，截断到微秒（与 SQLite 中的存储精度一致）
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ==========================================
// CanonicalField - 线索标准字段
// ==========================================
// 对齐: lead 表的业务列（列名 = as_str()）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    // ===== 身份 =====
    FirstName,
    LastName,

    // ===== 联系方式 =====
    HomeEmail,
    WorkEmail,
    MobilePhone,
    HomePhone,
    WorkPhone,

    // ===== 房产信息 =====
    PropertyStreet,
    PropertyCity,
    PropertyState,
    PropertyZip,
    PropertyCounty,
    PropertyType,
    Occupancy,

    // ===== 财务信息（数值）=====
    EstimatedValue,
    LoanAmount,
    LoanType,
    LoanPurpose,
    FicoScore,
    CurrentRate,
    CurrentBalance,
    MonthlyRentalIncome,

    // ===== 元信息 =====
    Source,
    Notes,
    ZillowLink,
}

impl CanonicalField {
    /// 全部标准字段（对外暴露顺序）
    pub const ALL: [CanonicalField; 25] = [
        CanonicalField::FirstName,
        CanonicalField::LastName,
        CanonicalField::HomeEmail,
        CanonicalField::WorkEmail,
        CanonicalField::MobilePhone,
        CanonicalField::HomePhone,
        CanonicalField::WorkPhone,
        CanonicalField::PropertyStreet,
        CanonicalField::PropertyCity,
        CanonicalField::PropertyState,
        CanonicalField::PropertyZip,
        CanonicalField::PropertyCounty,
        CanonicalField::PropertyType,
        CanonicalField::Occupancy,
        CanonicalField::EstimatedValue,
        CanonicalField::LoanAmount,
        CanonicalField::LoanType,
        CanonicalField::LoanPurpose,
        CanonicalField::FicoScore,
        CanonicalField::CurrentRate,
        CanonicalField::CurrentBalance,
        CanonicalField::MonthlyRentalIncome,
        CanonicalField::Source,
        CanonicalField::Notes,
        CanonicalField::ZillowLink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::FirstName => "first_name",
            CanonicalField::LastName => "last_name",
            CanonicalField::HomeEmail => "home_email",
            CanonicalField::WorkEmail => "work_email",
            CanonicalField::MobilePhone => "mobile_phone",
            CanonicalField::HomePhone => "home_phone",
            CanonicalField::WorkPhone => "work_phone",
            CanonicalField::PropertyStreet => "property_street",
            CanonicalField::PropertyCity => "property_city",
            CanonicalField::PropertyState => "property_state",
            CanonicalField::PropertyZip => "property_zip",
            CanonicalField::PropertyCounty => "property_county",
            CanonicalField::PropertyType => "property_type",
            CanonicalField::Occupancy => "occupancy",
            CanonicalField::EstimatedValue => "estimated_value",
            CanonicalField::LoanAmount => "loan_amount",
            CanonicalField::LoanType => "loan_type",
            CanonicalField::LoanPurpose => "loan_purpose",
            CanonicalField::FicoScore => "fico_score",
            CanonicalField::CurrentRate => "current_rate",
            CanonicalField::CurrentBalance => "current_balance",
            CanonicalField::MonthlyRentalIncome => "monthly_rental_income",
            CanonicalField::Source => "source",
            CanonicalField::Notes => "notes",
            CanonicalField::ZillowLink => "zillow_link",
        }
    }

    /// 数值字段（导入时剥离货币符号/千分位后按数字解析）
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CanonicalField::EstimatedValue
                | CanonicalField::LoanAmount
                | CanonicalField::FicoScore
                | CanonicalField::CurrentRate
                | CanonicalField::CurrentBalance
                | CanonicalField::MonthlyRentalIncome
        )
    }

    pub fn is_email(&self) -> bool {
        matches!(self, CanonicalField::HomeEmail | CanonicalField::WorkEmail)
    }

    pub fn is_phone(&self) -> bool {
        matches!(
            self,
            CanonicalField::MobilePhone | CanonicalField::HomePhone | CanonicalField::WorkPhone
        )
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        CanonicalField::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| format!("未知标准字段: {}", s))
    }
}

// ==========================================
// SourceType - 导入来源类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Csv,
    Excel,
    GoogleSheets,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Csv => "csv",
            SourceType::Excel => "excel",
            SourceType::GoogleSheets => "google_sheets",
        }
    }

    pub fn parse(s: &str) -> Option<SourceType> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Some(SourceType::Csv),
            "excel" | "xlsx" => Some(SourceType::Excel),
            "google_sheets" => Some(SourceType::GoogleSheets),
            _ => None,
        }
    }
}

// ==========================================
// ImportRunStatus - 导入运行状态
// ==========================================
// 状态机: QUEUED → RUNNING → COMPLETED | FAILED（无取消状态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportRunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ImportRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportRunStatus::Queued => "queued",
            ImportRunStatus::Running => "running",
            ImportRunStatus::Completed => "completed",
            ImportRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> ImportRunStatus {
        match s.trim().to_lowercase().as_str() {
            "running" => ImportRunStatus::Running,
            "completed" => ImportRunStatus::Completed,
            "failed" => ImportRunStatus::Failed,
            _ => ImportRunStatus::Queued,
        }
    }

    /// 是否已终结（终结后记录不可再修改）
    pub fn is_final(&self) -> bool {
        matches!(self, ImportRunStatus::Completed | ImportRunStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_field_round_trip_names() {
        for field in CanonicalField::ALL {
            assert_eq!(field.as_str().parse::<CanonicalField>().unwrap(), field);
        }
        assert!("favorite_color".parse::<CanonicalField>().is_err());
    }

    #[test]
    fn test_canonical_field_serde_snake_case() {
        let json = serde_json::to_string(&CanonicalField::MonthlyRentalIncome).unwrap();
        assert_eq!(json, "\"monthly_rental_income\"");
    }

    #[test]
    fn test_numeric_fields() {
        let numeric: Vec<_> = CanonicalField::ALL.iter().filter(|f| f.is_numeric()).collect();
        assert_eq!(numeric.len(), 6);
        assert!(!CanonicalField::LoanType.is_numeric());
    }

    #[test]
    fn test_run_status_final() {
        assert!(!ImportRunStatus::Queued.is_final());
        assert!(!ImportRunStatus::Running.is_final());
        assert!(ImportRunStatus::Completed.is_final());
        assert!(ImportRunStatus::Failed.is_final());
        assert_eq!(ImportRunStatus::parse("COMPLETED"), ImportRunStatus::Completed);
    }
}
