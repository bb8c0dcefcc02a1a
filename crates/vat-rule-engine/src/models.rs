//! 规则引擎领域模型

use crate::money::Money;
use crate::parameters::ParameterValue;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 规则类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// 基础申报服务费
    BaseFee,
    VatRate,
    /// 按营业额、交易量等阈值分档
    Threshold,
    /// 申报复杂度加价
    Complexity,
    AdditionalService,
    Discount,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BaseFee => "base_fee",
            Self::VatRate => "vat_rate",
            Self::Threshold => "threshold",
            Self::Complexity => "complexity",
            Self::AdditionalService => "additional_service",
            Self::Discount => "discount",
        };
        write!(f, "{}", s)
    }
}

/// 参数的语义类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Decimal,
    Integer,
    Percentage,
    Boolean,
    Text,
}

impl ParameterType {
    /// 是否参与数值计算
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// 规则声明的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub parameter_type: ParameterType,
    /// 调用方未提供时使用的默认值
    #[serde(default)]
    pub default: Option<ParameterValue>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ParameterDeclaration {
    pub fn new(name: impl Into<String>, parameter_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            parameter_type,
            default: None,
            description: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<ParameterValue>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// 计费规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// ISO 3166-1 alpha-2
    pub country_code: String,
    pub rule_type: RuleType,
    pub expression: String,
    /// 适用条件，结果大于 0 视为适用；为空则总是适用
    #[serde(default)]
    pub condition: Option<String>,
    /// 数值越小越先应用
    #[serde(default)]
    pub priority: i32,
    pub effective_from: NaiveDate,
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,
    #[serde(default)]
    pub parameters: Vec<ParameterDeclaration>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        country_code: impl Into<String>,
        rule_type: RuleType,
        expression: impl Into<String>,
        effective_from: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            country_code: country_code.into(),
            rule_type,
            expression: expression.into(),
            condition: None,
            priority: 0,
            effective_from,
            effective_to: None,
            parameters: Vec::new(),
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_effective_to(mut self, effective_to: NaiveDate) -> Self {
        self.effective_to = Some(effective_to);
        self
    }

    pub fn with_parameter(mut self, declaration: ParameterDeclaration) -> Self {
        self.parameters.push(declaration);
        self
    }

    /// 规则在指定日期是否生效（闭区间）
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.effective_to.is_none_or(|to| date <= to)
    }
}

impl AsRef<Rule> for Rule {
    fn as_ref(&self) -> &Rule {
        self
    }
}

/// 单条规则的执行结果
#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule_id: String,
    /// 条件是否满足
    pub applied: bool,
    /// 条件满足时的计费金额
    pub amount: Option<Decimal>,
    pub evaluation_trace: Vec<String>,
    pub evaluation_time_us: i64,
}

impl RuleOutcome {
    pub fn new(rule_id: String) -> Self {
        Self {
            rule_id,
            applied: false,
            amount: None,
            evaluation_trace: Vec::new(),
            evaluation_time_us: 0,
        }
    }
}

/// 已计入国家费用的规则
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedRule {
    pub rule_id: String,
    pub rule_name: String,
    pub rule_type: RuleType,
    pub amount: Decimal,
}

/// 单个国家的费用明细
#[derive(Debug, Clone, Serialize)]
pub struct CountryCostResult {
    pub country_code: String,
    pub effective_date: NaiveDate,
    /// 按应用顺序排列
    pub applied_rules: Vec<AppliedRule>,
    /// 条件不满足而跳过的规则
    pub skipped_rules: Vec<String>,
    pub total: Money,
}

/// 多国费用估算
#[derive(Debug, Clone, Serialize)]
pub struct CostEstimate {
    pub countries: Vec<CountryCostResult>,
    pub total: Money,
}
