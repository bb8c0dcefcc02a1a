//! 规则引擎错误类型

use std::fmt;
use thiserror::Error;

/// 规则处理阶段，用于在错误中标明失败发生的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationPhase {
    /// 表达式解析
    Parse,
    /// 条件检查
    Condition,
    /// 计费表达式求值
    Expression,
}

impl fmt::Display for EvaluationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "解析"),
            Self::Condition => write!(f, "条件检查"),
            Self::Expression => write!(f, "表达式求值"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("表达式语法错误 (位置 {position}): {message}")]
    Syntax { position: usize, message: String },

    #[error("后缀表达式结构错误 (第 {token_index} 个记号): {message}")]
    Structural { token_index: usize, message: String },

    #[error("参数不存在: {name}")]
    ParameterMissing { name: String },

    #[error("参数无法转换为数值: {name} (类型 {value_type})")]
    TypeConversion { name: String, value_type: String },

    #[error("算术错误: {operation} - {message}")]
    Arithmetic { operation: String, message: String },

    #[error("货币不一致: 期望 {expected}, 实际 {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("无效的货币代码: {value}")]
    InvalidCurrency { value: String },

    #[error("规则定义无效: {rule_id} - {message}")]
    InvalidRule { rule_id: String, message: String },

    #[error("规则 {rule_id} {phase}失败 (表达式 '{expression}'): {source}")]
    RuleFailed {
        rule_id: String,
        phase: EvaluationPhase,
        expression: String,
        #[source]
        source: Box<RuleError>,
    },

    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn structural(token_index: usize, message: impl Into<String>) -> Self {
        Self::Structural {
            token_index,
            message: message.into(),
        }
    }

    pub(crate) fn arithmetic(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Arithmetic {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// 同一批规则中出现重复的规则 ID
    pub(crate) fn duplicate_id(rule_id: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule_id: rule_id.into(),
            message: "规则 ID 重复".to_string(),
        }
    }

    /// 为错误附加规则上下文
    pub fn in_rule(
        self,
        rule_id: impl Into<String>,
        phase: EvaluationPhase,
        expression: impl Into<String>,
    ) -> Self {
        Self::RuleFailed {
            rule_id: rule_id.into(),
            phase,
            expression: expression.into(),
            source: Box::new(self),
        }
    }

    /// 剥离规则上下文，返回最内层的错误
    pub fn root_cause(&self) -> &RuleError {
        match self {
            Self::RuleFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// 出错规则的 ID（若错误带有规则上下文）
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Self::RuleFailed { rule_id, .. } | Self::InvalidRule { rule_id, .. } => Some(rule_id),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
