//! 规则编译器
//!
//! 校验规则定义，并将计费表达式和条件表达式预先解析为后缀记号序列，
//! 同时提取规则引用的参数名。

use crate::error::{EvaluationPhase, Result, RuleError};
use crate::models::Rule;
use crate::parameters::ParameterValue;
use crate::parser::{Expression, ExpressionParser};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static COUNTRY_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{2}$").expect("country code pattern"));

static PARAMETER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("parameter name pattern"));

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 原始规则
    pub rule: Rule,
    pub expression: Expression,
    pub condition: Option<Expression>,
    /// 计费表达式和条件中引用的所有参数
    pub required_parameters: HashSet<String>,
    /// 参数声明中的默认值
    pub defaults: HashMap<String, ParameterValue>,
    /// 编译版本号（用于缓存失效）
    pub compile_version: u64,
}

impl CompiledRule {
    pub fn id(&self) -> &str {
        &self.rule.id
    }

    pub fn name(&self) -> &str {
        &self.rule.name
    }
}

impl AsRef<Rule> for CompiledRule {
    fn as_ref(&self) -> &Rule {
        &self.rule
    }
}

/// 规则编译器
pub struct RuleCompiler {
    compile_version: u64,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self { compile_version: 0 }
    }

    /// 从 JSON 字符串编译规则
    pub fn compile_from_json(&mut self, json: &str) -> Result<CompiledRule> {
        let rule: Rule = serde_json::from_str(json)?;
        self.compile(rule)
    }

    /// 编译规则
    pub fn compile(&mut self, rule: Rule) -> Result<CompiledRule> {
        self.validate_rule(&rule)?;

        let expression = ExpressionParser::parse(&rule.expression)
            .map_err(|e| e.in_rule(&rule.id, EvaluationPhase::Parse, &rule.expression))?;

        let condition = rule
            .condition
            .as_deref()
            .map(|text| {
                ExpressionParser::parse(text)
                    .map_err(|e| e.in_rule(&rule.id, EvaluationPhase::Parse, text))
            })
            .transpose()?;

        let required_parameters = Self::collect_parameters(&expression, condition.as_ref());

        let defaults = rule
            .parameters
            .iter()
            .filter_map(|decl| decl.default.clone().map(|value| (decl.name.clone(), value)))
            .collect();

        self.compile_version += 1;

        Ok(CompiledRule {
            rule,
            expression,
            condition,
            required_parameters,
            defaults,
            compile_version: self.compile_version,
        })
    }

    /// 验证规则结构
    fn validate_rule(&self, rule: &Rule) -> Result<()> {
        let invalid = |message: String| RuleError::InvalidRule {
            rule_id: rule.id.clone(),
            message,
        };

        if rule.id.trim().is_empty() {
            return Err(invalid("规则 ID 不能为空".to_string()));
        }

        if !COUNTRY_CODE.is_match(&rule.country_code) {
            return Err(invalid(format!("无效的国家代码 '{}'", rule.country_code)));
        }

        if let Some(to) = rule.effective_to {
            if rule.effective_from > to {
                return Err(invalid(format!(
                    "生效起始日 {} 晚于截止日 {}",
                    rule.effective_from, to
                )));
            }
        }

        let mut seen = HashSet::new();
        for decl in &rule.parameters {
            if !PARAMETER_NAME.is_match(&decl.name) {
                return Err(invalid(format!("无效的参数名 '{}'", decl.name)));
            }
            if !seen.insert(decl.name.as_str()) {
                return Err(invalid(format!("参数 '{}' 重复声明", decl.name)));
            }
            if let (true, Some(default)) = (decl.parameter_type.is_numeric(), &decl.default) {
                default
                    .to_decimal(&decl.name)
                    .map_err(|e| invalid(format!("参数 '{}' 的默认值无效: {}", decl.name, e)))?;
            }
        }

        Ok(())
    }

    fn collect_parameters(
        expression: &Expression,
        condition: Option<&Expression>,
    ) -> HashSet<String> {
        expression
            .variables()
            .into_iter()
            .chain(condition.into_iter().flat_map(Expression::variables))
            .map(str::to_string)
            .collect()
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}
