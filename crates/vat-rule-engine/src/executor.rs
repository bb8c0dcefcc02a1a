//! 规则执行器
//!
//! 对单条编译后的规则执行条件检查和计费表达式求值，返回金额及评估追踪信息。
//! 条件求值出错与“条件不满足”严格区分：前者是配置错误，必须向上传递。

use crate::compiler::CompiledRule;
use crate::error::{EvaluationPhase, Result};
use crate::evaluator::ExpressionEvaluator;
use crate::models::RuleOutcome;
use crate::parameters::{ParameterBag, WithDefaults};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;
use vat_shared::observability::metrics;

/// 规则执行器
pub struct RuleExecutor {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    /// 检查规则条件
    ///
    /// 没有条件的规则总是适用；否则条件结果严格大于 0 才适用。
    pub fn check_conditions(&self, rule: &CompiledRule, parameters: &ParameterBag) -> Result<bool> {
        self.condition_value(rule, parameters)
            .map(|value| value.is_none_or(|v| v > Decimal::ZERO))
    }

    /// 对计费表达式求值（不检查条件）
    pub fn evaluate_rule(&self, rule: &CompiledRule, parameters: &ParameterBag) -> Result<Decimal> {
        let source = WithDefaults::new(parameters, &rule.defaults);
        let started = Instant::now();

        let result = ExpressionEvaluator::evaluate(&rule.expression.tokens, &source)
            .map_err(|e| e.in_rule(rule.id(), EvaluationPhase::Expression, &rule.expression.source));

        record_evaluation(EvaluationPhase::Expression, result.is_ok(), started);
        result
    }

    /// 批量求值，不做筛选和条件检查
    pub fn evaluate_rules(
        &self,
        rules: &[CompiledRule],
        parameters: &ParameterBag,
    ) -> Result<HashMap<String, Decimal>> {
        rules
            .iter()
            .map(|rule| Ok((rule.id().to_string(), self.evaluate_rule(rule, parameters)?)))
            .collect()
    }

    /// 执行规则：先检查条件，满足时再求值
    pub fn execute(&self, rule: &CompiledRule, parameters: &ParameterBag) -> Result<RuleOutcome> {
        let start = Instant::now();
        let mut outcome = RuleOutcome::new(rule.id().to_string());

        let condition = self.condition_value(rule, parameters)?;
        outcome.applied = condition.is_none_or(|v| v > Decimal::ZERO);

        if self.trace_enabled {
            outcome.evaluation_trace.push(match (&rule.condition, condition) {
                (Some(expr), Some(value)) => format!(
                    "condition: {} => {} ({})",
                    expr.source,
                    value,
                    if outcome.applied { "APPLIED" } else { "SKIPPED" }
                ),
                _ => "condition: <none> => APPLIED".to_string(),
            });
        }

        if outcome.applied {
            let amount = self.evaluate_rule(rule, parameters)?;
            if self.trace_enabled {
                outcome
                    .evaluation_trace
                    .push(format!("expression: {} => {}", rule.expression.source, amount));
            }
            outcome.amount = Some(amount);
        }

        debug!(
            rule_id = %rule.id(),
            applied = outcome.applied,
            amount = ?outcome.amount,
            "规则执行完成"
        );

        outcome.evaluation_time_us = start.elapsed().as_micros() as i64;
        Ok(outcome)
    }

    /// 条件表达式的数值结果；规则没有条件时返回 `None`
    fn condition_value(
        &self,
        rule: &CompiledRule,
        parameters: &ParameterBag,
    ) -> Result<Option<Decimal>> {
        let Some(condition) = &rule.condition else {
            return Ok(None);
        };

        let source = WithDefaults::new(parameters, &rule.defaults);
        let started = Instant::now();

        let result = ExpressionEvaluator::evaluate(&condition.tokens, &source)
            .map(Some)
            .map_err(|e| e.in_rule(rule.id(), EvaluationPhase::Condition, &condition.source));

        record_evaluation(EvaluationPhase::Condition, result.is_ok(), started);
        result
    }
}

impl Default for RuleExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn record_evaluation(phase: EvaluationPhase, ok: bool, started: Instant) {
    let phase = match phase {
        EvaluationPhase::Parse => "parse",
        EvaluationPhase::Condition => "condition",
        EvaluationPhase::Expression => "expression",
    };
    metrics::record_rule_evaluation(phase, ok, started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;
    use crate::error::RuleError;
    use crate::models::{ParameterDeclaration, ParameterType, Rule, RuleType};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn compile(rule: Rule) -> CompiledRule {
        RuleCompiler::new().compile(rule).unwrap()
    }

    fn rule(expression: &str) -> Rule {
        Rule::new(
            "test",
            "DE",
            RuleType::BaseFee,
            expression,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        )
        .with_id("rule-001")
    }

    #[test]
    fn test_no_condition_is_always_applicable() {
        let compiled = compile(rule("100"));
        let executor = RuleExecutor::new();
        assert!(executor.check_conditions(&compiled, &ParameterBag::new()).unwrap());
    }

    #[test]
    fn test_condition_truthiness() {
        let compiled = compile(rule("100").with_condition("transactions - 1000"));
        let executor = RuleExecutor::new();

        for (transactions, expected) in [(1500, true), (1000, false), (10, false)] {
            let bag = ParameterBag::new().with("transactions", transactions);
            assert_eq!(
                executor.check_conditions(&compiled, &bag).unwrap(),
                expected,
                "transactions = {}",
                transactions
            );
        }
    }

    #[test]
    fn test_condition_error_is_not_false() {
        let compiled = compile(rule("100").with_condition("is_registered"));
        let executor = RuleExecutor::new();

        let err = executor
            .check_conditions(&compiled, &ParameterBag::new())
            .unwrap_err();

        assert!(matches!(
            err,
            RuleError::RuleFailed { phase: EvaluationPhase::Condition, ref rule_id, .. } if rule_id == "rule-001"
        ));
        assert!(matches!(err.root_cause(), RuleError::ParameterMissing { .. }));
    }

    #[test]
    fn test_evaluate_rule_error_context() {
        let compiled = compile(rule("turnover / months"));
        let executor = RuleExecutor::new();
        let bag = ParameterBag::new().with("turnover", 1200).with("months", 0);

        let err = executor.evaluate_rule(&compiled, &bag).unwrap_err();
        assert!(matches!(
            err,
            RuleError::RuleFailed { phase: EvaluationPhase::Expression, ref expression, .. }
                if expression == "turnover / months"
        ));
        assert!(matches!(err.root_cause(), RuleError::Arithmetic { .. }));
    }

    #[test]
    fn test_declared_defaults() {
        let compiled = compile(
            rule("base * multiplier")
                .with_parameter(ParameterDeclaration::new("base", ParameterType::Decimal))
                .with_parameter(
                    ParameterDeclaration::new("multiplier", ParameterType::Decimal)
                        .with_default(dec!(1.5)),
                ),
        );
        let executor = RuleExecutor::new();

        let bag = ParameterBag::new().with("base", 100);
        assert_eq!(executor.evaluate_rule(&compiled, &bag).unwrap(), dec!(150));

        // 调用方提供的值优先于默认值
        let bag = ParameterBag::new().with("base", 100).with("multiplier", 2);
        assert_eq!(executor.evaluate_rule(&compiled, &bag).unwrap(), dec!(200));

        // 没有默认值的参数缺失仍然是错误
        let err = executor.evaluate_rule(&compiled, &ParameterBag::new()).unwrap_err();
        assert!(matches!(err.root_cause(), RuleError::ParameterMissing { name } if name == "base"));
    }

    #[test]
    fn test_execute_skipped_rule() {
        let compiled = compile(rule("1 / 0").with_condition("0"));
        let executor = RuleExecutor::new().with_trace();

        // 条件不满足时不会对计费表达式求值
        let outcome = executor.execute(&compiled, &ParameterBag::new()).unwrap();
        assert!(!outcome.applied);
        assert!(outcome.amount.is_none());
        assert!(outcome.evaluation_trace[0].contains("SKIPPED"));
    }

    #[test]
    fn test_execute_applied_rule_with_trace() {
        let compiled = compile(rule("turnover * 0.002").with_condition("turnover - 50000"));
        let executor = RuleExecutor::new().with_trace();
        let bag = ParameterBag::new().with("turnover", 100000);

        let outcome = executor.execute(&compiled, &bag).unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.amount, Some(dec!(200)));
        assert_eq!(outcome.evaluation_trace.len(), 2);
        assert!(outcome.evaluation_trace[0].contains("APPLIED"));
        assert!(outcome.evaluation_trace[1].contains("200"));
        assert!(outcome.evaluation_time_us >= 0);
    }

    #[test]
    fn test_evaluate_rules_batch() {
        let rules = vec![
            compile(rule("a + b").with_id("sum")),
            compile(rule("a * b").with_id("product").with_condition("0")),
        ];
        let executor = RuleExecutor::new();
        let bag = ParameterBag::new().with("a", 3).with("b", 4);

        let results = executor.evaluate_rules(&rules, &bag).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results["sum"], dec!(7));
        // 批量求值不检查条件
        assert_eq!(results["product"], dec!(12));
    }

    #[test]
    fn test_evaluate_rules_reports_failing_rule() {
        let rules = vec![
            compile(rule("a").with_id("ok")),
            compile(rule("missing").with_id("broken")),
        ];
        let executor = RuleExecutor::new();
        let bag = ParameterBag::new().with("a", 1);

        let err = executor.evaluate_rules(&rules, &bag).unwrap_err();
        assert_eq!(err.rule_id(), Some("broken"));
    }
}
