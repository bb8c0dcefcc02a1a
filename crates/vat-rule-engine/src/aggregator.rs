//! 国家费用汇总
//!
//! 对指定国家按顺序执行所有适用规则，把金额累加为一个带币种的 [`Money`]。
//! 每条规则都针对同一份未经修改的参数求值，规则之间不共享中间结果。

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::executor::RuleExecutor;
use crate::models::{AppliedRule, CostEstimate, CountryCostResult, Rule, RuleType};
use crate::money::{self, Money};
use crate::parameters::ParameterBag;
use crate::store::RuleStore;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};
use vat_shared::config::{EngineConfig, InvalidRulePolicy};
use vat_shared::observability::metrics;

/// 费用汇总器
pub struct CostAggregator {
    store: RuleStore,
    executor: RuleExecutor,
    config: EngineConfig,
}

impl CostAggregator {
    pub fn new(store: RuleStore, config: EngineConfig) -> Self {
        let executor = if config.trace_enabled {
            RuleExecutor::new().with_trace()
        } else {
            RuleExecutor::new()
        };

        Self {
            store,
            executor,
            config,
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 指定国家在指定日期生效的全部规则
    pub fn get_applicable_rules(&self, country_code: &str, effective_date: NaiveDate) -> Vec<Rule> {
        self.store
            .applicable(country_code, None, effective_date)
            .into_iter()
            .map(|compiled| compiled.rule)
            .collect()
    }

    pub fn get_applicable_rules_by_type(
        &self,
        country_code: &str,
        rule_type: RuleType,
        effective_date: NaiveDate,
    ) -> Vec<Rule> {
        self.store
            .applicable(country_code, Some(rule_type), effective_date)
            .into_iter()
            .map(|compiled| compiled.rule)
            .collect()
    }

    /// 计算单个国家的总费用
    pub fn calculate_country_cost(
        &self,
        country_code: &str,
        parameters: &ParameterBag,
        effective_date: NaiveDate,
    ) -> Result<Money> {
        self.calculate_country_breakdown(country_code, parameters, effective_date)
            .map(|result| result.total)
    }

    /// 计算单个国家的费用明细
    ///
    /// 条件不满足的规则不计入金额，只出现在 `skipped_rules` 中。
    /// 任意规则求值失败都会中止整个计算。
    #[instrument(skip(self, parameters), fields(country = %country_code, date = %effective_date))]
    pub fn calculate_country_breakdown(
        &self,
        country_code: &str,
        parameters: &ParameterBag,
        effective_date: NaiveDate,
    ) -> Result<CountryCostResult> {
        let rules = self.store.applicable(country_code, None, effective_date);
        let result = self.accumulate(country_code, &rules, parameters, effective_date);

        match &result {
            Ok(breakdown) => {
                metrics::record_country_cost(country_code, "success", breakdown.applied_rules.len());
                info!(
                    total = %breakdown.total,
                    applied = breakdown.applied_rules.len(),
                    skipped = breakdown.skipped_rules.len(),
                    "国家费用计算完成"
                );
            }
            Err(e) => {
                metrics::record_country_cost(country_code, "error", 0);
                warn!(error = %e, "国家费用计算失败");
            }
        }

        result
    }

    /// 计算多个国家的费用并汇总
    #[instrument(skip(self, parameters), fields(countries = country_codes.len()))]
    pub fn calculate_total_cost(
        &self,
        country_codes: &[&str],
        parameters: &ParameterBag,
        effective_date: NaiveDate,
    ) -> Result<CostEstimate> {
        let mut total = Money::zero(self.currency_for(parameters)?);
        let mut countries = Vec::with_capacity(country_codes.len());

        for country_code in country_codes {
            let breakdown =
                self.calculate_country_breakdown(country_code, parameters, effective_date)?;
            total = total.checked_add(&breakdown.total)?;
            countries.push(breakdown);
        }

        Ok(CostEstimate { countries, total })
    }

    /// 批量求值调用方提供的规则，不做筛选和条件检查
    ///
    /// 解析失败或 ID 重复的规则按 `invalid_rule_policy` 处理：中止计算，或跳过并记录警告。
    pub fn evaluate_rules(
        &self,
        rules: &[Rule],
        parameters: &ParameterBag,
    ) -> Result<HashMap<String, Decimal>> {
        let mut compiler = RuleCompiler::new();
        let mut compiled: Vec<CompiledRule> = Vec::with_capacity(rules.len());
        let mut seen = HashSet::new();

        for rule in rules {
            if !seen.insert(rule.id.as_str()) {
                let e = RuleError::duplicate_id(&rule.id);
                if self.config.invalid_rule_policy == InvalidRulePolicy::Skip {
                    warn!(rule_id = %rule.id, error = %e, "跳过重复规则");
                    continue;
                }
                return Err(e);
            }
            match compiler.compile(rule.clone()) {
                Ok(rule) => compiled.push(rule),
                Err(e) if self.config.invalid_rule_policy == InvalidRulePolicy::Skip => {
                    warn!(rule_id = %rule.id, error = %e, "跳过无效规则");
                }
                Err(e) => return Err(e),
            }
        }

        self.executor.evaluate_rules(&compiled, parameters)
    }

    fn accumulate(
        &self,
        country_code: &str,
        rules: &[CompiledRule],
        parameters: &ParameterBag,
        effective_date: NaiveDate,
    ) -> Result<CountryCostResult> {
        let mut total = Money::zero(self.currency_for(parameters)?);
        let mut applied_rules = Vec::new();
        let mut skipped_rules = Vec::new();

        for rule in rules {
            let outcome = self.executor.execute(rule, parameters)?;

            for line in &outcome.evaluation_trace {
                debug!(rule_id = %rule.id(), "{}", line);
            }

            match outcome.amount {
                Some(amount) if outcome.applied => {
                    total.add_amount(amount)?;
                    applied_rules.push(AppliedRule {
                        rule_id: rule.id().to_string(),
                        rule_name: rule.name().to_string(),
                        rule_type: rule.rule.rule_type,
                        amount,
                    });
                }
                _ => skipped_rules.push(rule.id().to_string()),
            }
        }

        Ok(CountryCostResult {
            country_code: country_code.to_ascii_uppercase(),
            effective_date,
            applied_rules,
            skipped_rules,
            total,
        })
    }

    /// 参数中的 `currency` 优先，否则使用配置的默认币种
    fn currency_for(&self, parameters: &ParameterBag) -> Result<String> {
        let code = parameters
            .currency()?
            .unwrap_or(self.config.default_currency.as_str());
        money::currency_code(code)
    }
}
