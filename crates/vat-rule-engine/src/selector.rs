//! 规则筛选
//!
//! 按国家、规则类别和生效日期过滤规则目录，并按 (优先级, 规则 ID) 排序，
//! 保证相同输入总是得到相同的规则顺序。

use crate::models::{Rule, RuleType};
use chrono::NaiveDate;

/// 规则筛选条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleQuery {
    pub country_code: String,
    pub rule_type: Option<RuleType>,
    pub effective_date: NaiveDate,
}

impl RuleQuery {
    pub fn new(country_code: impl Into<String>, effective_date: NaiveDate) -> Self {
        Self {
            country_code: country_code.into(),
            rule_type: None,
            effective_date,
        }
    }

    pub fn with_type(mut self, rule_type: RuleType) -> Self {
        self.rule_type = Some(rule_type);
        self
    }

    /// 规则是否满足筛选条件
    pub fn matches(&self, rule: &Rule) -> bool {
        rule.country_code.eq_ignore_ascii_case(&self.country_code)
            && rule.is_effective_on(self.effective_date)
            && self.rule_type.is_none_or(|t| rule.rule_type == t)
    }
}

/// 规则筛选器
pub struct RuleSelector;

impl RuleSelector {
    /// 指定国家在指定日期生效的全部规则
    pub fn get_applicable_rules<'a, R: AsRef<Rule>>(
        rules: &'a [R],
        country_code: &str,
        effective_date: NaiveDate,
    ) -> Vec<&'a R> {
        Self::select(rules, &RuleQuery::new(country_code, effective_date))
    }

    /// 指定国家、类别在指定日期生效的规则
    pub fn get_applicable_rules_by_type<'a, R: AsRef<Rule>>(
        rules: &'a [R],
        country_code: &str,
        rule_type: RuleType,
        effective_date: NaiveDate,
    ) -> Vec<&'a R> {
        Self::select(
            rules,
            &RuleQuery::new(country_code, effective_date).with_type(rule_type),
        )
    }

    pub fn select<'a, R: AsRef<Rule>>(rules: &'a [R], query: &RuleQuery) -> Vec<&'a R> {
        let mut selected: Vec<&R> = rules.iter().filter(|r| query.matches(r.as_ref())).collect();
        Self::order(&mut selected);
        selected
    }

    /// 按 (优先级, 规则 ID) 原地排序
    pub fn order<R: AsRef<Rule>>(rules: &mut [R]) {
        rules.sort_by(|a, b| {
            let (a, b): (&Rule, &Rule) = (a.as_ref(), b.as_ref());
            a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id))
        });
    }
}
