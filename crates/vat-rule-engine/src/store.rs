//! 规则目录
//!
//! 使用 DashMap 缓存编译后的规则，规则表达式只在加载时解析一次。
//! 目录只在加载、更新、删除时变化，计费过程只读取快照。

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::models::{Rule, RuleType};
use crate::selector::{RuleQuery, RuleSelector};
use chrono::NaiveDate;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use vat_shared::config::InvalidRulePolicy;

/// 规则目录
#[derive(Clone)]
pub struct RuleStore {
    /// 编译后的规则缓存
    rules: Arc<DashMap<String, CompiledRule>>,
    /// 规则编译器
    compiler: Arc<parking_lot::Mutex<RuleCompiler>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            compiler: Arc::new(parking_lot::Mutex::new(RuleCompiler::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 编译并加载规则
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, country = %rule.country_code))]
    pub fn load(&self, rule: Rule) -> Result<()> {
        let compiled = self.compiler.lock().compile(rule)?;

        let rule_id = compiled.id().to_string();
        self.rules.insert(rule_id.clone(), compiled);

        info!("规则已加载: {}", rule_id);
        Ok(())
    }

    /// 从 JSON 字符串加载单条规则
    #[instrument(skip(self, json))]
    pub fn load_from_json(&self, json: &str) -> Result<String> {
        let compiled = self.compiler.lock().compile_from_json(json)?;

        let rule_id = compiled.id().to_string();
        self.rules.insert(rule_id.clone(), compiled);

        info!("规则已加载: {}", rule_id);
        Ok(rule_id)
    }

    /// 更新已存在的规则
    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub fn update(&self, rule: Rule) -> Result<()> {
        let rule_id = rule.id.clone();

        if !self.rules.contains_key(&rule_id) {
            warn!("更新不存在的规则: {}", rule_id);
            return Err(RuleError::RuleNotFound(rule_id));
        }

        self.load(rule)
    }

    #[instrument(skip(self))]
    pub fn delete(&self, rule_id: &str) -> Result<()> {
        if self.rules.remove(rule_id).is_some() {
            info!("规则已删除: {}", rule_id);
            Ok(())
        } else {
            warn!("删除不存在的规则: {}", rule_id);
            Err(RuleError::RuleNotFound(rule_id.to_string()))
        }
    }

    pub fn get(&self, rule_id: &str) -> Option<CompiledRule> {
        self.rules.get(rule_id).map(|r| r.clone())
    }

    pub fn contains(&self, rule_id: &str) -> bool {
        self.rules.contains_key(rule_id)
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.key().clone()).collect()
    }

    pub fn list_all(&self) -> Vec<CompiledRule> {
        self.rules.iter().map(|r| r.value().clone()).collect()
    }

    /// 批量加载规则
    ///
    /// 每条规则独立编译，失败的规则连同原因记录在报告中；
    /// 同一批次中重复出现的规则 ID 也按失败处理，首次出现的规则保留。
    /// `Abort` 策略下只要有一条规则失败就不加载任何规则并返回第一个错误；
    /// `Skip` 策略下跳过失败的规则，其余规则正常加载。
    #[instrument(skip(self, rules), fields(count = rules.len()))]
    pub fn load_batch(
        &self,
        rules: Vec<Rule>,
        policy: InvalidRulePolicy,
    ) -> Result<BatchLoadReport> {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut report = BatchLoadReport::default();

        {
            let mut compiler = self.compiler.lock();
            let mut seen = HashSet::new();
            for rule in rules {
                let rule_id = rule.id.clone();
                if !seen.insert(rule_id.clone()) {
                    warn!(rule_id = %rule_id, "批量中的规则 ID 重复");
                    report.failed.push((rule_id.clone(), RuleError::duplicate_id(rule_id)));
                    continue;
                }
                match compiler.compile(rule) {
                    Ok(rule) => compiled.push(rule),
                    Err(e) => {
                        warn!(rule_id = %rule_id, error = %e, "规则编译失败");
                        report.failed.push((rule_id, e));
                    }
                }
            }
        }

        if policy == InvalidRulePolicy::Abort && !report.failed.is_empty() {
            warn!("批量加载中止: {} 条规则无效", report.failed.len());
            return Err(report.failed.swap_remove(0).1);
        }

        for rule in compiled {
            let rule_id = rule.id().to_string();
            self.rules.insert(rule_id.clone(), rule);
            report.loaded.push(rule_id);
        }

        info!(
            "批量加载完成: {} 成功, {} 跳过",
            report.loaded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// 从 JSON 数组批量加载规则
    pub fn load_batch_from_json(
        &self,
        json: &str,
        policy: InvalidRulePolicy,
    ) -> Result<BatchLoadReport> {
        let rules: Vec<Rule> = serde_json::from_str(json)?;
        self.load_batch(rules, policy)
    }

    #[instrument(skip(self))]
    pub fn clear(&self) {
        let count = self.rules.len();
        self.rules.clear();
        info!("已清空 {} 条规则", count);
    }

    /// 按国家、类别、日期筛选并排序
    pub fn applicable(
        &self,
        country_code: &str,
        rule_type: Option<RuleType>,
        effective_date: NaiveDate,
    ) -> Vec<CompiledRule> {
        let mut query = RuleQuery::new(country_code, effective_date);
        query.rule_type = rule_type;

        let mut selected: Vec<CompiledRule> = self
            .rules
            .iter()
            .filter(|r| query.matches(&r.rule))
            .map(|r| r.value().clone())
            .collect();

        RuleSelector::order(&mut selected);
        selected
    }

    pub fn stats(&self) -> RuleStoreStats {
        let rules_count = self.rules.len();
        let total_parameters: usize = self
            .rules
            .iter()
            .map(|r| r.required_parameters.len())
            .sum();
        let mut countries: Vec<String> = self
            .rules
            .iter()
            .map(|r| r.rule.country_code.to_ascii_uppercase())
            .collect();
        countries.sort();
        countries.dedup();

        RuleStoreStats {
            rules_count,
            countries,
            total_parameters,
            avg_parameters_per_rule: if rules_count > 0 {
                total_parameters as f64 / rules_count as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 批量加载报告
#[derive(Debug, Default)]
pub struct BatchLoadReport {
    pub loaded: Vec<String>,
    /// 加载失败的规则 ID 及原因
    pub failed: Vec<(String, RuleError)>,
}

impl BatchLoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 规则目录统计信息
#[derive(Debug, Clone)]
pub struct RuleStoreStats {
    pub rules_count: usize,
    /// 涉及的国家代码（去重、排序）
    pub countries: Vec<String>,
    /// 所有规则引用的参数总数
    pub total_parameters: usize,
    pub avg_parameters_per_rule: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_rule(id: &str, country: &str) -> Rule {
        Rule::new(
            format!("{} rule", id),
            country,
            RuleType::BaseFee,
            "turnover * rate",
            date(2023, 1, 1),
        )
        .with_id(id)
    }

    fn sample_rule_json(id: &str) -> String {
        format!(
            r#"
            {{
                "id": "{}",
                "name": "Netherlands base fee",
                "country_code": "NL",
                "rule_type": "base_fee",
                "expression": "max(100, transactions * 0.5)",
                "effective_from": "2023-01-01"
            }}
            "#,
            id
        )
    }

    #[test]
    fn test_load_rule() {
        let store = RuleStore::new();
        store.load(sample_rule("rule-001", "DE")).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.contains("rule-001"));
    }

    #[test]
    fn test_load_invalid_rule_is_rejected() {
        let store = RuleStore::new();
        let mut rule = sample_rule("rule-001", "DE");
        rule.expression = "turnover *".to_string();

        let err = store.load(rule).unwrap_err();
        assert_eq!(err.rule_id(), Some("rule-001"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_from_json() {
        let store = RuleStore::new();
        let rule_id = store.load_from_json(&sample_rule_json("nl-base")).unwrap();

        assert_eq!(rule_id, "nl-base");
        let compiled = store.get("nl-base").unwrap();
        assert_eq!(compiled.name(), "Netherlands base fee");
        assert!(compiled.required_parameters.contains("transactions"));
    }

    #[test]
    fn test_get_nonexistent_rule() {
        let store = RuleStore::new();
        assert!(store.get("nonexistent").is_none());
    }

    #[test]
    fn test_update_rule() {
        let store = RuleStore::new();
        store.load(sample_rule("rule-001", "DE")).unwrap();

        let mut updated = sample_rule("rule-001", "DE");
        updated.expression = "turnover * rate * 2".to_string();
        store.update(updated).unwrap();

        let rule = store.get("rule-001").unwrap();
        assert_eq!(rule.expression.source, "turnover * rate * 2");
    }

    #[test]
    fn test_update_nonexistent_rule() {
        let store = RuleStore::new();
        let result = store.update(sample_rule("rule-001", "DE"));
        assert!(matches!(result, Err(RuleError::RuleNotFound(_))));
    }

    #[test]
    fn test_delete_rule() {
        let store = RuleStore::new();
        store.load(sample_rule("rule-001", "DE")).unwrap();

        store.delete("rule-001").unwrap();

        assert!(!store.contains("rule-001"));
        assert!(store.delete("rule-001").is_err());
    }

    #[test]
    fn test_list_ids() {
        let store = RuleStore::new();
        store.load(sample_rule("rule-001", "DE")).unwrap();
        store.load(sample_rule("rule-002", "FR")).unwrap();

        let ids = store.list_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"rule-001".to_string()));
        assert!(ids.contains(&"rule-002".to_string()));
        assert_eq!(store.list_all().len(), 2);
    }

    fn batch_with_broken_rule() -> Vec<Rule> {
        let mut broken = sample_rule("broken", "DE");
        broken.expression = "max(1".to_string();
        vec![sample_rule("rule-001", "DE"), broken, sample_rule("rule-003", "FR")]
    }

    #[test]
    fn test_load_batch_skip_policy() {
        let store = RuleStore::new();
        let report = store
            .load_batch(batch_with_broken_rule(), InvalidRulePolicy::Skip)
            .unwrap();

        assert_eq!(report.loaded, vec!["rule-001", "rule-003"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert_eq!(report.failed[0].1.rule_id(), Some("broken"));
        assert!(!report.is_complete());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_load_batch_abort_policy() {
        let store = RuleStore::new();
        let err = store
            .load_batch(batch_with_broken_rule(), InvalidRulePolicy::Abort)
            .unwrap_err();

        assert_eq!(err.rule_id(), Some("broken"));
        // 中止时不加载任何规则
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_batch_rejects_duplicate_ids_on_abort() {
        let store = RuleStore::new();
        let mut second = sample_rule("dup", "DE");
        second.expression = "50".to_string();

        let err = store
            .load_batch(vec![sample_rule("dup", "DE"), second], InvalidRulePolicy::Abort)
            .unwrap_err();

        assert!(matches!(err, RuleError::InvalidRule { ref rule_id, .. } if rule_id == "dup"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_batch_skips_duplicate_ids() {
        let store = RuleStore::new();
        let mut second = sample_rule("dup", "DE");
        second.expression = "50".to_string();

        let report = store
            .load_batch(
                vec![sample_rule("dup", "DE"), second, sample_rule("other", "DE")],
                InvalidRulePolicy::Skip,
            )
            .unwrap();

        // 首次出现的规则保留，重复项记入失败列表
        assert_eq!(report.loaded, vec!["dup", "other"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "dup");
        assert!(report.failed[0].1.to_string().contains("重复"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("dup").unwrap().expression.source, "turnover * rate");
    }

    #[test]
    fn test_load_batch_from_json() {
        let store = RuleStore::new();
        let json = format!("[{}, {}]", sample_rule_json("nl-1"), sample_rule_json("nl-2"));

        let report = store
            .load_batch_from_json(&json, InvalidRulePolicy::Abort)
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_applicable_uses_selector_order() {
        let store = RuleStore::new();
        store.load(sample_rule("z-first", "DE").with_priority(1)).unwrap();
        store.load(sample_rule("a-second", "DE").with_priority(2)).unwrap();
        store.load(sample_rule("b-second", "DE").with_priority(2)).unwrap();
        store.load(sample_rule("fr", "FR")).unwrap();

        let ids: Vec<String> = store
            .applicable("DE", None, date(2023, 6, 1))
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["z-first", "a-second", "b-second"]);

        assert!(store.applicable("DE", Some(RuleType::Discount), date(2023, 6, 1)).is_empty());
    }

    #[test]
    fn test_clear() {
        let store = RuleStore::new();
        store.load(sample_rule("rule-001", "DE")).unwrap();
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_stats() {
        let store = RuleStore::new();
        store.load(sample_rule("rule-001", "DE")).unwrap();
        store.load(sample_rule("rule-002", "de")).unwrap();
        store.load(sample_rule("rule-003", "FR")).unwrap();

        let stats = store.stats();

        assert_eq!(stats.rules_count, 3);
        assert_eq!(stats.countries, vec!["DE", "FR"]);
        assert_eq!(stats.total_parameters, 6); // 每个规则引用 turnover 和 rate
        assert_eq!(stats.avg_parameters_per_rule, 2.0);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let store = RuleStore::new();
        let store_clone = store.clone();

        let handle = thread::spawn(move || {
            for i in 0..100 {
                store_clone
                    .load(sample_rule(&format!("rule-{}", i), "DE"))
                    .unwrap();
            }
        });

        for i in 100..200 {
            store.load(sample_rule(&format!("rule-{}", i), "FR")).unwrap();
        }

        handle.join().unwrap();

        assert_eq!(store.len(), 200);
    }
}
