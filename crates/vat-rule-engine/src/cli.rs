//! CLI 命令定义
//!
//! 使用 clap derive 宏定义 `vat-cost` 命令行接口，
//! 命令的执行逻辑放在 [`CommandRunner`] 中，便于在测试中直接调用。

use crate::aggregator::CostAggregator;
use crate::models::CostEstimate;
use crate::parameters::ParameterBag;
use crate::store::RuleStore;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use vat_shared::config::{EngineConfig, InvalidRulePolicy};

/// VAT 申报费用估算工具
#[derive(Parser, Debug)]
#[command(name = "vat-cost")]
#[command(version, about = "按国家规则估算 VAT 申报费用")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别，覆盖配置文件 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// 输出 JSON 格式日志
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 估算一个或多个国家的费用
    Estimate {
        /// 规则定义文件（JSON 数组）
        #[arg(short, long)]
        rules: PathBuf,

        /// 参数文件（JSON 对象）
        #[arg(short, long)]
        params: PathBuf,

        /// 国家代码，可重复指定
        #[arg(short, long = "country", required = true)]
        countries: Vec<String>,

        /// 生效日期 (YYYY-MM-DD)，默认为今天
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// 计算完成后输出指标快照
        #[arg(long)]
        metrics: bool,
    },

    /// 校验规则定义文件，列出无法编译的规则
    Validate {
        /// 规则定义文件（JSON 数组）
        #[arg(short, long)]
        rules: PathBuf,
    },
}

/// 规则校验报告
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub valid: Vec<String>,
    pub invalid: Vec<InvalidRuleEntry>,
}

#[derive(Debug, Serialize)]
pub struct InvalidRuleEntry {
    pub rule_id: String,
    pub error: String,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// 命令执行器
pub struct CommandRunner {
    config: EngineConfig,
}

impl CommandRunner {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// 加载规则和参数并估算费用
    pub fn run_estimate(
        &self,
        rules_path: &Path,
        params_path: &Path,
        countries: &[String],
        date: NaiveDate,
    ) -> Result<CostEstimate> {
        let store = RuleStore::new();
        let report = store
            .load_batch_from_json(&read_file(rules_path)?, self.config.invalid_rule_policy)
            .with_context(|| format!("无法加载规则文件 {}", rules_path.display()))?;
        info!(
            loaded = report.loaded.len(),
            skipped = report.failed.len(),
            "规则加载完成"
        );

        let parameters = ParameterBag::from_json(&read_file(params_path)?)
            .with_context(|| format!("无法解析参数文件 {}", params_path.display()))?;

        let aggregator = CostAggregator::new(store, self.config.clone());
        let countries: Vec<&str> = countries.iter().map(String::as_str).collect();

        Ok(aggregator.calculate_total_cost(&countries, &parameters, date)?)
    }

    /// 编译规则文件中的每条规则，报告所有失败项
    pub fn run_validate(&self, rules_path: &Path) -> Result<ValidationReport> {
        let store = RuleStore::new();
        let report = store
            .load_batch_from_json(&read_file(rules_path)?, InvalidRulePolicy::Skip)
            .with_context(|| format!("无法解析规则文件 {}", rules_path.display()))?;

        Ok(ValidationReport {
            valid: report.loaded,
            invalid: report
                .failed
                .into_iter()
                .map(|(rule_id, e)| InvalidRuleEntry {
                    rule_id,
                    error: e.to_string(),
                })
                .collect(),
        })
    }
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("无法读取文件 {}", path.display()))
}
