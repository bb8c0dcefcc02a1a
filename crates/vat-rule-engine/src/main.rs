//! VAT 申报费用估算命令行
//!
//! 从 JSON 文件加载规则和参数，输出各国费用明细和总额。

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use rule_engine::cli::{Cli, CommandRunner, Commands};
use std::process::ExitCode;
use tracing::info;
use vat_shared::config::AppConfig;
use vat_shared::observability;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // 统一加载配置：从 config/{service_name}.toml 加载，包含可观测性配置
    let mut config = AppConfig::load("vat-rule-engine").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    config.observability.json_logs |= cli.json_logs;

    let guard = observability::init(&config.observability)?;
    info!(environment = %config.environment, "vat-cost started");

    let runner = CommandRunner::new(config.engine.clone());

    match cli.command {
        Commands::Estimate {
            rules,
            params,
            countries,
            date,
            metrics,
        } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let estimate = runner.run_estimate(&rules, &params, &countries, date)?;
            println!("{}", serde_json::to_string_pretty(&estimate)?);

            if metrics {
                match guard.render_metrics() {
                    Some(rendered) => eprintln!("{}", rendered),
                    None => eprintln!("metrics are disabled in configuration"),
                }
            }
        }
        Commands::Validate { rules } => {
            let report = runner.run_validate(&rules)?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.is_valid() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
