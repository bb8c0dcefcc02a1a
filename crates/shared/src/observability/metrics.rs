//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集。
//! recorder 只在进程内安装，不启动 HTTP 端点；快照由调用方渲染输出。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::ObservabilityConfig;

/// Metrics 资源句柄
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// 安装进程内 Prometheus recorder
pub fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    Ok(MetricsHandle { handle })
}

/// 注册通用指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("rule_evaluations_total", "Total number of rule evaluations");
    metrics::describe_histogram!(
        "rule_evaluation_duration_seconds",
        "Rule evaluation duration in seconds"
    );
    metrics::describe_counter!(
        "country_cost_calculations_total",
        "Total number of country cost calculations"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录规则评估
///
/// `phase` 为 condition 或 expression，`success` 表示求值是否成功。
#[inline]
pub fn record_rule_evaluation(phase: &'static str, success: bool, duration_secs: f64) {
    let outcome = if success { "ok" } else { "error" };

    metrics::counter!(
        "rule_evaluations_total",
        "phase" => phase,
        "outcome" => outcome
    )
    .increment(1);

    metrics::histogram!("rule_evaluation_duration_seconds", "phase" => phase)
        .record(duration_secs);
}

/// 记录单个国家的计费
#[inline]
pub fn record_country_cost(country_code: &str, status: &str, applied_rules: usize) {
    metrics::counter!(
        "country_cost_calculations_total",
        "country" => country_code.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "country_cost_applied_rules",
        "country" => country_code.to_string()
    )
    .record(applied_rules as f64);
}
