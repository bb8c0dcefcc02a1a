//! 统一可观测性模块
//!
//! 提供日志和指标的统一初始化。
//! 命令行和测试通过单一入口点配置可观测性，确保一致的指标命名。

pub mod metrics;
pub mod tracing;

use crate::config::ObservabilityConfig;
use ::tracing::info;
use anyhow::Result;

/// 可观测性资源守卫
///
/// 持有指标 recorder 的句柄，用于在进程结束前渲染指标快照。
pub struct ObservabilityGuard {
    metrics_handle: Option<metrics::MetricsHandle>,
}

impl ObservabilityGuard {
    /// 渲染 Prometheus 文本格式的指标快照
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics_handle.as_ref().map(metrics::MetricsHandle::render)
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（日志）
/// 2. Metrics（进程内 Prometheus recorder）
pub fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    let metrics_handle = if config.metrics_enabled {
        Some(metrics::init(config)?)
    } else {
        None
    };

    info!(
        service = %config.service_name,
        metrics_enabled = config.metrics_enabled,
        "Observability initialized"
    );

    Ok(ObservabilityGuard { metrics_handle })
}
