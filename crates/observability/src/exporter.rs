use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// 把指标名转换为Prometheus允许的字符集
pub fn prometheus_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("capacity_{sanitized}")
}

/// 样本同步写入 `metrics` 门面；未安装导出器时为空操作
pub fn mirror_gauge(name: &str, value: f64) {
    metrics::gauge!(prometheus_name(name)).set(value);
}

/// 安装Prometheus导出器并在 `addr` 上提供抓取端点
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    info!(listen = %addr, "Prometheus metrics exporter initialized");
    Ok(())
}
