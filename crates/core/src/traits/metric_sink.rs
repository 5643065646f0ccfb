/// 指标样本接收端
///
/// 由指标引擎实现，通过依赖注入交给其他组件，调用方不等待结果。
pub trait MetricSink: Send + Sync {
    fn record(&self, name: &str, value: f64);
}

/// 丢弃所有样本
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricSink;

impl MetricSink for NoopMetricSink {
    fn record(&self, _name: &str, _value: f64) {}
}
