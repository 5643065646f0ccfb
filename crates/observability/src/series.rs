use std::collections::VecDeque;

use capacity_core::models::{MetricSnapshot, Trend};

/// 单个指标的定长样本窗口
///
/// 窗口满后淘汰最旧的样本，最小值、最大值和平均值只在窗口内计算。
#[derive(Debug, Clone)]
pub struct MetricSeries {
    name: String,
    samples: VecDeque<f64>,
    capacity: usize,
}

impl MetricSeries {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn current(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn min(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }

    /// 最近 `count` 个样本是否都不低于 `threshold`
    pub fn sustained_at_or_above(&self, threshold: f64, count: usize) -> bool {
        let count = count.max(1);
        self.samples.len() >= count
            && self
                .samples
                .iter()
                .rev()
                .take(count)
                .all(|value| *value >= threshold)
    }

    /// 比较窗口最近三分之一与最早三分之一的均值
    pub fn trend(&self, min_samples: usize, change_percent: f64) -> Trend {
        let len = self.samples.len();
        if len < min_samples.max(3) {
            return Trend::Stable;
        }

        let third = len / 3;
        let older = self.samples.iter().take(third).sum::<f64>() / third as f64;
        let recent = self.samples.iter().skip(len - third).sum::<f64>() / third as f64;

        if older == 0.0 {
            return if recent > 0.0 {
                Trend::Increasing
            } else {
                Trend::Stable
            };
        }

        let change = (recent - older) / older.abs() * 100.0;
        if change > change_percent {
            Trend::Increasing
        } else if change < -change_percent {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    pub fn snapshot(&self, min_samples: usize, change_percent: f64) -> MetricSnapshot {
        MetricSnapshot {
            name: self.name.clone(),
            current: self.current().unwrap_or_default(),
            min: self.min().unwrap_or_default(),
            max: self.max().unwrap_or_default(),
            average: self.average().unwrap_or_default(),
            samples: self.samples.len(),
            trend: self.trend(min_samples, change_percent),
        }
    }
}
