use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 指标趋势
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    #[default]
    Stable,
}

/// 告警级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// 告警
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub metric: String,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub trend: Trend,
}

impl Alert {
    pub fn message(&self) -> String {
        format!(
            "[{}] {} = {:.2} (阈值: {:.2}, 趋势: {:?})",
            self.severity, self.metric, self.value, self.threshold, self.trend
        )
    }
}

/// 指标序列快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub name: String,
    pub current: f64,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub samples: usize,
    pub trend: Trend,
}

/// 系统健康等级
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => HealthBand::Excellent,
            70..=89 => HealthBand::Good,
            50..=69 => HealthBand::Fair,
            _ => HealthBand::Poor,
        }
    }
}

/// 系统健康评分
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub score: u8,
    pub band: HealthBand,
    pub critical_metrics: Vec<String>,
    pub warning_metrics: Vec<String>,
}
