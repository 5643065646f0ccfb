use std::collections::BTreeMap;

use capacity_core::config::ThresholdConfig;
use capacity_core::models::{HealthBand, MetricSnapshot, SystemHealth};

/// 参与健康评分扣分的关键指标
pub const CRITICAL_SUBSET: [&str; 3] = ["cpu", "memory", "error_rate"];

pub const CRITICAL_PENALTY: u32 = 30;
pub const WARNING_PENALTY: u32 = 15;

/// 根据当前指标快照计算系统健康评分
///
/// 满分100，关键指标每个处于严重级别扣30分、处于警告级别扣15分，
/// 其余指标只出现在越线列表中，不参与扣分。
pub fn compute_system_health(
    snapshots: &[MetricSnapshot],
    thresholds: &BTreeMap<String, ThresholdConfig>,
) -> SystemHealth {
    let mut penalty = 0u32;
    let mut critical_metrics = Vec::new();
    let mut warning_metrics = Vec::new();

    for snapshot in snapshots {
        let Some(threshold) = thresholds.get(&snapshot.name) else {
            continue;
        };
        let counted = CRITICAL_SUBSET.contains(&snapshot.name.as_str());

        if snapshot.current >= threshold.critical {
            critical_metrics.push(snapshot.name.clone());
            if counted {
                penalty += CRITICAL_PENALTY;
            }
        } else if snapshot.current >= threshold.warning {
            warning_metrics.push(snapshot.name.clone());
            if counted {
                penalty += WARNING_PENALTY;
            }
        }
    }

    let score = 100u32.saturating_sub(penalty) as u8;
    SystemHealth {
        score,
        band: HealthBand::from_score(score),
        critical_metrics,
        warning_metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capacity_core::config::MetricsConfig;
    use capacity_core::models::Trend;

    fn snapshot(name: &str, current: f64) -> MetricSnapshot {
        MetricSnapshot {
            name: name.to_string(),
            current,
            min: current,
            max: current,
            average: current,
            samples: 1,
            trend: Trend::Stable,
        }
    }

    #[test]
    fn test_full_score_below_warning() {
        let thresholds = MetricsConfig::default().thresholds;
        let health = compute_system_health(
            &[snapshot("cpu", 50.0), snapshot("memory", 40.0), snapshot("error_rate", 1.0)],
            &thresholds,
        );
        assert_eq!(health.score, 100);
        assert_eq!(health.band, HealthBand::Excellent);
        assert!(health.critical_metrics.is_empty());
    }

    #[test]
    fn test_score_strictly_decreases_with_critical_metrics() {
        let thresholds = MetricsConfig::default().thresholds;
        let mut previous = 101;
        let steps = [
            vec![snapshot("cpu", 10.0), snapshot("memory", 10.0), snapshot("error_rate", 0.0)],
            vec![snapshot("cpu", 95.0), snapshot("memory", 10.0), snapshot("error_rate", 0.0)],
            vec![snapshot("cpu", 95.0), snapshot("memory", 99.0), snapshot("error_rate", 0.0)],
            vec![snapshot("cpu", 95.0), snapshot("memory", 99.0), snapshot("error_rate", 50.0)],
        ];
        for step in steps {
            let score = compute_system_health(&step, &thresholds).score as u32;
            assert!(score < previous);
            previous = score;
        }
        assert_eq!(previous, 10);
    }

    #[test]
    fn test_warning_penalty_and_bands() {
        let thresholds = MetricsConfig::default().thresholds;
        let health = compute_system_health(&[snapshot("cpu", 75.0)], &thresholds);
        assert_eq!(health.score, 85);
        assert_eq!(health.band, HealthBand::Good);
        assert_eq!(health.warning_metrics, vec!["cpu".to_string()]);

        let health = compute_system_health(
            &[snapshot("cpu", 95.0), snapshot("memory", 85.0)],
            &thresholds,
        );
        assert_eq!(health.score, 55);
        assert_eq!(health.band, HealthBand::Fair);
    }

    #[test]
    fn test_non_critical_metrics_do_not_penalise() {
        let thresholds = MetricsConfig::default().thresholds;
        let health = compute_system_health(&[snapshot("queue_depth", 5000.0)], &thresholds);
        assert_eq!(health.score, 100);
        assert_eq!(health.critical_metrics, vec!["queue_depth".to_string()]);
    }
}
