// 基础配置验证

use crate::{CapacityError, CapacityResult};

/// 配置验证接口
pub trait ConfigValidator {
    fn validate(&self) -> CapacityResult<()>;
}

/// 通用验证工具
pub struct ValidationUtils;

impl ValidationUtils {
    /// 验证字符串非空
    pub fn validate_not_empty(value: &str, field_name: &str) -> CapacityResult<()> {
        if value.trim().is_empty() {
            return Err(CapacityError::config_error(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// 验证毫秒间隔
    pub fn validate_interval_ms(interval_ms: u64, field_name: &str) -> CapacityResult<()> {
        if interval_ms == 0 {
            return Err(CapacityError::config_error(format!(
                "{field_name} must be greater than 0"
            )));
        }
        Ok(())
    }

    /// 验证计数值
    pub fn validate_count(count: usize, field_name: &str, max_value: usize) -> CapacityResult<()> {
        if count == 0 {
            return Err(CapacityError::config_error(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > max_value {
            return Err(CapacityError::config_error(format!(
                "{field_name} must be less than or equal to {max_value}"
            )));
        }
        Ok(())
    }

    /// 验证百分比
    pub fn validate_percent(value: f64, field_name: &str) -> CapacityResult<()> {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(CapacityError::config_error(format!(
                "{field_name} must be between 0 and 100, got {value}"
            )));
        }
        Ok(())
    }
}
