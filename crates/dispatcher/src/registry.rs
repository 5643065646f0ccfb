use std::collections::HashMap;
use std::sync::Arc;

use capacity_core::traits::TaskHandler;
use capacity_core::{CapacityError, CapacityResult};
use tracing::debug;

/// 按任务类型注册的处理器
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同名类型会被覆盖
    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        debug!("注册任务处理器: {} -> {}", task_type, handler.name());
        self.handlers.insert(task_type, handler);
    }

    pub fn with(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(task_type, handler);
        self
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    /// 查找队列配置引用的处理器，缺失视为配置错误
    pub fn resolve(&self, queue: &str, task_type: &str) -> CapacityResult<Arc<dyn TaskHandler>> {
        self.get(task_type).ok_or_else(|| {
            CapacityError::config_error(format!(
                "queue '{queue}' references unregistered handler '{task_type}'"
            ))
        })
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capacity_testing_utils::ScriptedTaskHandler;

    #[test]
    fn test_resolve_registered_handler() {
        let registry =
            HandlerRegistry::new().with("email", Arc::new(ScriptedTaskHandler::new("email")));
        assert_eq!(registry.resolve("emails", "email").unwrap().name(), "email");
        assert_eq!(registry.task_types(), vec!["email".to_string()]);
    }

    #[test]
    fn test_missing_handler_is_configuration_error() {
        let registry = HandlerRegistry::new();
        let err = registry.resolve("emails", "email").err().unwrap();
        assert!(matches!(err, CapacityError::Configuration(_)));
        assert!(registry.is_empty());
    }
}
