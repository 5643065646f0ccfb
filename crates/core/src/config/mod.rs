//! 配置模型与加载
//!
//! 库本身只接收已构建好的 [`AppConfig`]，从文件和环境变量加载只发生在
//! 二进制入口处。每个配置段都实现 [`ConfigValidator`]。

pub mod models;
pub mod validation;

pub use models::*;
pub use validation::{ConfigValidator, ValidationUtils};
