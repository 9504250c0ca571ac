//! 核心模块
//!
//! 包含管理器配置。

pub mod config;

pub use config::{LogConfig, ManagerConfig, ManagerConfigBuilder, ModuleConfig};
