//! # Chips App Manager - 薯片应用模块管理
//!
//! 管理薯片平台上应用模块的完整生命周期：
//!
//! - **安装**: 按依赖顺序安装，安装前完成版本与资源所有权校验
//! - **激活 / 停用**: 执行模块声明的生命周期钩子并维护状态
//! - **卸载**: 检查依赖者，支持级联卸载，按策略清除已核验的自有数据
//! - **更新**: 比较已安装版本与清单目录中的版本
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use chips_app_manager::{InstallOptions, ManagerConfig, ModuleManager, UninstallOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ManagerConfig::builder()
//!         .manifest_dir("./modules")
//!         .registry_path("./data/registry.json")
//!         .build();
//!
//!     let manager = ModuleManager::from_config(config.modules, Arc::default()).await?;
//!     manager.install("forms", InstallOptions::new()).await?;
//!     manager.uninstall("forms", UninstallOptions::new().purge_data(true)).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 清单、依赖、所有权、钩子、注册表与管理器
//! - `core` - 配置
//! - `utils` - 错误类型、日志与 ID 生成

#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    HookContext, HookPhase, HookRegistry, InstallOptions, InstallReport, LifecycleEvent,
    LifecycleEventKind, ModuleManager, ModuleManagerBuilder, ModuleManifest, ModuleStatus,
    RegistryEntry, ResourceRef, UninstallOptions, UninstallReport, UpdateInfo,
};

pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, generate_id, status_code, CoreError, Result};

pub use core::config::{LogConfig, ManagerConfig, ManagerConfigBuilder, ModuleConfig};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
