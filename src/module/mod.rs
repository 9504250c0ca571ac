//! 模块管理
//!
//! 包含应用模块生命周期管理的全部组件：
//! - 清单定义、解析与目录
//! - 依赖解析与资源所有权核验
//! - 生命周期钩子与数据清理
//! - 注册表与管理器

pub mod capability;
pub mod catalog;
pub mod cleaner;
pub mod dependency;
pub mod events;
pub mod lifecycle;
pub mod manager;
pub mod manifest;
pub mod ownership;
pub mod parser;
pub mod registry;
pub mod store;

// 重导出常用类型
pub use capability::{
    ContentTypeRegistry, FieldGroupRegistry, MemoryContentTypeRegistry, MemoryFieldGroupRegistry,
    MemoryPermissionRegistrar, PermissionRegistrar,
};
pub use catalog::{ManifestCatalog, ManifestProvider, MANIFEST_FILE};
pub use cleaner::{DataCleaner, PurgeOutcome, PurgeRequest};
pub use dependency::{DependencyGraph, DependencyResolver};
pub use events::{lifecycle_events, EventPublisher, LifecycleEvent, LifecycleEventKind};
pub use lifecycle::{HookContext, HookFn, HookPhase, HookRegistry, HookRunner};
pub use manager::{
    InstallOptions, InstallReport, ModuleManager, ModuleManagerBuilder, UninstallOptions,
    UninstallReport, UpdateInfo,
};
pub use manifest::{
    Capabilities, ContentTypeSchema, FieldGroupSchema, FieldSchema, LifecycleHooks, ModuleKind,
    ModuleManifest, OwnedResources, ResourceKind, ResourceRef, UninstallMode, UninstallPolicy,
};
pub use ownership::{OwnershipResolver, OwnershipViolation, VerificationResult};
pub use parser::ManifestParser;
pub use registry::{
    JsonFileRegistryStore, MemoryRegistryStore, ModuleRegistry, ModuleStatus, RegistryEntry,
    RegistryStore,
};
pub use store::{DirResourceStore, MemoryResourceStore, ResourceStore};
