//! 应用管理器错误类型定义
//!
//! 本模块定义了应用模块生命周期管理中使用的所有错误类型。

use thiserror::Error;

use crate::module::lifecycle::HookPhase;
use crate::module::ownership::OwnershipViolation;

/// 应用管理器核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 清单错误 ====================

    /// 模块清单未找到
    #[error("模块清单未找到: '{0}'")]
    ManifestNotFound(String),

    /// 无效的模块清单
    #[error("无效的模块清单: {0}")]
    InvalidMetadata(String),

    // ==================== 依赖错误 ====================

    /// 循环依赖
    #[error("检测到循环依赖: {}", cycle.join(" -> "))]
    CircularDependency {
        cycle: Vec<String>,
    },

    /// 模块有依赖者，无法卸载
    #[error("模块 '{module}' 被以下模块依赖，无法卸载: {dependents:?}")]
    ModuleHasDependents {
        module: String,
        dependents: Vec<String>,
    },

    /// 依赖模块尚未安装
    #[error("模块 '{module}' 的依赖尚未安装: {missing:?}")]
    DependencyNotInstalled {
        module: String,
        missing: Vec<String>,
    },

    /// 版本不匹配
    #[error("版本不匹配: 模块 '{module}' 要求 '{dependency}' 满足 {required}, 但目录中的版本为 {found}")]
    VersionMismatch {
        module: String,
        dependency: String,
        required: String,
        found: String,
    },

    // ==================== 所有权错误 ====================

    /// 资源所有权校验失败
    #[error("模块 '{module_id}' 的资源所有权校验失败: {}", format_violations(violations))]
    OwnershipValidation {
        module_id: String,
        violations: Vec<OwnershipViolation>,
    },

    // ==================== 生命周期错误 ====================

    /// 生命周期钩子执行失败
    #[error("模块 '{module_id}' 的 {phase} 钩子执行失败: {source}")]
    LifecycleHook {
        module_id: String,
        phase: HookPhase,
        #[source]
        source: anyhow::Error,
    },

    /// 清单引用的钩子未注册
    #[error("模块 '{module_id}' 的 {phase} 钩子 '{entry}' 未注册")]
    HookNotRegistered {
        module_id: String,
        phase: HookPhase,
        entry: String,
    },

    /// 模块未安装
    #[error("模块未安装: '{0}'")]
    ModuleNotInstalled(String),

    /// 模块已安装
    #[error("模块已安装: '{0}'")]
    ModuleAlreadyInstalled(String),

    /// 没有可用更新
    #[error("模块 '{module_id}' 没有可用更新: 已安装 {installed}, 目录版本 {available}")]
    NoUpdateAvailable {
        module_id: String,
        installed: String,
        available: String,
    },

    // ==================== 数据清理错误 ====================

    /// 数据清理失败
    #[error("模块 '{module_id}' 数据清理失败: {resource} - {reason}")]
    PurgeFailed {
        module_id: String,
        resource: String,
        reason: String,
    },

    // ==================== 协作方错误 ====================

    /// 注册表存储错误
    #[error("注册表存储错误: {0}")]
    Storage(String),

    /// 能力注册错误（权限、内容类型、字段组）
    #[error("能力注册失败: {0}")]
    Capability(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

fn format_violations(violations: &[OwnershipViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// 应用管理器操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 状态码常量
pub mod status_code {
    /// 成功
    pub const OK: u16 = 200;

    /// 请求格式错误
    pub const BAD_REQUEST: u16 = 400;

    /// 未找到
    pub const NOT_FOUND: u16 = 404;

    /// 冲突
    pub const CONFLICT: u16 = 409;

    /// 前置条件不满足
    pub const PRECONDITION_FAILED: u16 = 412;

    /// 无法处理
    pub const UNPROCESSABLE: u16 = 422;

    /// 内部错误
    pub const INTERNAL_ERROR: u16 = 500;
}

/// 错误码常量
pub mod error_code {
    // 清单错误 (MANIFEST-xxx)
    pub const MANIFEST_NOT_FOUND: &str = "MANIFEST-001";
    pub const MANIFEST_INVALID: &str = "MANIFEST-002";

    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_INSTALLED: &str = "MODULE-001";
    pub const MODULE_ALREADY_INSTALLED: &str = "MODULE-002";
    pub const MODULE_HOOK_FAILED: &str = "MODULE-003";
    pub const MODULE_HOOK_NOT_REGISTERED: &str = "MODULE-004";
    pub const MODULE_NO_UPDATE: &str = "MODULE-005";

    // 依赖错误 (DEPENDENCY-xxx)
    pub const DEPENDENCY_CYCLE: &str = "DEPENDENCY-001";
    pub const DEPENDENCY_HAS_DEPENDENTS: &str = "DEPENDENCY-002";
    pub const DEPENDENCY_NOT_INSTALLED: &str = "DEPENDENCY-003";
    pub const DEPENDENCY_VERSION_MISMATCH: &str = "DEPENDENCY-004";

    // 所有权与数据错误 (OWNERSHIP-xxx)
    pub const OWNERSHIP_VIOLATION: &str = "OWNERSHIP-001";
    pub const OWNERSHIP_PURGE_FAILED: &str = "OWNERSHIP-002";

    // 存储错误 (STORAGE-xxx)
    pub const STORAGE_FAILED: &str = "STORAGE-001";
    pub const CAPABILITY_FAILED: &str = "STORAGE-002";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ManifestNotFound(_) => error_code::MANIFEST_NOT_FOUND,
            CoreError::InvalidMetadata(_) => error_code::MANIFEST_INVALID,
            CoreError::CircularDependency { .. } => error_code::DEPENDENCY_CYCLE,
            CoreError::ModuleHasDependents { .. } => error_code::DEPENDENCY_HAS_DEPENDENTS,
            CoreError::DependencyNotInstalled { .. } => error_code::DEPENDENCY_NOT_INSTALLED,
            CoreError::VersionMismatch { .. } => error_code::DEPENDENCY_VERSION_MISMATCH,
            CoreError::OwnershipValidation { .. } => error_code::OWNERSHIP_VIOLATION,
            CoreError::PurgeFailed { .. } => error_code::OWNERSHIP_PURGE_FAILED,
            CoreError::LifecycleHook { .. } => error_code::MODULE_HOOK_FAILED,
            CoreError::HookNotRegistered { .. } => error_code::MODULE_HOOK_NOT_REGISTERED,
            CoreError::ModuleNotInstalled(_) => error_code::MODULE_NOT_INSTALLED,
            CoreError::ModuleAlreadyInstalled(_) => error_code::MODULE_ALREADY_INSTALLED,
            CoreError::NoUpdateAvailable { .. } => error_code::MODULE_NO_UPDATE,
            CoreError::Storage(_) => error_code::STORAGE_FAILED,
            CoreError::Capability(_) => error_code::CAPABILITY_FAILED,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            _ => "UNKNOWN",
        }
    }

    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::ManifestNotFound(_) => status_code::NOT_FOUND,
            CoreError::ModuleNotInstalled(_) => status_code::NOT_FOUND,
            CoreError::InvalidMetadata(_) => status_code::BAD_REQUEST,
            CoreError::ModuleAlreadyInstalled(_) => status_code::CONFLICT,
            CoreError::OwnershipValidation { .. } => status_code::CONFLICT,
            CoreError::CircularDependency { .. } => status_code::UNPROCESSABLE,
            CoreError::ModuleHasDependents { .. } => status_code::PRECONDITION_FAILED,
            CoreError::DependencyNotInstalled { .. } => status_code::PRECONDITION_FAILED,
            CoreError::VersionMismatch { .. } => status_code::PRECONDITION_FAILED,
            CoreError::NoUpdateAvailable { .. } => status_code::CONFLICT,
            _ => status_code::INTERNAL_ERROR,
        }
    }

    /// 是否属于依赖类错误（循环、被依赖阻塞、依赖缺失、版本不符）
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            CoreError::CircularDependency { .. }
                | CoreError::ModuleHasDependents { .. }
                | CoreError::DependencyNotInstalled { .. }
                | CoreError::VersionMismatch { .. }
        )
    }

    /// 阻塞操作的模块列表
    ///
    /// 对循环依赖返回环上的模块，对卸载阻塞返回依赖者，对缺失依赖返回缺失的模块。
    pub fn blocking_modules(&self) -> Vec<String> {
        match self {
            CoreError::CircularDependency { cycle } => cycle.clone(),
            CoreError::ModuleHasDependents { dependents, .. } => dependents.clone(),
            CoreError::DependencyNotInstalled { missing, .. } => missing.clone(),
            CoreError::VersionMismatch { dependency, .. } => vec![dependency.clone()],
            _ => Vec::new(),
        }
    }
}
