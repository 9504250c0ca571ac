//! 管理器配置
//!
//! 定义应用管理器的配置结构和加载逻辑。配置文件按扩展名选择
//! JSON 或 YAML 解析。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::utils::{CoreError, Result};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 模块管理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// 模块清单目录列表（每个子目录包含一个 module.yaml）
    #[serde(default)]
    pub manifest_dirs: Vec<PathBuf>,

    /// 注册表文件路径（None 表示仅内存）
    #[serde(default)]
    pub registry_path: Option<PathBuf>,

    /// 模块资源数据目录
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// 清理前备份目录
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    /// 安装后是否自动激活（安装选项未指定时使用）
    #[serde(default = "default_true")]
    pub auto_activate: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            manifest_dirs: vec![],
            registry_path: None,
            data_dir: None,
            backup_dir: None,
            auto_activate: true,
        }
    }
}

impl ModuleConfig {
    /// 实际使用的备份目录，未配置时位于数据目录下
    pub fn effective_backup_dir(&self) -> Option<PathBuf> {
        self.backup_dir
            .clone()
            .or_else(|| self.data_dir.as_ref().map(|d| d.join(".backup")))
    }
}

/// 管理器配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块管理配置
    #[serde(default)]
    pub modules: ModuleConfig,
}

impl ManagerConfig {
    /// 创建配置构建器
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::new()
    }

    /// 从文件加载配置
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("无法读取 {}: {}", path.display(), e))
        })?;

        let mut config: ManagerConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.config_path = Some(path);
        Ok(config)
    }

    /// 合并另一个配置（用于覆盖）
    pub fn merge(&mut self, other: ManagerConfig) {
        // 只覆盖非默认值的配置
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if !other.modules.manifest_dirs.is_empty() {
            self.modules.manifest_dirs.extend(other.modules.manifest_dirs);
        }
        if other.modules.registry_path.is_some() {
            self.modules.registry_path = other.modules.registry_path;
        }
        if other.modules.data_dir.is_some() {
            self.modules.data_dir = other.modules.data_dir;
        }
        if other.modules.backup_dir.is_some() {
            self.modules.backup_dir = other.modules.backup_dir;
        }
        if !other.modules.auto_activate {
            self.modules.auto_activate = false;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
        }
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 添加清单目录
    pub fn manifest_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.manifest_dirs.push(dir.into());
        self
    }

    /// 设置注册表文件
    pub fn registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.modules.registry_path = Some(path.into());
        self
    }

    /// 设置数据目录
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.data_dir = Some(dir.into());
        self
    }

    /// 设置备份目录
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.backup_dir = Some(dir.into());
        self
    }

    /// 设置安装后是否自动激活
    pub fn auto_activate(mut self, enable: bool) -> Self {
        self.config.modules.auto_activate = enable;
        self
    }

    /// 构建配置
    pub fn build(self) -> ManagerConfig {
        self.config
    }
}
