//! 模块清单定义
//!
//! 定义模块描述文件 (module.yaml) 中的所有数据结构：身份、版本、依赖、
//! 能力声明、资源所有权声明、生命周期钩子引用以及卸载策略。

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::lifecycle::HookPhase;

/// 模块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// 核心模块 - 平台基础能力
    Core,
    /// 扩展模块 - 依附于核心模块的功能扩展
    #[default]
    Extension,
    /// 独立模块
    Standalone,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Core => write!(f, "core"),
            ModuleKind::Extension => write!(f, "extension"),
            ModuleKind::Standalone => write!(f, "standalone"),
        }
    }
}

/// 资源类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// 数据表
    Table,
    /// 内容类型
    ContentType,
    /// 字段组
    FieldGroup,
}

impl ResourceKind {
    /// 目录/标识中使用的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Table => "table",
            ResourceKind::ContentType => "content_type",
            ResourceKind::FieldGroup => "field_group",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 资源描述符
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// 资源类别
    pub kind: ResourceKind,
    /// 资源名称
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn table(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Table, name)
    }

    pub fn content_type(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::ContentType, name)
    }

    pub fn field_group(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::FieldGroup, name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// 字段定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// 字段名
    pub name: String,
    /// 字段类型
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    /// 是否必填
    #[serde(default)]
    pub required: bool,
}

fn default_field_type() -> String {
    "text".to_string()
}

/// 内容类型声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTypeSchema {
    /// 内容类型名称（唯一）
    pub name: String,
    /// 显示名称
    #[serde(default)]
    pub label: String,
    /// 字段列表
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl ContentTypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            fields: vec![],
        }
    }
}

/// 字段组声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldGroupSchema {
    /// 字段组键（唯一）
    pub key: String,
    /// 标题
    #[serde(default)]
    pub title: String,
    /// 字段列表
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    /// 挂载到的内容类型
    #[serde(default)]
    pub location: Vec<String>,
}

impl FieldGroupSchema {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            title: key.clone(),
            key,
            fields: vec![],
            location: vec![],
        }
    }
}

/// 能力声明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// 权限标识列表
    #[serde(default)]
    pub permissions: Vec<String>,
    /// 内容类型声明
    #[serde(default)]
    pub content_types: Vec<ContentTypeSchema>,
    /// 字段组声明
    #[serde(default)]
    pub field_groups: Vec<FieldGroupSchema>,
}

/// 资源所有权声明
///
/// 内容类型与字段组的所有权会和能力声明合并，数据表只能在此声明。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnedResources {
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub content_types: Vec<String>,
    #[serde(default)]
    pub field_groups: Vec<String>,
}

/// 生命周期钩子引用（钩子入口名称）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleHooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall: Option<String>,
}

impl LifecycleHooks {
    /// 获取指定阶段的钩子入口
    pub fn get(&self, phase: HookPhase) -> Option<&str> {
        match phase {
            HookPhase::Install => self.install.as_deref(),
            HookPhase::Activate => self.activate.as_deref(),
            HookPhase::Deactivate => self.deactivate.as_deref(),
            HookPhase::Uninstall => self.uninstall.as_deref(),
        }
    }

    /// 设置指定阶段的钩子入口
    pub fn set(&mut self, phase: HookPhase, entry: impl Into<String>) {
        let slot = match phase {
            HookPhase::Install => &mut self.install,
            HookPhase::Activate => &mut self.activate,
            HookPhase::Deactivate => &mut self.deactivate,
            HookPhase::Uninstall => &mut self.uninstall,
        };
        *slot = Some(entry.into());
    }

    /// 遍历所有已声明的钩子
    pub fn declared(&self) -> impl Iterator<Item = (HookPhase, &str)> {
        HookPhase::ALL
            .into_iter()
            .filter_map(move |phase| self.get(phase).map(|entry| (phase, entry)))
    }
}

/// 卸载时的默认数据处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UninstallMode {
    /// 保留数据
    #[default]
    KeepData,
    /// 清除数据
    PurgeData,
}

/// 卸载策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UninstallPolicy {
    /// 默认数据处理方式
    #[serde(default)]
    pub default_mode: UninstallMode,
    /// 是否允许清除数据（即使调用方要求清除）
    #[serde(default)]
    pub allow_purge: bool,
    /// 清除前是否自动备份
    #[serde(default)]
    pub auto_backup: bool,
}

impl UninstallPolicy {
    /// 计算是否执行清除
    ///
    /// 调用方覆盖优先，否则看默认模式；无论如何都需要 `allow_purge`。
    pub fn should_purge(&self, purge_override: Option<bool>) -> bool {
        let requested = purge_override.unwrap_or(self.default_mode == UninstallMode::PurgeData);
        requested && self.allow_purge
    }
}

/// 模块清单
///
/// 对应 module.yaml，按版本不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// 模块唯一标识
    #[serde(alias = "id")]
    pub module_id: String,

    /// 显示名称
    pub name: String,

    /// 版本（semver）
    pub version: String,

    /// 模块类型
    #[serde(default)]
    pub kind: ModuleKind,

    /// 描述
    #[serde(default)]
    pub description: String,

    /// 依赖：模块 ID -> 版本要求
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    /// 能力声明
    #[serde(default)]
    pub capabilities: Capabilities,

    /// 资源所有权声明
    #[serde(default)]
    pub owns: OwnedResources,

    /// 生命周期钩子引用
    #[serde(default)]
    pub lifecycle_hooks: LifecycleHooks,

    /// 卸载策略
    #[serde(default)]
    pub uninstall_policy: UninstallPolicy,
}

impl ModuleManifest {
    /// 创建新的模块清单
    pub fn new(
        module_id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            name: name.into(),
            version: version.into(),
            kind: ModuleKind::default(),
            description: String::new(),
            dependencies: BTreeMap::new(),
            capabilities: Capabilities::default(),
            owns: OwnedResources::default(),
            lifecycle_hooks: LifecycleHooks::default(),
            uninstall_policy: UninstallPolicy::default(),
        }
    }

    pub fn with_kind(mut self, kind: ModuleKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn depends_on(mut self, module_id: impl Into<String>, version_req: impl Into<String>) -> Self {
        self.dependencies.insert(module_id.into(), version_req.into());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.capabilities.permissions.push(permission.into());
        self
    }

    pub fn with_content_type(mut self, schema: ContentTypeSchema) -> Self {
        self.capabilities.content_types.push(schema);
        self
    }

    pub fn with_field_group(mut self, schema: FieldGroupSchema) -> Self {
        self.capabilities.field_groups.push(schema);
        self
    }

    pub fn owns_table(mut self, table: impl Into<String>) -> Self {
        self.owns.tables.push(table.into());
        self
    }

    pub fn with_hook(mut self, phase: HookPhase, entry: impl Into<String>) -> Self {
        self.lifecycle_hooks.set(phase, entry);
        self
    }

    pub fn with_uninstall_policy(mut self, policy: UninstallPolicy) -> Self {
        self.uninstall_policy = policy;
        self
    }

    /// 解析版本号
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }

    /// 清单声明拥有的全部资源（去重、有序）
    pub fn claimed_resources(&self) -> Vec<ResourceRef> {
        let mut claims = BTreeSet::new();

        for table in &self.owns.tables {
            claims.insert(ResourceRef::table(table));
        }
        let content_types = self
            .owns
            .content_types
            .iter()
            .chain(self.capabilities.content_types.iter().map(|ct| &ct.name));
        for name in content_types {
            claims.insert(ResourceRef::content_type(name));
        }
        let field_groups = self
            .owns
            .field_groups
            .iter()
            .chain(self.capabilities.field_groups.iter().map(|fg| &fg.key));
        for key in field_groups {
            claims.insert(ResourceRef::field_group(key));
        }

        claims.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_creation() {
        let manifest = ModuleManifest::new("forms", "Forms", "1.0.0")
            .with_kind(ModuleKind::Extension)
            .depends_on("core", "^1.0");

        assert_eq!(manifest.module_id, "forms");
        assert_eq!(manifest.dependencies.get("core").map(String::as_str), Some("^1.0"));
        assert_eq!(manifest.parsed_version(), Some(Version::new(1, 0, 0)));
    }

    #[test]
    fn test_claimed_resources_merge_capabilities() {
        let manifest = ModuleManifest::new("forms", "Forms", "1.0.0")
            .owns_table("form_entries")
            .with_content_type(ContentTypeSchema::new("form"))
            .with_field_group(FieldGroupSchema::new("form_settings"));

        let mut manifest = manifest;
        // 重复声明只计一次
        manifest.owns.content_types.push("form".to_string());

        let claims = manifest.claimed_resources();
        assert_eq!(
            claims,
            vec![
                ResourceRef::table("form_entries"),
                ResourceRef::content_type("form"),
                ResourceRef::field_group("form_settings"),
            ]
        );
    }

    #[test]
    fn test_should_purge() {
        let policy = UninstallPolicy {
            default_mode: UninstallMode::PurgeData,
            allow_purge: true,
            auto_backup: false,
        };
        assert!(policy.should_purge(None));
        assert!(!policy.should_purge(Some(false)));

        let keep = UninstallPolicy {
            default_mode: UninstallMode::KeepData,
            allow_purge: true,
            auto_backup: false,
        };
        assert!(!keep.should_purge(None));
        assert!(keep.should_purge(Some(true)));

        // allow_purge=false 时覆盖也无效
        let locked = UninstallPolicy {
            default_mode: UninstallMode::PurgeData,
            allow_purge: false,
            auto_backup: false,
        };
        assert!(!locked.should_purge(None));
        assert!(!locked.should_purge(Some(true)));
    }

    #[test]
    fn test_lifecycle_hooks_declared() {
        let manifest = ModuleManifest::new("forms", "Forms", "1.0.0")
            .with_hook(HookPhase::Install, "seed_defaults")
            .with_hook(HookPhase::Uninstall, "drop_caches");

        let declared: Vec<_> = manifest.lifecycle_hooks.declared().collect();
        assert_eq!(
            declared,
            vec![
                (HookPhase::Install, "seed_defaults"),
                (HookPhase::Uninstall, "drop_caches"),
            ]
        );
    }

    #[test]
    fn test_manifest_yaml_shape() {
        let yaml = r#"
id: reporting
name: Reporting
version: 2.1.0
kind: extension
dependencies:
  forms: "^1.0"
capabilities:
  permissions: [reports.view]
  content_types:
    - name: report
      fields:
        - name: title
          type: text
          required: true
owns:
  tables: [report_rows]
uninstall_policy:
  default_mode: purge-data
  allow_purge: true
"#;
        let manifest: ModuleManifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.module_id, "reporting");
        assert_eq!(manifest.uninstall_policy.default_mode, UninstallMode::PurgeData);
        assert!(manifest.uninstall_policy.allow_purge);
        assert!(!manifest.uninstall_policy.auto_backup);
        assert_eq!(manifest.capabilities.content_types[0].fields[0].field_type, "text");
        assert_eq!(manifest.claimed_resources().len(), 2);
    }
}
