//! 模块清单解析器
//!
//! 负责从 module.yaml 文件解析并校验模块清单。

use std::collections::HashSet;
use std::path::Path;

use crate::module::manifest::ModuleManifest;
use crate::utils::{CoreError, Result};

/// 模块清单解析器
#[derive(Debug, Clone, Default)]
pub struct ManifestParser;

impl ManifestParser {
    /// 从文件解析模块清单
    ///
    /// # Errors
    ///
    /// - 文件不存在或无法读取时返回 IO 错误
    /// - 文件内容不符合 YAML 格式时返回 YAML 错误
    /// - 清单校验失败时返回 `InvalidMetadata` 错误
    pub async fn parse_file(path: &Path) -> Result<ModuleManifest> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_string(&content)
    }

    /// 从字符串解析模块清单
    pub fn parse_string(content: &str) -> Result<ModuleManifest> {
        let manifest: ModuleManifest = serde_yaml::from_str(content)?;
        Self::validate(&manifest)?;
        Ok(manifest)
    }

    /// 校验模块清单
    ///
    /// 执行以下校验，所有问题合并为一个 `InvalidMetadata` 错误返回：
    /// - 模块 ID 格式与名称非空
    /// - 版本号格式（semver）
    /// - 依赖版本要求格式
    /// - 权限标识格式
    /// - 资源名称格式与重复声明
    /// - 钩子入口名称非空
    pub fn validate(manifest: &ModuleManifest) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // 1. 身份
        if manifest.module_id.is_empty() {
            errors.push("模块 ID 不能为空".to_string());
        } else if !Self::is_valid_module_id(&manifest.module_id) {
            errors.push(format!(
                "模块 ID '{}' 格式无效，只允许字母、数字、下划线和连字符",
                manifest.module_id
            ));
        }

        if manifest.name.trim().is_empty() {
            errors.push("模块名称不能为空".to_string());
        }

        // 2. 版本号
        if manifest.version.is_empty() {
            errors.push("模块版本号不能为空".to_string());
        } else if semver::Version::parse(&manifest.version).is_err() {
            errors.push(format!(
                "无效的版本号格式 '{}', 请使用 semver 格式 (如 1.0.0)",
                manifest.version
            ));
        }

        // 3. 依赖声明
        for (dep_id, version_req) in &manifest.dependencies {
            if !Self::is_valid_module_id(dep_id) {
                errors.push(format!("依赖模块 ID '{}' 格式无效", dep_id));
            }
            if semver::VersionReq::parse(version_req).is_err() {
                errors.push(format!(
                    "依赖 '{}' 的版本要求格式无效: '{}'",
                    dep_id, version_req
                ));
            }
        }

        // 4. 权限声明
        let mut seen_permissions = HashSet::new();
        for permission in &manifest.capabilities.permissions {
            if !Self::is_valid_permission(permission) {
                errors.push(format!("无效的权限声明格式: '{}'", permission));
            }
            if !seen_permissions.insert(permission.as_str()) {
                errors.push(format!("权限 '{}' 重复声明", permission));
            }
        }

        // 5. 资源声明
        for resource in manifest.claimed_resources() {
            if !Self::is_valid_identifier(&resource.name) {
                errors.push(format!("无效的资源名称: '{}'", resource));
            }
        }
        let mut seen_content_types = HashSet::new();
        for schema in &manifest.capabilities.content_types {
            if !seen_content_types.insert(schema.name.as_str()) {
                errors.push(format!("内容类型 '{}' 重复声明", schema.name));
            }
        }
        let mut seen_field_groups = HashSet::new();
        for schema in &manifest.capabilities.field_groups {
            if !seen_field_groups.insert(schema.key.as_str()) {
                errors.push(format!("字段组 '{}' 重复声明", schema.key));
            }
        }

        // 6. 钩子入口
        for (phase, entry) in manifest.lifecycle_hooks.declared() {
            if entry.trim().is_empty() {
                errors.push(format!("{} 钩子入口名称不能为空", phase));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidMetadata(format!(
                "模块 '{}': {}",
                manifest.module_id,
                errors.join("; ")
            )))
        }
    }

    /// 检查模块 ID 格式：字母开头，只包含字母、数字、下划线和连字符
    fn is_valid_module_id(id: &str) -> bool {
        let mut chars = id.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    /// 检查权限标识格式
    ///
    /// 允许 `domain`、`domain.action`、`domain.*` 以及多段 `a.b.c`，通配符只能在末段。
    fn is_valid_permission(permission: &str) -> bool {
        let parts: Vec<&str> = permission.split('.').collect();
        let last = parts.len() - 1;
        parts.iter().enumerate().all(|(i, part)| {
            Self::is_valid_identifier(part) || (i == last && i > 0 && *part == "*")
        })
    }

    /// 检查标识符（字母或下划线开头，字母数字和下划线）
    fn is_valid_identifier(s: &str) -> bool {
        let mut chars = s.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::manifest::{ModuleKind, UninstallMode};

    #[test]
    fn test_parse_valid_yaml() {
        let yaml = r#"
id: "forms"
name: "表单扩展"
version: "1.2.3"
kind: extension
dependencies:
  core: "^1.0.0"
capabilities:
  permissions:
    - "forms.manage"
    - "forms.*"
  content_types:
    - name: form
      label: "表单"
  field_groups:
    - key: form_meta
      location: [form]
owns:
  tables: [form_entries, form_submissions]
lifecycle_hooks:
  install: seed_defaults
  uninstall: clear_cache
uninstall_policy:
  default_mode: keep-data
  allow_purge: true
  auto_backup: true
"#;

        let result = ManifestParser::parse_string(yaml);
        assert!(result.is_ok(), "解析失败: {:?}", result.err());

        let manifest = result.unwrap();
        assert_eq!(manifest.module_id, "forms");
        assert_eq!(manifest.kind, ModuleKind::Extension);
        assert_eq!(manifest.dependencies.len(), 1);
        assert_eq!(manifest.capabilities.permissions.len(), 2);
        assert_eq!(manifest.owns.tables.len(), 2);
        assert_eq!(manifest.lifecycle_hooks.install.as_deref(), Some("seed_defaults"));
        assert_eq!(manifest.uninstall_policy.default_mode, UninstallMode::KeepData);
        assert!(manifest.uninstall_policy.auto_backup);
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let yaml = r#"
id: core
name: Core
version: 1.0.0
kind: core
"#;
        let manifest = ManifestParser::parse_string(yaml).unwrap();
        assert_eq!(manifest.kind, ModuleKind::Core);
        assert!(manifest.dependencies.is_empty());
        assert!(!manifest.uninstall_policy.allow_purge);
    }

    #[test]
    fn test_validate_invalid_id_format() {
        let manifest = ModuleManifest::new("1-bad", "Bad", "1.0.0");
        let err = ManifestParser::validate(&manifest).unwrap_err();
        assert!(matches!(err, CoreError::InvalidMetadata(_)));
    }

    #[test]
    fn test_validate_invalid_version() {
        let manifest = ModuleManifest::new("forms", "Forms", "one");
        assert!(ManifestParser::validate(&manifest).is_err());
    }

    #[test]
    fn test_validate_dependency_invalid_version() {
        let manifest = ModuleManifest::new("forms", "Forms", "1.0.0").depends_on("core", "not-a-range");
        let err = ManifestParser::validate(&manifest).unwrap_err();
        assert!(err.to_string().contains("core"));
    }

    #[test]
    fn test_validate_permissions() {
        let ok = ModuleManifest::new("forms", "Forms", "1.0.0")
            .with_permission("forms")
            .with_permission("forms.view")
            .with_permission("forms.entries.export")
            .with_permission("forms.*");
        assert!(ManifestParser::validate(&ok).is_ok());

        let bad = ModuleManifest::new("forms", "Forms", "1.0.0").with_permission("*.view");
        assert!(ManifestParser::validate(&bad).is_err());

        let dup = ModuleManifest::new("forms", "Forms", "1.0.0")
            .with_permission("forms.view")
            .with_permission("forms.view");
        assert!(ManifestParser::validate(&dup).is_err());
    }

    #[test]
    fn test_validate_resource_names() {
        let bad = ModuleManifest::new("forms", "Forms", "1.0.0").owns_table("drop table;");
        assert!(ManifestParser::validate(&bad).is_err());
    }

    #[test]
    fn test_multiple_validation_errors() {
        let manifest = ModuleManifest::new("", "", "x");
        let err = ManifestParser::validate(&manifest).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("模块 ID 不能为空"));
        assert!(text.contains("模块名称不能为空"));
        assert!(text.contains("无效的版本号格式"));
    }

    #[test]
    fn test_parse_invalid_yaml_syntax() {
        let result = ManifestParser::parse_string("id: [unclosed");
        assert!(matches!(result, Err(CoreError::Yaml(_))));
    }
}
