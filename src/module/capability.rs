//! 能力注册协作方
//!
//! 模块安装时向平台注册权限、内容类型和字段组，卸载时按模块整体撤销。
//! 平台侧的实现不在本 crate 内，这里定义接口并提供内存实现。

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::manifest::{ContentTypeSchema, FieldGroupSchema};
use crate::utils::{CoreError, Result};

/// 权限注册接口
#[async_trait]
pub trait PermissionRegistrar: Send + Sync {
    async fn register(&self, module_id: &str, permissions: &[String]) -> Result<()>;

    /// 删除模块注册的全部权限，返回删除数量
    async fn delete_by_module(&self, module_id: &str) -> Result<usize>;
}

/// 内容类型注册接口
#[async_trait]
pub trait ContentTypeRegistry: Send + Sync {
    async fn register(&self, module_id: &str, schema: &ContentTypeSchema) -> Result<()>;

    async fn unregister_by_module(&self, module_id: &str) -> Result<usize>;
}

/// 字段组注册接口
#[async_trait]
pub trait FieldGroupRegistry: Send + Sync {
    async fn register_multiple(&self, module_id: &str, groups: &[FieldGroupSchema]) -> Result<()>;

    async fn unregister_by_module(&self, module_id: &str) -> Result<usize>;
}

/// 内存权限注册表：权限 -> 模块
#[derive(Debug, Default)]
pub struct MemoryPermissionRegistrar {
    permissions: RwLock<BTreeMap<String, String>>,
}

impl MemoryPermissionRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模块拥有的权限
    pub async fn permissions_of(&self, module_id: &str) -> Vec<String> {
        self.permissions
            .read()
            .await
            .iter()
            .filter(|(_, owner)| *owner == module_id)
            .map(|(permission, _)| permission.clone())
            .collect()
    }
}

#[async_trait]
impl PermissionRegistrar for MemoryPermissionRegistrar {
    async fn register(&self, module_id: &str, permissions: &[String]) -> Result<()> {
        let mut registered = self.permissions.write().await;
        if let Some((permission, owner)) = permissions
            .iter()
            .find_map(|p| registered.get(p).filter(|o| *o != module_id).map(|o| (p, o)))
        {
            return Err(CoreError::Capability(format!(
                "权限 '{}' 已由模块 '{}' 注册",
                permission, owner
            )));
        }
        for permission in permissions {
            registered.insert(permission.clone(), module_id.to_string());
        }
        debug!(module_id = %module_id, count = permissions.len(), "权限已注册");
        Ok(())
    }

    async fn delete_by_module(&self, module_id: &str) -> Result<usize> {
        let mut registered = self.permissions.write().await;
        let before = registered.len();
        registered.retain(|_, owner| owner != module_id);
        Ok(before - registered.len())
    }
}

/// 内存内容类型注册表
#[derive(Debug, Default)]
pub struct MemoryContentTypeRegistry {
    /// 名称 -> (模块, 定义)
    types: RwLock<BTreeMap<String, (String, ContentTypeSchema)>>,
}

impl MemoryContentTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<ContentTypeSchema> {
        self.types
            .read()
            .await
            .get(name)
            .map(|(_, schema)| schema.clone())
    }

    pub async fn names_of(&self, module_id: &str) -> Vec<String> {
        self.types
            .read()
            .await
            .iter()
            .filter(|(_, (owner, _))| owner == module_id)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl ContentTypeRegistry for MemoryContentTypeRegistry {
    async fn register(&self, module_id: &str, schema: &ContentTypeSchema) -> Result<()> {
        let mut types = self.types.write().await;
        if let Some((owner, _)) = types.get(&schema.name) {
            if owner != module_id {
                return Err(CoreError::Capability(format!(
                    "内容类型 '{}' 已由模块 '{}' 注册",
                    schema.name, owner
                )));
            }
        }
        types.insert(schema.name.clone(), (module_id.to_string(), schema.clone()));
        Ok(())
    }

    async fn unregister_by_module(&self, module_id: &str) -> Result<usize> {
        let mut types = self.types.write().await;
        let before = types.len();
        types.retain(|_, (owner, _)| owner != module_id);
        Ok(before - types.len())
    }
}

/// 内存字段组注册表
#[derive(Debug, Default)]
pub struct MemoryFieldGroupRegistry {
    /// 键 -> (模块, 定义)
    groups: RwLock<BTreeMap<String, (String, FieldGroupSchema)>>,
}

impl MemoryFieldGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys_of(&self, module_id: &str) -> Vec<String> {
        self.groups
            .read()
            .await
            .iter()
            .filter(|(_, (owner, _))| owner == module_id)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl FieldGroupRegistry for MemoryFieldGroupRegistry {
    async fn register_multiple(&self, module_id: &str, groups: &[FieldGroupSchema]) -> Result<()> {
        let mut registered = self.groups.write().await;
        for group in groups {
            if let Some((owner, _)) = registered.get(&group.key) {
                if owner != module_id {
                    return Err(CoreError::Capability(format!(
                        "字段组 '{}' 已由模块 '{}' 注册",
                        group.key, owner
                    )));
                }
            }
        }
        for group in groups {
            registered.insert(group.key.clone(), (module_id.to_string(), group.clone()));
        }
        Ok(())
    }

    async fn unregister_by_module(&self, module_id: &str) -> Result<usize> {
        let mut registered = self.groups.write().await;
        let before = registered.len();
        registered.retain(|_, (owner, _)| owner != module_id);
        Ok(before - registered.len())
    }
}
