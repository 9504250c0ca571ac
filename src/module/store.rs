//! 资源存储
//!
//! 模块拥有的数据表、内容类型和字段组在底层存储中的存在性检查、
//! 创建、删除与备份。数据清理器是唯一调用删除的组件。

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::manifest::{ResourceKind, ResourceRef};
use crate::utils::{CoreError, Result};

/// 资源存储接口
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// 资源是否存在
    async fn exists(&self, resource: &ResourceRef) -> Result<bool>;

    /// 创建资源（已存在时不报错）
    async fn create(&self, resource: &ResourceRef) -> Result<()>;

    /// 永久删除资源
    async fn drop_resource(&self, resource: &ResourceRef) -> Result<()>;

    /// 将资源备份到指定快照下
    async fn backup(&self, resource: &ResourceRef, label: &str) -> Result<()>;

    /// 列出全部资源
    async fn list(&self) -> Result<Vec<ResourceRef>>;
}

/// 内存资源存储
#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    resources: RwLock<BTreeSet<ResourceRef>>,
    backups: RwLock<BTreeMap<String, Vec<ResourceRef>>>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组资源初始化
    pub fn with_resources(resources: impl IntoIterator<Item = ResourceRef>) -> Self {
        Self {
            resources: RwLock::new(resources.into_iter().collect()),
            backups: RwLock::new(BTreeMap::new()),
        }
    }

    /// 指定快照中备份的资源
    pub async fn backups(&self, label: &str) -> Vec<ResourceRef> {
        self.backups
            .read()
            .await
            .get(label)
            .cloned()
            .unwrap_or_default()
    }

    /// 所有快照名称
    pub async fn backup_labels(&self) -> Vec<String> {
        self.backups.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn exists(&self, resource: &ResourceRef) -> Result<bool> {
        Ok(self.resources.read().await.contains(resource))
    }

    async fn create(&self, resource: &ResourceRef) -> Result<()> {
        self.resources.write().await.insert(resource.clone());
        Ok(())
    }

    async fn drop_resource(&self, resource: &ResourceRef) -> Result<()> {
        if !self.resources.write().await.remove(resource) {
            return Err(CoreError::Internal(format!("资源不存在: {}", resource)));
        }
        debug!(resource = %resource, "资源已删除");
        Ok(())
    }

    async fn backup(&self, resource: &ResourceRef, label: &str) -> Result<()> {
        if !self.exists(resource).await? {
            return Err(CoreError::Internal(format!("无法备份不存在的资源: {}", resource)));
        }
        self.backups
            .write()
            .await
            .entry(label.to_string())
            .or_default()
            .push(resource.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ResourceRef>> {
        Ok(self.resources.read().await.iter().cloned().collect())
    }
}

/// 目录资源存储
///
/// 每个资源对应 `<root>/<kind>/<name>` 路径（文件或目录），
/// 备份复制到 `<backup_dir>/<label>/<kind>/<name>`。
#[derive(Debug, Clone)]
pub struct DirResourceStore {
    root: PathBuf,
    backup_dir: PathBuf,
}

impl DirResourceStore {
    /// 创建目录存储，未指定备份目录时使用 `<root>/.backup`
    pub fn new(root: impl Into<PathBuf>, backup_dir: Option<PathBuf>) -> Self {
        let root = root.into();
        let backup_dir = backup_dir.unwrap_or_else(|| root.join(".backup"));
        Self { root, backup_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// 资源对应的路径
    pub fn resource_path(&self, resource: &ResourceRef) -> PathBuf {
        self.root.join(resource.kind.as_str()).join(&resource.name)
    }

    async fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
        let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
        while let Some((src, dst)) = pending.pop() {
            if tokio::fs::metadata(&src).await?.is_dir() {
                tokio::fs::create_dir_all(&dst).await?;
                let mut entries = tokio::fs::read_dir(&src).await?;
                while let Some(entry) = entries.next_entry().await? {
                    pending.push((entry.path(), dst.join(entry.file_name())));
                }
            } else {
                if let Some(parent) = dst.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&src, &dst).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for DirResourceStore {
    async fn exists(&self, resource: &ResourceRef) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resource_path(resource)).await?)
    }

    async fn create(&self, resource: &ResourceRef) -> Result<()> {
        tokio::fs::create_dir_all(self.resource_path(resource)).await?;
        Ok(())
    }

    async fn drop_resource(&self, resource: &ResourceRef) -> Result<()> {
        let path = self.resource_path(resource);
        if tokio::fs::metadata(&path).await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        info!(resource = %resource, path = %path.display(), "资源已删除");
        Ok(())
    }

    async fn backup(&self, resource: &ResourceRef, label: &str) -> Result<()> {
        let src = self.resource_path(resource);
        let dst = self
            .backup_dir
            .join(label)
            .join(resource.kind.as_str())
            .join(&resource.name);
        Self::copy_recursive(&src, &dst).await?;
        debug!(resource = %resource, backup = %dst.display(), "资源已备份");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ResourceRef>> {
        let mut resources = Vec::new();
        for kind in [
            ResourceKind::Table,
            ResourceKind::ContentType,
            ResourceKind::FieldGroup,
        ] {
            let dir = self.root.join(kind.as_str());
            if !tokio::fs::try_exists(&dir).await? {
                continue;
            }
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                resources.push(ResourceRef::new(
                    kind,
                    entry.file_name().to_string_lossy().into_owned(),
                ));
            }
        }
        resources.sort();
        Ok(resources)
    }
}
