//! 模块清单目录
//!
//! [`ManifestProvider`] 按模块 ID 提供清单，每次调用时解析，不假设缓存。
//! [`ManifestCatalog`] 是内存实现，可扫描清单目录
//! （`<dir>/<module>/module.yaml`）或以编程方式添加清单。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, info, warn};

use super::manifest::ModuleManifest;
use super::parser::ManifestParser;
use crate::utils::Result;

/// 清单文件名
pub const MANIFEST_FILE: &str = "module.yaml";

/// 清单提供者接口
pub trait ManifestProvider: Send + Sync {
    /// 获取模块清单
    fn get(&self, module_id: &str) -> Option<ModuleManifest>;

    /// 列出全部清单（按模块 ID 排序）
    fn list(&self) -> Vec<ModuleManifest>;

    /// 是否存在模块清单
    fn contains(&self, module_id: &str) -> bool {
        self.get(module_id).is_some()
    }
}

/// 内存清单目录
#[derive(Debug, Default)]
pub struct ManifestCatalog {
    manifests: RwLock<BTreeMap<String, ModuleManifest>>,
    dirs: Vec<PathBuf>,
}

impl ManifestCatalog {
    /// 创建空目录
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建关联清单目录的目录（需调用 [`ManifestCatalog::reload`] 加载）
    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        Self {
            manifests: RwLock::new(BTreeMap::new()),
            dirs,
        }
    }

    /// 从清单列表创建
    pub fn from_manifests(manifests: impl IntoIterator<Item = ModuleManifest>) -> Self {
        let catalog = Self::new();
        for manifest in manifests {
            catalog.insert(manifest);
        }
        catalog
    }

    /// 添加或替换清单，返回被替换的旧清单
    pub fn insert(&self, manifest: ModuleManifest) -> Option<ModuleManifest> {
        let mut manifests = self
            .manifests
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = manifests.insert(manifest.module_id.clone(), manifest);
        if let Some(old) = &previous {
            debug!(module_id = %old.module_id, version = %old.version, "清单已替换");
        }
        previous
    }

    /// 移除清单
    pub fn remove(&self, module_id: &str) -> Option<ModuleManifest> {
        self.manifests
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(module_id)
    }

    /// 清单数量
    pub fn len(&self) -> usize {
        self.manifests
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 扫描单个目录，返回解析成功的清单
    ///
    /// 子目录中没有 module.yaml 的跳过；解析失败的清单记录警告后跳过。
    pub async fn scan_dir(dir: &Path) -> Result<Vec<ModuleManifest>> {
        let mut found = Vec::new();
        if !tokio::fs::try_exists(dir).await? {
            warn!(dir = %dir.display(), "清单目录不存在");
            return Ok(found);
        }

        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let manifest_path = entry.path().join(MANIFEST_FILE);
            if !tokio::fs::try_exists(&manifest_path).await? {
                continue;
            }
            match ManifestParser::parse_file(&manifest_path).await {
                Ok(manifest) => {
                    debug!(module_id = %manifest.module_id, path = %manifest_path.display(), "发现模块清单");
                    found.push(manifest);
                }
                Err(e) => {
                    warn!(path = %manifest_path.display(), error = %e, "模块清单解析失败，已跳过");
                }
            }
        }

        found.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        Ok(found)
    }

    /// 重新扫描所有关联目录
    ///
    /// 目录按顺序扫描，后面的目录覆盖前面同 ID 的清单。返回加载的清单数量。
    pub async fn reload(&self) -> Result<usize> {
        let mut loaded = BTreeMap::new();
        for dir in &self.dirs {
            for manifest in Self::scan_dir(dir).await? {
                loaded.insert(manifest.module_id.clone(), manifest);
            }
        }

        let count = loaded.len();
        *self
            .manifests
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = loaded;
        info!(count, "模块清单目录已加载");
        Ok(count)
    }
}

impl ManifestProvider for ManifestCatalog {
    fn get(&self, module_id: &str) -> Option<ModuleManifest> {
        self.manifests
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(module_id)
            .cloned()
    }

    fn list(&self) -> Vec<ModuleManifest> {
        self.manifests
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_manifest(root: &Path, dir: &str, body: &str) {
        let module_dir = root.join(dir);
        tokio::fs::create_dir_all(&module_dir).await.unwrap();
        tokio::fs::write(module_dir.join(MANIFEST_FILE), body)
            .await
            .unwrap();
    }

    #[test]
    fn test_insert_replaces_version() {
        let catalog = ManifestCatalog::new();
        assert!(catalog
            .insert(ModuleManifest::new("forms", "Forms", "1.0.0"))
            .is_none());
        let old = catalog.insert(ModuleManifest::new("forms", "Forms", "1.1.0"));

        assert_eq!(old.map(|m| m.version), Some("1.0.0".to_string()));
        assert_eq!(catalog.get("forms").unwrap().version, "1.1.0");
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_list_sorted() {
        let catalog = ManifestCatalog::from_manifests([
            ModuleManifest::new("reports", "Reports", "1.0.0"),
            ModuleManifest::new("core", "Core", "1.0.0"),
        ]);
        let ids: Vec<_> = catalog.list().into_iter().map(|m| m.module_id).collect();
        assert_eq!(ids, vec!["core", "reports"]);
        assert!(catalog.contains("core"));
        assert!(!catalog.contains("forms"));
    }

    #[tokio::test]
    async fn test_reload_from_dirs() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), "core", "id: core\nname: Core\nversion: 1.0.0\nkind: core\n").await;
        write_manifest(
            dir.path(),
            "forms",
            "id: forms\nname: Forms\nversion: 1.2.0\ndependencies:\n  core: \"^1\"\n",
        )
        .await;
        // 无效清单被跳过
        write_manifest(dir.path(), "broken", "id: broken\nname: Broken\nversion: x\n").await;
        // 没有 module.yaml 的目录被忽略
        tokio::fs::create_dir_all(dir.path().join("assets")).await.unwrap();

        let catalog = ManifestCatalog::with_dirs(vec![dir.path().to_path_buf()]);
        assert_eq!(catalog.reload().await.unwrap(), 2);
        assert_eq!(catalog.get("forms").unwrap().dependencies["core"], "^1");
        assert!(catalog.get("broken").is_none());
    }

    #[tokio::test]
    async fn test_scan_missing_dir() {
        let found = ManifestCatalog::scan_dir(Path::new("/nonexistent/chips/apps"))
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
