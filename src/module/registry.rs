//! 模块注册表
//!
//! 记录每个已安装模块的身份、版本、类型、依赖、状态以及安装时的资源
//! 声明快照。条目存在即表示模块已安装。
//!
//! 所有修改先写入 [`RegistryStore`]，成功后才更新内存视图，
//! 持久化失败时内存状态保持不变。

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::manifest::{ModuleKind, ModuleManifest, ResourceRef};
use crate::utils::{CoreError, Result};

/// 已安装模块的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// 已安装，尚未激活
    Installed,
    /// 已激活
    Active,
    /// 已停用
    Inactive,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Installed => write!(f, "installed"),
            ModuleStatus::Active => write!(f, "active"),
            ModuleStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// 注册表条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub module_id: String,
    pub name: String,
    pub version: String,
    pub kind: ModuleKind,
    /// 安装时从清单复制的依赖
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    pub status: ModuleStatus,
    /// 安装时的资源声明快照
    #[serde(default)]
    pub claims: Vec<ResourceRef>,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegistryEntry {
    /// 根据清单创建状态为 installed 的条目
    pub fn from_manifest(manifest: &ModuleManifest) -> Self {
        let now = Utc::now();
        Self {
            module_id: manifest.module_id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            kind: manifest.kind,
            dependencies: manifest.dependencies.clone(),
            status: ModuleStatus::Installed,
            claims: manifest.claimed_resources(),
            installed_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ModuleStatus::Active
    }

    /// 是否直接依赖指定模块
    pub fn depends_on(&self, module_id: &str) -> bool {
        self.dependencies.contains_key(module_id)
    }
}

/// 注册表持久化接口
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// 读取全部条目
    async fn load(&self) -> Result<Vec<RegistryEntry>>;

    /// 整体写入全部条目
    async fn save(&self, entries: &[RegistryEntry]) -> Result<()>;
}

/// 内存注册表存储
#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    entries: RwLock<Vec<RegistryEntry>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以已有条目初始化
    pub fn with_entries(entries: Vec<RegistryEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn load(&self) -> Result<Vec<RegistryEntry>> {
        Ok(self.entries.read().await.clone())
    }

    async fn save(&self, entries: &[RegistryEntry]) -> Result<()> {
        *self.entries.write().await = entries.to_vec();
        Ok(())
    }
}

/// 注册表文件格式
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    modules: Vec<RegistryEntry>,
}

/// JSON 文件注册表存储
///
/// 整个注册表写入单个 JSON 文件，先写临时文件再重命名。
#[derive(Debug, Clone)]
pub struct JsonFileRegistryStore {
    path: PathBuf,
}

impl JsonFileRegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RegistryStore for JsonFileRegistryStore {
    async fn load(&self) -> Result<Vec<RegistryEntry>> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!(path = %self.path.display(), "注册表文件不存在，视为空");
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let file: RegistryFile = serde_json::from_str(&content).map_err(|e| {
            CoreError::Storage(format!("注册表文件 {} 损坏: {}", self.path.display(), e))
        })?;
        Ok(file.modules)
    }

    async fn save(&self, entries: &[RegistryEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = RegistryFile {
            modules: entries.to_vec(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        let tmp = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CoreError::Storage(format!(
                "无法写入注册表 {}: {}",
                self.path.display(),
                e
            )));
        }
        Ok(())
    }
}

/// 模块注册表
pub struct ModuleRegistry {
    /// 已安装模块：module_id -> RegistryEntry
    entries: RwLock<BTreeMap<String, RegistryEntry>>,
    store: Arc<dyn RegistryStore>,
}

impl ModuleRegistry {
    /// 仅内存的空注册表
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            store: Arc::new(MemoryRegistryStore::new()),
        }
    }

    /// 从存储加载注册表
    ///
    /// # Errors
    ///
    /// 存储中出现重复的模块 ID 时返回 `Storage` 错误。
    pub async fn open(store: Arc<dyn RegistryStore>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for entry in store.load().await? {
            let module_id = entry.module_id.clone();
            if entries.insert(module_id.clone(), entry).is_some() {
                return Err(CoreError::Storage(format!(
                    "注册表中存在重复的模块 ID: '{}'",
                    module_id
                )));
            }
        }
        info!(count = entries.len(), "注册表已加载");
        Ok(Self {
            entries: RwLock::new(entries),
            store,
        })
    }

    /// 获取条目
    pub async fn get(&self, module_id: &str) -> Option<RegistryEntry> {
        self.entries.read().await.get(module_id).cloned()
    }

    /// 模块是否已安装
    pub async fn contains(&self, module_id: &str) -> bool {
        self.entries.read().await.contains_key(module_id)
    }

    /// 列出全部条目（按模块 ID 排序）
    pub async fn list(&self) -> Vec<RegistryEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    /// 按状态查找
    pub async fn find_by_status(&self, status: ModuleStatus) -> Vec<RegistryEntry> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect()
    }

    /// 已安装模块数量
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// 写入新条目
    pub async fn insert(&self, entry: RegistryEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.module_id) {
            return Err(CoreError::ModuleAlreadyInstalled(entry.module_id));
        }

        let mut next = entries.clone();
        let module_id = entry.module_id.clone();
        next.insert(module_id.clone(), entry);
        self.persist(&next).await?;
        *entries = next;

        debug!(module_id = %module_id, "注册表条目已写入");
        Ok(())
    }

    /// 更新状态
    pub async fn set_status(&self, module_id: &str, status: ModuleStatus) -> Result<RegistryEntry> {
        self.update_entry(module_id, |entry| entry.status = status)
            .await
    }

    /// 记录更新：替换版本与资源声明，名称、类型和依赖保持安装时的值
    pub async fn record_update(
        &self,
        module_id: &str,
        manifest: &ModuleManifest,
    ) -> Result<RegistryEntry> {
        self.update_entry(module_id, |entry| {
            entry.version = manifest.version.clone();
            entry.claims = manifest.claimed_resources();
        })
        .await
    }

    /// 删除条目，返回被删除的条目
    pub async fn remove(&self, module_id: &str) -> Result<Option<RegistryEntry>> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(module_id) {
            return Ok(None);
        }

        let mut next = entries.clone();
        let removed = next.remove(module_id);
        self.persist(&next).await?;
        *entries = next;

        debug!(module_id = %module_id, "注册表条目已删除");
        Ok(removed)
    }

    async fn update_entry<F>(&self, module_id: &str, apply: F) -> Result<RegistryEntry>
    where
        F: FnOnce(&mut RegistryEntry),
    {
        let mut entries = self.entries.write().await;
        let mut entry = entries
            .get(module_id)
            .cloned()
            .ok_or_else(|| CoreError::ModuleNotInstalled(module_id.to_string()))?;
        apply(&mut entry);
        entry.updated_at = Utc::now();

        let mut next = entries.clone();
        next.insert(module_id.to_string(), entry.clone());
        self.persist(&next).await?;
        *entries = next;

        Ok(entry)
    }

    async fn persist(&self, entries: &BTreeMap<String, RegistryEntry>) -> Result<()> {
        let snapshot: Vec<RegistryEntry> = entries.values().cloned().collect();
        self.store.save(&snapshot).await
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: &str) -> RegistryEntry {
        RegistryEntry::from_manifest(&ModuleManifest::new(id, id, "1.0.0"))
    }

    struct FailingStore;

    #[async_trait]
    impl RegistryStore for FailingStore {
        async fn load(&self) -> Result<Vec<RegistryEntry>> {
            Ok(Vec::new())
        }

        async fn save(&self, _entries: &[RegistryEntry]) -> Result<()> {
            Err(CoreError::Storage("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let registry = ModuleRegistry::in_memory();
        registry.insert(entry("core")).await.unwrap();

        let stored = registry.get("core").await.unwrap();
        assert_eq!(stored.status, ModuleStatus::Installed);
        assert!(registry.contains("core").await);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_insert_duplicate() {
        let registry = ModuleRegistry::in_memory();
        registry.insert(entry("core")).await.unwrap();
        let result = registry.insert(entry("core")).await;
        assert!(matches!(result, Err(CoreError::ModuleAlreadyInstalled(_))));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_set_status_and_version() {
        let registry = ModuleRegistry::in_memory();
        registry.insert(entry("forms")).await.unwrap();

        let updated = registry
            .set_status("forms", ModuleStatus::Active)
            .await
            .unwrap();
        assert!(updated.is_active());
        assert_eq!(registry.find_by_status(ModuleStatus::Active).await.len(), 1);

        let next = ModuleManifest::new("forms", "Forms v2", "1.1.0")
            .owns_table("form_entries")
            .depends_on("core", "^2.0");
        let updated = registry.record_update("forms", &next).await.unwrap();
        assert_eq!(updated.version, "1.1.0");
        assert_eq!(updated.claims, vec![ResourceRef::table("form_entries")]);
        assert_eq!(updated.name, entry("forms").name);
        assert!(updated.dependencies.is_empty());
        assert!(updated.updated_at >= updated.installed_at);

        let missing = registry.set_status("ghost", ModuleStatus::Active).await;
        assert!(matches!(missing, Err(CoreError::ModuleNotInstalled(_))));
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = ModuleRegistry::in_memory();
        registry.insert(entry("forms")).await.unwrap();

        assert!(registry.remove("forms").await.unwrap().is_some());
        assert!(registry.remove("forms").await.unwrap().is_none());
        assert!(!registry.contains("forms").await);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_memory_state() {
        let registry = ModuleRegistry::open(Arc::new(FailingStore)).await.unwrap();
        assert!(registry.insert(entry("core")).await.is_err());
        assert!(!registry.contains("core").await);
    }

    #[tokio::test]
    async fn test_open_rejects_duplicates() {
        let store = MemoryRegistryStore::with_entries(vec![entry("core"), entry("core")]);
        let result = ModuleRegistry::open(Arc::new(store)).await;
        assert!(matches!(result, Err(CoreError::Storage(_))));
    }

    #[tokio::test]
    async fn test_json_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/registry.json");
        let store: Arc<dyn RegistryStore> = Arc::new(JsonFileRegistryStore::new(&path));

        {
            let registry = ModuleRegistry::open(store.clone()).await.unwrap();
            let mut forms = entry("forms");
            forms.dependencies.insert("core".to_string(), "^1".to_string());
            registry.insert(entry("core")).await.unwrap();
            registry.insert(forms).await.unwrap();
            registry
                .set_status("core", ModuleStatus::Active)
                .await
                .unwrap();
        }

        let reopened = ModuleRegistry::open(store).await.unwrap();
        let forms = reopened.get("forms").await.unwrap();
        assert!(forms.depends_on("core"));
        assert!(reopened.get("core").await.unwrap().is_active());

        // 不留下临时文件
        let mut names = Vec::new();
        let mut dir_entries = tokio::fs::read_dir(path.parent().unwrap()).await.unwrap();
        while let Some(e) = dir_entries.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["registry.json"]);
    }

    #[tokio::test]
    async fn test_json_file_store_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let result = JsonFileRegistryStore::new(&path).load().await;
        assert!(matches!(result, Err(CoreError::Storage(_))));
    }
}
