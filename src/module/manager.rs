//! 模块管理器
//!
//! 整合依赖解析、所有权核验、数据清理、钩子执行与注册表，
//! 提供安装、激活、停用、卸载和更新的统一入口。
//!
//! 所有修改操作由一把全局互斥锁串行化，级联卸载和安装后的自动激活
//! 在持有锁的情况下通过内部 `*_locked` 步骤完成。

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::capability::{
    ContentTypeRegistry, FieldGroupRegistry, MemoryContentTypeRegistry, MemoryFieldGroupRegistry,
    MemoryPermissionRegistrar, PermissionRegistrar,
};
use super::catalog::{ManifestCatalog, ManifestProvider};
use super::cleaner::DataCleaner;
use super::dependency::DependencyResolver;
use super::events::{EventPublisher, LifecycleEvent, LifecycleEventKind};
use super::lifecycle::{HookPhase, HookRegistry, HookRunner};
use super::manifest::ModuleManifest;
use super::ownership::{OwnershipResolver, VerificationResult};
use super::parser::ManifestParser;
use super::registry::{
    JsonFileRegistryStore, ModuleRegistry, ModuleStatus, RegistryEntry, RegistryStore,
};
use super::store::{DirResourceStore, MemoryResourceStore, ResourceStore};
use crate::core::config::ModuleConfig;
use crate::utils::{CoreError, Result};

/// 安装选项
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// 安装后是否激活，None 时使用配置
    pub auto_activate: Option<bool>,
    /// 只安装目标模块，不解析依赖（依赖必须已安装）
    pub skip_dependencies: bool,
    /// 传给钩子的选项
    pub hook_options: Value,
}

impl InstallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_activate(mut self, enable: bool) -> Self {
        self.auto_activate = Some(enable);
        self
    }

    pub fn skip_dependencies(mut self) -> Self {
        self.skip_dependencies = true;
        self
    }

    pub fn hook_options(mut self, options: Value) -> Self {
        self.hook_options = options;
        self
    }
}

/// 卸载选项
#[derive(Debug, Clone, Default)]
pub struct UninstallOptions {
    /// 级联卸载所有依赖者
    pub force: bool,
    /// 覆盖清单的默认数据处理方式
    pub purge_data: Option<bool>,
    /// 传给钩子的选项
    pub hook_options: Value,
}

impl UninstallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn purge_data(mut self, purge: bool) -> Self {
        self.purge_data = Some(purge);
        self
    }

    pub fn hook_options(mut self, options: Value) -> Self {
        self.hook_options = options;
        self
    }
}

/// 安装结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    /// 本次新安装的模块（按安装顺序）
    pub installed: Vec<String>,
    /// 已安装而跳过的模块
    pub skipped: Vec<String>,
    /// 本次激活的模块
    pub activated: Vec<String>,
}

/// 卸载结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UninstallReport {
    /// 已卸载的模块（按卸载顺序）
    pub removed: Vec<String>,
    /// 执行了数据清除的模块的核验结果
    pub purged: Vec<VerificationResult>,
    /// 清除前生成的备份快照
    pub backups: Vec<String>,
}

impl UninstallReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

/// 可用更新
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub module_id: String,
    pub installed: String,
    pub available: String,
}

/// 模块管理器
pub struct ModuleManager {
    config: ModuleConfig,
    manifests: Arc<dyn ManifestProvider>,
    registry: Arc<ModuleRegistry>,
    resolver: DependencyResolver,
    ownership: OwnershipResolver,
    cleaner: DataCleaner,
    hooks: HookRunner,
    permissions: Arc<dyn PermissionRegistrar>,
    content_types: Arc<dyn ContentTypeRegistry>,
    field_groups: Arc<dyn FieldGroupRegistry>,
    event_publisher: Option<EventPublisher>,
    /// 修改操作的全局锁
    op_lock: Mutex<()>,
}

impl ModuleManager {
    /// 创建构建器
    pub fn builder() -> ModuleManagerBuilder {
        ModuleManagerBuilder::new()
    }

    /// 根据配置创建管理器
    ///
    /// 扫描清单目录；配置了注册表路径时使用 JSON 文件注册表，
    /// 配置了数据目录时使用目录资源存储，否则使用内存实现。
    pub async fn from_config(config: ModuleConfig, hooks: Arc<HookRegistry>) -> Result<Self> {
        let catalog = ManifestCatalog::with_dirs(config.manifest_dirs.clone());
        catalog.reload().await?;

        let registry = match &config.registry_path {
            Some(path) => {
                let store: Arc<dyn RegistryStore> = Arc::new(JsonFileRegistryStore::new(path));
                ModuleRegistry::open(store).await?
            }
            None => ModuleRegistry::in_memory(),
        };

        let resources: Arc<dyn ResourceStore> = match &config.data_dir {
            Some(dir) => Arc::new(DirResourceStore::new(dir, config.effective_backup_dir())),
            None => Arc::new(MemoryResourceStore::new()),
        };

        Ok(ModuleManagerBuilder::new()
            .config(config)
            .manifests(Arc::new(catalog))
            .registry(Arc::new(registry))
            .resources(resources)
            .hooks(hooks)
            .build())
    }

    /// 设置事件发布器
    pub fn set_event_publisher<F>(&mut self, publisher: F)
    where
        F: Fn(LifecycleEvent) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.event_publisher = Some(Arc::new(publisher));
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn manifests(&self) -> &Arc<dyn ManifestProvider> {
        &self.manifests
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn hook_registry(&self) -> &Arc<HookRegistry> {
        self.hooks.registry()
    }

    // ==================== 安装 ====================

    /// 安装模块
    ///
    /// 按依赖顺序安装尚未安装的模块，全部校验（清单、版本、依赖存在性、
    /// 资源所有权）在任何修改之前完成。每个模块先注册能力、再执行安装钩子，
    /// 最后写入注册表；钩子失败时撤销该模块的能力注册且不写入条目。
    /// 已安装的依赖保留，不做全局回滚。
    #[instrument(skip(self, options), fields(module_id = %module_id))]
    pub async fn install(&self, module_id: &str, options: InstallOptions) -> Result<InstallReport> {
        let _guard = self.op_lock.lock().await;
        self.install_locked(module_id, &options).await
    }

    async fn install_locked(&self, module_id: &str, options: &InstallOptions) -> Result<InstallReport> {
        info!("安装模块");

        let order = if options.skip_dependencies {
            vec![module_id.to_string()]
        } else {
            self.resolver.resolve_install_order(module_id)?
        };

        let entries = self.registry.list().await;
        let installed: BTreeSet<&str> = entries.iter().map(|e| e.module_id.as_str()).collect();

        let mut report = InstallReport::default();
        let mut pending: Vec<ModuleManifest> = Vec::new();
        for id in &order {
            if installed.contains(id.as_str()) {
                debug!(module_id = %id, "模块已安装，跳过");
                report.skipped.push(id.clone());
                continue;
            }
            let manifest = self.manifest(id)?;
            ManifestParser::validate(&manifest)?;
            pending.push(manifest);
        }

        // 依赖必须已安装或在本批次中排在前面
        let mut available = installed.clone();
        for manifest in &pending {
            let missing: Vec<String> = manifest
                .dependencies
                .keys()
                .filter(|dep| !available.contains(dep.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(CoreError::DependencyNotInstalled {
                    module: manifest.module_id.clone(),
                    missing,
                });
            }
            available.insert(manifest.module_id.as_str());
        }

        let pending_ids: Vec<String> = pending.iter().map(|m| m.module_id.clone()).collect();
        self.resolver.check_versions(&pending_ids, &entries)?;
        self.ownership.validate_batch(&pending, &entries)?;

        for manifest in &pending {
            self.install_one(manifest, options).await?;
            report.installed.push(manifest.module_id.clone());
        }

        if options.auto_activate.unwrap_or(self.config.auto_activate) {
            for id in &order {
                if self.activate_locked(id, &options.hook_options).await? {
                    report.activated.push(id.clone());
                }
            }
        }

        info!(
            installed = ?report.installed,
            skipped = ?report.skipped,
            activated = ?report.activated,
            "安装完成"
        );
        Ok(report)
    }

    async fn install_one(&self, manifest: &ModuleManifest, options: &InstallOptions) -> Result<()> {
        let module_id = &manifest.module_id;
        info!(module_id = %module_id, version = %manifest.version, "安装单个模块");

        let result = async {
            self.register_capabilities(manifest).await?;
            self.hooks
                .run(manifest, HookPhase::Install, &options.hook_options)
                .await?;
            self.registry
                .insert(RegistryEntry::from_manifest(manifest))
                .await
        }
        .await;

        if let Err(e) = result {
            warn!(module_id = %module_id, error = %e, "安装失败，撤销能力注册");
            if let Err(rollback) = self.remove_capabilities(module_id).await {
                warn!(module_id = %module_id, error = %rollback, "撤销能力注册失败");
            }
            return Err(e);
        }

        self.publish(LifecycleEventKind::Installed, module_id, &manifest.version)
            .await;
        Ok(())
    }

    // ==================== 激活 / 停用 ====================

    /// 激活模块
    ///
    /// 激活钩子失败时状态不变。已激活的模块不重复执行钩子。
    #[instrument(skip(self), fields(module_id = %module_id))]
    pub async fn activate(&self, module_id: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.activate_locked(module_id, &Value::Null).await?;
        Ok(())
    }

    /// 返回是否发生了状态变化
    async fn activate_locked(&self, module_id: &str, hook_options: &Value) -> Result<bool> {
        let entry = self.entry(module_id).await?;
        if entry.is_active() {
            debug!(module_id = %module_id, "模块已激活");
            return Ok(false);
        }

        let manifest = self.manifest(module_id)?;
        self.hooks
            .run(&manifest, HookPhase::Activate, hook_options)
            .await?;
        let entry = self
            .registry
            .set_status(module_id, ModuleStatus::Active)
            .await?;

        info!(module_id = %module_id, "模块已激活");
        self.publish(LifecycleEventKind::Activated, module_id, &entry.version)
            .await;
        Ok(true)
    }

    /// 停用模块
    ///
    /// 停用钩子的错误只记录日志，状态总会更新为 inactive。
    #[instrument(skip(self), fields(module_id = %module_id))]
    pub async fn deactivate(&self, module_id: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.deactivate_locked(module_id, &Value::Null).await?;
        Ok(())
    }

    async fn deactivate_locked(&self, module_id: &str, hook_options: &Value) -> Result<bool> {
        let entry = self.entry(module_id).await?;
        if !entry.is_active() {
            debug!(module_id = %module_id, status = %entry.status, "模块未激活，无需停用");
            return Ok(false);
        }

        match self.manifests.get(module_id) {
            Some(manifest) => {
                self.hooks
                    .run(&manifest, HookPhase::Deactivate, hook_options)
                    .await?
            }
            None => warn!(module_id = %module_id, "模块清单缺失，跳过停用钩子"),
        }

        let entry = self
            .registry
            .set_status(module_id, ModuleStatus::Inactive)
            .await?;

        info!(module_id = %module_id, "模块已停用");
        self.publish(LifecycleEventKind::Deactivated, module_id, &entry.version)
            .await;
        Ok(true)
    }

    // ==================== 卸载 ====================

    /// 卸载模块
    ///
    /// 模块未安装时返回空报告。存在依赖者且未指定 `force` 时返回
    /// `ModuleHasDependents`，不做任何修改；指定 `force` 时按卸载顺序
    /// 级联卸载模块及其全部依赖者，任一步失败即中止剩余步骤。
    #[instrument(skip(self, options), fields(module_id = %module_id))]
    pub async fn uninstall(&self, module_id: &str, options: UninstallOptions) -> Result<UninstallReport> {
        let _guard = self.op_lock.lock().await;
        info!("卸载模块");

        let entries = self.registry.list().await;
        if !entries.iter().any(|e| e.module_id == module_id) {
            info!("模块未安装，无需卸载");
            return Ok(UninstallReport::default());
        }

        let dependents = self.resolver.find_dependents(module_id, &entries);
        let targets = if dependents.is_empty() {
            vec![module_id.to_string()]
        } else if options.force {
            warn!(dependents = ?dependents, "强制卸载，级联卸载依赖者");
            let mut ids = vec![module_id.to_string()];
            ids.extend(dependents);
            self.resolver.resolve_uninstall_order(&ids, &entries)?
        } else {
            return Err(CoreError::ModuleHasDependents {
                module: module_id.to_string(),
                dependents,
            });
        };

        let mut report = UninstallReport::default();
        for target in &targets {
            self.uninstall_one(target, &options, &mut report).await?;
        }

        info!(removed = ?report.removed, "卸载完成");
        Ok(report)
    }

    async fn uninstall_one(
        &self,
        module_id: &str,
        options: &UninstallOptions,
        report: &mut UninstallReport,
    ) -> Result<()> {
        let Some(entry) = self.registry.get(module_id).await else {
            debug!(module_id = %module_id, "模块已不在注册表中，跳过");
            return Ok(());
        };
        info!(module_id = %module_id, version = %entry.version, "卸载单个模块");

        if entry.is_active() {
            self.deactivate_locked(module_id, &options.hook_options)
                .await?;
        }

        match self.manifests.get(module_id) {
            Some(manifest) => {
                let policy = manifest.uninstall_policy;
                if policy.should_purge(options.purge_data) {
                    let entries = self.registry.list().await;
                    let verification = self
                        .ownership
                        .get_verified_owned_resources(&manifest, &entries)
                        .await?;
                    for missing in verification.missing() {
                        warn!(module_id = %module_id, resource = %missing, "声明的资源不存在，跳过清除");
                    }
                    if !verification.unclaimed_at_install.is_empty() {
                        warn!(
                            module_id = %module_id,
                            count = verification.unclaimed_at_install.len(),
                            "清单声明了安装时未记录的资源，已保留"
                        );
                    }
                    let outcome = self
                        .cleaner
                        .purge(
                            &verification.to_purge_request(entry.kind),
                            policy.auto_backup,
                        )
                        .await?;
                    report.backups.extend(outcome.backup);
                    report.purged.push(verification);
                } else if options.purge_data == Some(true) {
                    warn!(module_id = %module_id, "卸载策略不允许清除数据，已保留");
                }

                self.hooks
                    .run(&manifest, HookPhase::Uninstall, &options.hook_options)
                    .await?;
            }
            None => {
                warn!(module_id = %module_id, "模块清单缺失，跳过卸载钩子与数据清除");
            }
        }

        if let Err(e) = self.remove_capabilities(module_id).await {
            warn!(module_id = %module_id, error = %e, "撤销能力注册失败");
        }

        self.registry.remove(module_id).await?;
        self.publish(LifecycleEventKind::Uninstalled, module_id, &entry.version)
            .await;
        report.removed.push(module_id.to_string());
        Ok(())
    }

    // ==================== 更新 ====================

    /// 更新模块版本
    ///
    /// 目录中的版本必须严格高于已安装版本。注册表只替换版本号、资源声明
    /// 与更新时间；新版本的资源声明同样需要通过所有权校验。
    #[instrument(skip(self), fields(module_id = %module_id))]
    pub async fn update(&self, module_id: &str) -> Result<RegistryEntry> {
        let _guard = self.op_lock.lock().await;

        let entry = self.entry(module_id).await?;
        let manifest = self.manifest(module_id)?;

        let installed = Version::parse(&entry.version)?;
        let available = Version::parse(&manifest.version)?;
        if available <= installed {
            return Err(CoreError::NoUpdateAvailable {
                module_id: module_id.to_string(),
                installed: entry.version,
                available: manifest.version,
            });
        }

        let entries = self.registry.list().await;
        self.ownership.validate_ownership(&manifest, &entries)?;

        let updated = self.registry.record_update(module_id, &manifest).await?;
        info!(from = %entry.version, to = %updated.version, "模块已更新");
        self.publish(LifecycleEventKind::Updated, module_id, &updated.version)
            .await;
        Ok(updated)
    }

    /// 列出所有有更新的已安装模块
    pub async fn check_updates(&self) -> Vec<UpdateInfo> {
        let mut updates = Vec::new();
        for entry in self.registry.list().await {
            let Some(manifest) = self.manifests.get(&entry.module_id) else {
                continue;
            };
            match (Version::parse(&entry.version), Version::parse(&manifest.version)) {
                (Ok(installed), Ok(available)) if available > installed => {
                    updates.push(UpdateInfo {
                        module_id: entry.module_id,
                        installed: entry.version,
                        available: manifest.version,
                    });
                }
                (Ok(_), Ok(_)) => {}
                _ => {
                    warn!(module_id = %entry.module_id, "版本号无法解析，跳过更新检查");
                }
            }
        }
        updates
    }

    // ==================== 查询 ====================

    /// 返回阻止卸载的模块（直接与传递依赖者），为空表示可以直接卸载
    pub async fn can_uninstall(&self, module_id: &str) -> Vec<String> {
        let entries = self.registry.list().await;
        self.resolver.find_dependents(module_id, &entries)
    }

    /// 列出已安装模块
    pub async fn list_installed(&self) -> Vec<RegistryEntry> {
        self.registry.list().await
    }

    /// 获取模块的注册表条目
    pub async fn get_status(&self, module_id: &str) -> Option<RegistryEntry> {
        self.registry.get(module_id).await
    }

    /// 模块是否已激活
    pub async fn is_active(&self, module_id: &str) -> bool {
        self.registry
            .get(module_id)
            .await
            .map(|e| e.is_active())
            .unwrap_or(false)
    }

    /// 校验目录中所有清单引用的钩子都已注册
    pub async fn validate_hooks(&self) -> Result<()> {
        self.hook_registry().validate(&self.manifests.list()).await
    }

    // ==================== 内部方法 ====================

    fn manifest(&self, module_id: &str) -> Result<ModuleManifest> {
        self.manifests
            .get(module_id)
            .ok_or_else(|| CoreError::ManifestNotFound(module_id.to_string()))
    }

    async fn entry(&self, module_id: &str) -> Result<RegistryEntry> {
        self.registry
            .get(module_id)
            .await
            .ok_or_else(|| CoreError::ModuleNotInstalled(module_id.to_string()))
    }

    async fn register_capabilities(&self, manifest: &ModuleManifest) -> Result<()> {
        let module_id = &manifest.module_id;
        let capabilities = &manifest.capabilities;

        if !capabilities.permissions.is_empty() {
            self.permissions
                .register(module_id, &capabilities.permissions)
                .await?;
        }
        for schema in &capabilities.content_types {
            self.content_types.register(module_id, schema).await?;
        }
        if !capabilities.field_groups.is_empty() {
            self.field_groups
                .register_multiple(module_id, &capabilities.field_groups)
                .await?;
        }

        debug!(
            module_id = %module_id,
            permissions = capabilities.permissions.len(),
            content_types = capabilities.content_types.len(),
            field_groups = capabilities.field_groups.len(),
            "能力已注册"
        );
        Ok(())
    }

    /// 撤销模块的全部能力注册，三类都会尝试
    async fn remove_capabilities(&self, module_id: &str) -> Result<()> {
        let results = [
            self.permissions.delete_by_module(module_id).await,
            self.content_types.unregister_by_module(module_id).await,
            self.field_groups.unregister_by_module(module_id).await,
        ];

        let errors: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Capability(errors.join("; ")))
        }
    }

    async fn publish(&self, kind: LifecycleEventKind, module_id: &str, version: &str) {
        if let Some(publisher) = &self.event_publisher {
            publisher(LifecycleEvent::new(kind, module_id, version)).await;
        }
    }
}

/// 模块管理器构建器
///
/// 未指定的协作方使用内存实现。
#[derive(Default)]
pub struct ModuleManagerBuilder {
    config: ModuleConfig,
    manifests: Option<Arc<dyn ManifestProvider>>,
    registry: Option<Arc<ModuleRegistry>>,
    resources: Option<Arc<dyn ResourceStore>>,
    hooks: Option<Arc<HookRegistry>>,
    permissions: Option<Arc<dyn PermissionRegistrar>>,
    content_types: Option<Arc<dyn ContentTypeRegistry>>,
    field_groups: Option<Arc<dyn FieldGroupRegistry>>,
    event_publisher: Option<EventPublisher>,
}

impl ModuleManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ModuleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn manifests(mut self, manifests: Arc<dyn ManifestProvider>) -> Self {
        self.manifests = Some(manifests);
        self
    }

    pub fn registry(mut self, registry: Arc<ModuleRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn resources(mut self, resources: Arc<dyn ResourceStore>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn permissions(mut self, registrar: Arc<dyn PermissionRegistrar>) -> Self {
        self.permissions = Some(registrar);
        self
    }

    pub fn content_types(mut self, registry: Arc<dyn ContentTypeRegistry>) -> Self {
        self.content_types = Some(registry);
        self
    }

    pub fn field_groups(mut self, registry: Arc<dyn FieldGroupRegistry>) -> Self {
        self.field_groups = Some(registry);
        self
    }

    pub fn event_publisher(mut self, publisher: EventPublisher) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// 构建管理器
    pub fn build(self) -> ModuleManager {
        let manifests = self
            .manifests
            .unwrap_or_else(|| Arc::new(ManifestCatalog::new()));
        let resources = self
            .resources
            .unwrap_or_else(|| Arc::new(MemoryResourceStore::new()));
        let hooks = self.hooks.unwrap_or_default();

        ModuleManager {
            config: self.config,
            resolver: DependencyResolver::new(Arc::clone(&manifests)),
            ownership: OwnershipResolver::new(Arc::clone(&resources)),
            cleaner: DataCleaner::new(Arc::clone(&resources)),
            hooks: HookRunner::new(hooks, resources),
            manifests,
            registry: self.registry.unwrap_or_default(),
            permissions: self
                .permissions
                .unwrap_or_else(|| Arc::new(MemoryPermissionRegistrar::new())),
            content_types: self
                .content_types
                .unwrap_or_else(|| Arc::new(MemoryContentTypeRegistry::new())),
            field_groups: self
                .field_groups
                .unwrap_or_else(|| Arc::new(MemoryFieldGroupRegistry::new())),
            event_publisher: self.event_publisher,
            op_lock: Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::manifest::{ResourceRef, UninstallMode, UninstallPolicy};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog(manifests: Vec<ModuleManifest>) -> Arc<ManifestCatalog> {
        Arc::new(ManifestCatalog::from_manifests(manifests))
    }

    #[tokio::test]
    async fn test_install_single_module() {
        let manager = ModuleManager::builder()
            .manifests(catalog(vec![ModuleManifest::new("core", "Core", "1.0.0")]))
            .build();

        let report = manager.install("core", InstallOptions::new()).await.unwrap();
        assert_eq!(report.installed, vec!["core"]);
        assert_eq!(report.activated, vec!["core"]);
        assert!(manager.is_active("core").await);
    }

    #[tokio::test]
    async fn test_install_without_auto_activate() {
        let manager = ModuleManager::builder()
            .manifests(catalog(vec![ModuleManifest::new("core", "Core", "1.0.0")]))
            .build();

        let report = manager
            .install("core", InstallOptions::new().auto_activate(false))
            .await
            .unwrap();
        assert!(report.activated.is_empty());
        assert_eq!(
            manager.get_status("core").await.unwrap().status,
            ModuleStatus::Installed
        );
    }

    #[tokio::test]
    async fn test_config_auto_activate_fallback() {
        let config = ModuleConfig {
            auto_activate: false,
            ..Default::default()
        };
        let manager = ModuleManager::builder()
            .config(config)
            .manifests(catalog(vec![ModuleManifest::new("core", "Core", "1.0.0")]))
            .build();

        manager.install("core", InstallOptions::new()).await.unwrap();
        assert!(!manager.is_active("core").await);
    }

    #[tokio::test]
    async fn test_skip_dependencies_requires_installed_deps() {
        let manager = ModuleManager::builder()
            .manifests(catalog(vec![
                ModuleManifest::new("core", "Core", "1.0.0"),
                ModuleManifest::new("forms", "Forms", "1.0.0").depends_on("core", "^1"),
            ]))
            .build();

        let err = manager
            .install("forms", InstallOptions::new().skip_dependencies())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DependencyNotInstalled { ref missing, .. } if missing == &vec!["core".to_string()]));
        assert_eq!(manager.list_installed().await.len(), 0);
    }

    #[tokio::test]
    async fn test_install_version_mismatch_before_mutation() {
        let manager = ModuleManager::builder()
            .manifests(catalog(vec![
                ModuleManifest::new("core", "Core", "2.0.0"),
                ModuleManifest::new("forms", "Forms", "1.0.0").depends_on("core", "^1"),
            ]))
            .build();

        let err = manager.install("forms", InstallOptions::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::VersionMismatch { .. }));
        assert!(manager.list_installed().await.is_empty());
    }

    #[tokio::test]
    async fn test_install_hook_failure_rolls_back_capabilities() {
        let hooks = Arc::new(HookRegistry::new());
        hooks
            .register_fn("forms", "seed", |_| async {
                Err::<(), _>(anyhow::anyhow!("seed failed"))
            })
            .await;
        let permissions = Arc::new(MemoryPermissionRegistrar::new());

        let manager = ModuleManager::builder()
            .manifests(catalog(vec![ModuleManifest::new("forms", "Forms", "1.0.0")
                .with_permission("forms.view")
                .with_hook(HookPhase::Install, "seed")]))
            .hooks(hooks)
            .permissions(permissions.clone())
            .build();

        let err = manager.install("forms", InstallOptions::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::LifecycleHook { phase: HookPhase::Install, .. }));
        assert!(manager.get_status("forms").await.is_none());
        assert!(permissions.permissions_of("forms").await.is_empty());
    }

    #[tokio::test]
    async fn test_activate_hook_failure_keeps_status() {
        let hooks = Arc::new(HookRegistry::new());
        hooks
            .register_fn("forms", "boot", |_| async {
                Err::<(), _>(anyhow::anyhow!("boot failed"))
            })
            .await;
        let manager = ModuleManager::builder()
            .manifests(catalog(vec![ModuleManifest::new("forms", "Forms", "1.0.0")
                .with_hook(HookPhase::Activate, "boot")]))
            .hooks(hooks)
            .build();

        let err = manager.install("forms", InstallOptions::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::LifecycleHook { phase: HookPhase::Activate, .. }));
        // 安装已完成，激活失败不影响注册表条目
        assert_eq!(
            manager.get_status("forms").await.unwrap().status,
            ModuleStatus::Installed
        );
        assert!(manager.activate("forms").await.is_err());
    }

    #[tokio::test]
    async fn test_deactivate_hook_failure_still_deactivates() {
        let hooks = Arc::new(HookRegistry::new());
        hooks
            .register_fn("forms", "stop", |_| async {
                Err::<(), _>(anyhow::anyhow!("stop failed"))
            })
            .await;
        let manager = ModuleManager::builder()
            .manifests(catalog(vec![ModuleManifest::new("forms", "Forms", "1.0.0")
                .with_hook(HookPhase::Deactivate, "stop")]))
            .hooks(hooks)
            .build();

        manager.install("forms", InstallOptions::new()).await.unwrap();
        manager.deactivate("forms").await.unwrap();
        assert_eq!(
            manager.get_status("forms").await.unwrap().status,
            ModuleStatus::Inactive
        );

        // 重新激活
        manager.activate("forms").await.unwrap();
        assert!(manager.is_active("forms").await);
    }

    #[tokio::test]
    async fn test_activate_not_installed() {
        let manager = ModuleManager::builder().build();
        assert!(matches!(
            manager.activate("ghost").await,
            Err(CoreError::ModuleNotInstalled(_))
        ));
        assert!(matches!(
            manager.deactivate("ghost").await,
            Err(CoreError::ModuleNotInstalled(_))
        ));
    }

    #[tokio::test]
    async fn test_uninstall_absent_module() {
        let manager = ModuleManager::builder().build();
        let report = manager
            .uninstall("ghost", UninstallOptions::new())
            .await
            .unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_uninstall_policy_forbids_purge() {
        let store = Arc::new(MemoryResourceStore::with_resources([ResourceRef::table(
            "form_entries",
        )]));
        let manager = ModuleManager::builder()
            .manifests(catalog(vec![ModuleManifest::new("forms", "Forms", "1.0.0")
                .owns_table("form_entries")
                .with_uninstall_policy(UninstallPolicy {
                    default_mode: UninstallMode::PurgeData,
                    allow_purge: false,
                    auto_backup: false,
                })]))
            .resources(store.clone())
            .build();

        manager.install("forms", InstallOptions::new()).await.unwrap();
        let report = manager
            .uninstall("forms", UninstallOptions::new().purge_data(true))
            .await
            .unwrap();

        assert_eq!(report.removed, vec!["forms"]);
        assert!(report.purged.is_empty());
        assert!(store
            .exists(&ResourceRef::table("form_entries"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_uninstall_missing_manifest() {
        let catalog = catalog(vec![ModuleManifest::new("forms", "Forms", "1.0.0")]);
        let manager = ModuleManager::builder().manifests(catalog.clone()).build();

        manager.install("forms", InstallOptions::new()).await.unwrap();
        catalog.remove("forms");

        let report = manager
            .uninstall("forms", UninstallOptions::new().purge_data(true))
            .await
            .unwrap();
        assert_eq!(report.removed, vec!["forms"]);
        assert!(manager.get_status("forms").await.is_none());
    }

    #[tokio::test]
    async fn test_events_published() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let publisher: EventPublisher = Arc::new(move |_event: LifecycleEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        let manager = ModuleManager::builder()
            .manifests(catalog(vec![ModuleManifest::new("core", "Core", "1.0.0")]))
            .event_publisher(publisher)
            .build();

        manager.install("core", InstallOptions::new()).await.unwrap();
        manager
            .uninstall("core", UninstallOptions::new())
            .await
            .unwrap();

        // installed, activated, deactivated, uninstalled
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_check_updates() {
        let catalog = catalog(vec![
            ModuleManifest::new("core", "Core", "1.0.0"),
            ModuleManifest::new("forms", "Forms", "1.0.0"),
        ]);
        let manager = ModuleManager::builder().manifests(catalog.clone()).build();
        manager.install("core", InstallOptions::new()).await.unwrap();
        manager.install("forms", InstallOptions::new()).await.unwrap();

        assert!(manager.check_updates().await.is_empty());

        catalog.insert(ModuleManifest::new("forms", "Forms", "1.2.0"));
        let updates = manager.check_updates().await;
        assert_eq!(
            updates,
            vec![UpdateInfo {
                module_id: "forms".to_string(),
                installed: "1.0.0".to_string(),
                available: "1.2.0".to_string(),
            }]
        );
    }
}
