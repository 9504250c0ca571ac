//! 生命周期钩子
//!
//! 宿主程序在启动时把模块的钩子函数注册到 [`HookRegistry`]，清单中的
//! `lifecycle_hooks` 只引用入口名称。[`HookRunner`] 负责按名称解析钩子、
//! 构造上下文并执行，同时按阶段应用失败策略：
//!
//! - install / activate：失败为致命错误，向上传播
//! - deactivate / uninstall：失败只记录日志，不阻塞流程

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn, Instrument};

use super::manifest::ModuleManifest;
use super::store::ResourceStore;
use crate::utils::{CoreError, Result};

/// 生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Install,
    Activate,
    Deactivate,
    Uninstall,
}

impl HookPhase {
    /// 全部阶段（按生命周期顺序）
    pub const ALL: [HookPhase; 4] = [
        HookPhase::Install,
        HookPhase::Activate,
        HookPhase::Deactivate,
        HookPhase::Uninstall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::Install => "install",
            HookPhase::Activate => "activate",
            HookPhase::Deactivate => "deactivate",
            HookPhase::Uninstall => "uninstall",
        }
    }

    /// 该阶段的钩子失败是否中止操作
    pub fn is_fatal(&self) -> bool {
        matches!(self, HookPhase::Install | HookPhase::Activate)
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 钩子执行上下文
///
/// 钩子只能通过上下文接触外部世界：清单、资源存储句柄、
/// 限定在模块与阶段上的日志 span，以及调用方传入的选项。
#[derive(Clone)]
pub struct HookContext {
    pub module_id: String,
    pub phase: HookPhase,
    pub manifest: Arc<ModuleManifest>,
    pub resources: Arc<dyn ResourceStore>,
    pub span: tracing::Span,
    pub options: serde_json::Value,
}

impl fmt::Debug for HookContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("module_id", &self.module_id)
            .field("phase", &self.phase)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// 钩子返回的 Future
pub type HookFuture = BoxFuture<'static, anyhow::Result<()>>;

/// 钩子函数
pub type HookFn = Arc<dyn Fn(HookContext) -> HookFuture + Send + Sync>;

/// 钩子注册表：(module_id, 入口名称) -> 钩子函数
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<(String, String), HookFn>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册钩子函数，同名入口会被覆盖
    pub async fn register(&self, module_id: &str, entry: &str, hook: HookFn) {
        let mut hooks = self.hooks.write().await;
        if hooks
            .insert((module_id.to_string(), entry.to_string()), hook)
            .is_some()
        {
            warn!(module_id = %module_id, entry = %entry, "钩子已存在，已覆盖");
        } else {
            debug!(module_id = %module_id, entry = %entry, "钩子已注册");
        }
    }

    /// 注册异步闭包作为钩子
    pub async fn register_fn<F, Fut>(&self, module_id: &str, entry: &str, f: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let hook: HookFn = Arc::new(move |ctx| Box::pin(f(ctx)));
        self.register(module_id, entry, hook).await;
    }

    /// 查找钩子
    pub async fn get(&self, module_id: &str, entry: &str) -> Option<HookFn> {
        let hooks = self.hooks.read().await;
        hooks
            .get(&(module_id.to_string(), entry.to_string()))
            .cloned()
    }

    /// 移除模块的全部钩子
    pub async fn remove_module(&self, module_id: &str) -> usize {
        let mut hooks = self.hooks.write().await;
        let before = hooks.len();
        hooks.retain(|(owner, _), _| owner != module_id);
        before - hooks.len()
    }

    /// 已注册钩子数量
    pub async fn len(&self) -> usize {
        self.hooks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.hooks.read().await.is_empty()
    }

    /// 列出清单引用但未注册的钩子
    pub async fn unresolved(
        &self,
        manifests: &[ModuleManifest],
    ) -> Vec<(String, HookPhase, String)> {
        let hooks = self.hooks.read().await;
        let mut missing = Vec::new();
        for manifest in manifests {
            for (phase, entry) in manifest.lifecycle_hooks.declared() {
                let key = (manifest.module_id.clone(), entry.to_string());
                if !hooks.contains_key(&key) {
                    missing.push((manifest.module_id.clone(), phase, entry.to_string()));
                }
            }
        }
        missing
    }

    /// 启动时校验：所有清单引用的钩子都必须已注册
    ///
    /// 返回第一个缺失的钩子，完整列表见 [`HookRegistry::unresolved`]。
    pub async fn validate(&self, manifests: &[ModuleManifest]) -> Result<()> {
        let missing = self.unresolved(manifests).await;
        for (module_id, phase, entry) in &missing {
            error!(module_id = %module_id, phase = %phase, entry = %entry, "钩子未注册");
        }
        match missing.into_iter().next() {
            Some((module_id, phase, entry)) => Err(CoreError::HookNotRegistered {
                module_id,
                phase,
                entry,
            }),
            None => Ok(()),
        }
    }
}

/// 钩子执行器
pub struct HookRunner {
    registry: Arc<HookRegistry>,
    resources: Arc<dyn ResourceStore>,
}

impl HookRunner {
    pub fn new(registry: Arc<HookRegistry>, resources: Arc<dyn ResourceStore>) -> Self {
        Self {
            registry,
            resources,
        }
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// 执行指定阶段的钩子并应用失败策略
    ///
    /// 清单未声明该阶段钩子时直接返回。致命阶段的错误原样返回，
    /// 其他阶段的错误记录后吞掉。
    pub async fn run(
        &self,
        manifest: &ModuleManifest,
        phase: HookPhase,
        options: &serde_json::Value,
    ) -> Result<()> {
        match self.invoke(manifest, phase, options).await {
            Ok(()) => Ok(()),
            Err(e) if phase.is_fatal() => {
                error!(module_id = %manifest.module_id, phase = %phase, error = %e, "钩子执行失败");
                Err(e)
            }
            Err(e) => {
                warn!(
                    module_id = %manifest.module_id,
                    phase = %phase,
                    error = %e,
                    "忽略钩子错误，继续执行"
                );
                Ok(())
            }
        }
    }

    /// 执行钩子，不应用失败策略
    pub async fn invoke(
        &self,
        manifest: &ModuleManifest,
        phase: HookPhase,
        options: &serde_json::Value,
    ) -> Result<()> {
        let module_id = &manifest.module_id;
        let Some(entry) = manifest.lifecycle_hooks.get(phase) else {
            debug!(module_id = %module_id, phase = %phase, "未声明钩子，跳过");
            return Ok(());
        };

        let hook = self
            .registry
            .get(module_id, entry)
            .await
            .ok_or_else(|| CoreError::HookNotRegistered {
                module_id: module_id.clone(),
                phase,
                entry: entry.to_string(),
            })?;

        let span = tracing::info_span!("lifecycle_hook", module_id = %module_id, phase = %phase, entry = %entry);
        let ctx = HookContext {
            module_id: module_id.clone(),
            phase,
            manifest: Arc::new(manifest.clone()),
            resources: Arc::clone(&self.resources),
            span: span.clone(),
            options: options.clone(),
        };

        info!(module_id = %module_id, phase = %phase, entry = %entry, "执行生命周期钩子");
        hook(ctx)
            .instrument(span)
            .await
            .map_err(|source| CoreError::LifecycleHook {
                module_id: module_id.clone(),
                phase,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::manifest::ResourceRef;
    use crate::module::store::MemoryResourceStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runner() -> (HookRunner, Arc<HookRegistry>, Arc<MemoryResourceStore>) {
        let registry = Arc::new(HookRegistry::new());
        let store = Arc::new(MemoryResourceStore::new());
        let runner = HookRunner::new(registry.clone(), store.clone());
        (runner, registry, store)
    }

    #[test]
    fn test_phase_policy() {
        assert!(HookPhase::Install.is_fatal());
        assert!(HookPhase::Activate.is_fatal());
        assert!(!HookPhase::Deactivate.is_fatal());
        assert!(!HookPhase::Uninstall.is_fatal());
        assert_eq!(HookPhase::Deactivate.to_string(), "deactivate");
    }

    #[tokio::test]
    async fn test_run_without_declared_hook() {
        let (runner, _, _) = runner();
        let manifest = ModuleManifest::new("forms", "Forms", "1.0.0");
        let result = runner
            .run(&manifest, HookPhase::Install, &serde_json::Value::Null)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_hook_receives_context() {
        let (runner, registry, store) = runner();
        registry
            .register_fn("forms", "seed", |ctx: HookContext| async move {
                assert_eq!(ctx.phase, HookPhase::Install);
                assert_eq!(ctx.options["locale"], "zh-CN");
                ctx.resources
                    .create(&ResourceRef::table("form_entries"))
                    .await?;
                anyhow::Ok(())
            })
            .await;

        let manifest =
            ModuleManifest::new("forms", "Forms", "1.0.0").with_hook(HookPhase::Install, "seed");
        runner
            .run(
                &manifest,
                HookPhase::Install,
                &serde_json::json!({"locale": "zh-CN"}),
            )
            .await
            .unwrap();

        assert!(store
            .exists(&ResourceRef::table("form_entries"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_fatal_phase_propagates() {
        let (runner, registry, _) = runner();
        registry
            .register_fn("forms", "boom", |_ctx| async { Err::<(), _>(anyhow::anyhow!("seed failed")) })
            .await;

        let manifest =
            ModuleManifest::new("forms", "Forms", "1.0.0").with_hook(HookPhase::Activate, "boom");
        let err = runner
            .run(&manifest, HookPhase::Activate, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::LifecycleHook { phase: HookPhase::Activate, .. }
        ));
    }

    #[tokio::test]
    async fn test_teardown_phase_swallows_errors() {
        let (runner, registry, _) = runner();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .register_fn("forms", "cleanup", move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("cache unavailable"))
                }
            })
            .await;

        let manifest = ModuleManifest::new("forms", "Forms", "1.0.0")
            .with_hook(HookPhase::Uninstall, "cleanup");
        let result = runner
            .run(&manifest, HookPhase::Uninstall, &serde_json::Value::Null)
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // invoke 不应用策略
        let raw = runner
            .invoke(&manifest, HookPhase::Uninstall, &serde_json::Value::Null)
            .await;
        assert!(raw.is_err());
    }

    #[tokio::test]
    async fn test_unregistered_hook() {
        let (runner, registry, _) = runner();
        let manifest =
            ModuleManifest::new("forms", "Forms", "1.0.0").with_hook(HookPhase::Install, "seed");

        let err = runner
            .run(&manifest, HookPhase::Install, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::HookNotRegistered { .. }));

        let missing = registry.unresolved(std::slice::from_ref(&manifest)).await;
        assert_eq!(
            missing,
            vec![("forms".to_string(), HookPhase::Install, "seed".to_string())]
        );
        assert!(registry.validate(&[manifest]).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_module_hooks() {
        let registry = HookRegistry::new();
        registry.register_fn("forms", "a", |_| async { anyhow::Ok(()) }).await;
        registry.register_fn("forms", "b", |_| async { anyhow::Ok(()) }).await;
        registry.register_fn("reports", "a", |_| async { anyhow::Ok(()) }).await;

        assert_eq!(registry.remove_module("forms").await, 2);
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("reports", "a").await.is_some());
    }
}
