//! 资源所有权
//!
//! 安装前校验清单声明的资源没有被其他已安装模块声明；清除前对声明的
//! 每个资源做实时存在性检查。只有安装时已记录在注册表、确认存在且不归属
//! 其他模块的资源才会交给数据清理器。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cleaner::PurgeRequest;
use super::manifest::{ModuleKind, ModuleManifest, ResourceKind, ResourceRef};
use super::registry::RegistryEntry;
use super::store::ResourceStore;
use crate::utils::{CoreError, Result};

/// 资源所有权冲突
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipViolation {
    /// 冲突的资源
    pub resource: ResourceRef,
    /// 已声明该资源的模块
    pub claimed_by: String,
}

impl fmt::Display for OwnershipViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} 已被模块 '{}' 声明", self.resource, self.claimed_by)
    }
}

/// 所有权核验结果
///
/// 每次清除前重新计算，不持久化。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub module_id: String,
    pub verified_tables: Vec<String>,
    pub verified_content_types: Vec<String>,
    pub verified_field_groups: Vec<String>,
    pub missing_tables: Vec<String>,
    pub missing_content_types: Vec<String>,
    pub missing_field_groups: Vec<String>,
    /// 已被其他模块声明的资源，不参与清除
    pub conflicting: Vec<OwnershipViolation>,
    /// 清单声明了但安装时未记录的资源，不参与清除
    #[serde(default)]
    pub unclaimed_at_install: Vec<ResourceRef>,
}

impl VerificationResult {
    fn new(module_id: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            ..Default::default()
        }
    }

    fn push_verified(&mut self, resource: ResourceRef) {
        let bucket = match resource.kind {
            ResourceKind::Table => &mut self.verified_tables,
            ResourceKind::ContentType => &mut self.verified_content_types,
            ResourceKind::FieldGroup => &mut self.verified_field_groups,
        };
        bucket.push(resource.name);
    }

    fn push_missing(&mut self, resource: ResourceRef) {
        let bucket = match resource.kind {
            ResourceKind::Table => &mut self.missing_tables,
            ResourceKind::ContentType => &mut self.missing_content_types,
            ResourceKind::FieldGroup => &mut self.missing_field_groups,
        };
        bucket.push(resource.name);
    }

    /// 已确认存在的资源
    pub fn verified(&self) -> Vec<ResourceRef> {
        collect_refs(
            &self.verified_tables,
            &self.verified_content_types,
            &self.verified_field_groups,
        )
    }

    /// 声明但不存在的资源
    pub fn missing(&self) -> Vec<ResourceRef> {
        collect_refs(
            &self.missing_tables,
            &self.missing_content_types,
            &self.missing_field_groups,
        )
    }

    pub fn has_verified(&self) -> bool {
        !(self.verified_tables.is_empty()
            && self.verified_content_types.is_empty()
            && self.verified_field_groups.is_empty())
    }

    pub fn has_missing(&self) -> bool {
        !(self.missing_tables.is_empty()
            && self.missing_content_types.is_empty()
            && self.missing_field_groups.is_empty())
    }

    /// 转换为清除请求，只携带已确认的资源
    pub fn to_purge_request(&self, kind: ModuleKind) -> PurgeRequest {
        PurgeRequest {
            module_id: self.module_id.clone(),
            kind,
            owns_tables: self.verified_tables.clone(),
            owns_content_types: self.verified_content_types.clone(),
            owns_field_groups: self.verified_field_groups.clone(),
        }
    }
}

fn collect_refs(tables: &[String], content_types: &[String], field_groups: &[String]) -> Vec<ResourceRef> {
    tables
        .iter()
        .map(ResourceRef::table)
        .chain(content_types.iter().map(ResourceRef::content_type))
        .chain(field_groups.iter().map(ResourceRef::field_group))
        .collect()
}

/// 资源所有权解析器
pub struct OwnershipResolver {
    store: Arc<dyn ResourceStore>,
}

impl OwnershipResolver {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// 其他模块的资源声明：资源 -> 模块 ID
    fn foreign_claims(module_id: &str, entries: &[RegistryEntry]) -> BTreeMap<ResourceRef, String> {
        entries
            .iter()
            .filter(|e| e.module_id != module_id)
            .flat_map(|e| e.claims.iter().map(move |r| (r.clone(), e.module_id.clone())))
            .collect()
    }

    /// 收集清单与已有声明之间的冲突
    pub fn find_violations(
        manifest: &ModuleManifest,
        entries: &[RegistryEntry],
    ) -> Vec<OwnershipViolation> {
        let foreign = Self::foreign_claims(&manifest.module_id, entries);
        manifest
            .claimed_resources()
            .into_iter()
            .filter_map(|resource| {
                foreign.get(&resource).map(|owner| OwnershipViolation {
                    resource,
                    claimed_by: owner.clone(),
                })
            })
            .collect()
    }

    /// 安装前校验所有权
    ///
    /// # Errors
    ///
    /// 存在冲突时返回 `OwnershipValidation`，列出全部冲突资源。
    pub fn validate_ownership(
        &self,
        manifest: &ModuleManifest,
        entries: &[RegistryEntry],
    ) -> Result<()> {
        let violations = Self::find_violations(manifest, entries);
        if violations.is_empty() {
            return Ok(());
        }

        for violation in &violations {
            warn!(module_id = %manifest.module_id, resource = %violation.resource, claimed_by = %violation.claimed_by, "资源所有权冲突");
        }
        Err(CoreError::OwnershipValidation {
            module_id: manifest.module_id.clone(),
            violations,
        })
    }

    /// 批量校验：每个清单既不能与已安装模块冲突，也不能与同批次中靠前的模块冲突
    pub fn validate_batch(
        &self,
        manifests: &[ModuleManifest],
        entries: &[RegistryEntry],
    ) -> Result<()> {
        let mut known = entries.to_vec();
        for manifest in manifests {
            self.validate_ownership(manifest, &known)?;
            known.retain(|e| e.module_id != manifest.module_id);
            known.push(RegistryEntry::from_manifest(manifest));
        }
        Ok(())
    }

    /// 获取核验后的自有资源
    ///
    /// 声明的每个资源：归属其他已安装模块的进入 `conflicting`；
    /// 不在本模块注册表条目 `claims` 中的进入 `unclaimed_at_install`；
    /// 其余检查实时存在性，存在的进入 verified，不存在的进入 missing。
    /// `entries` 中没有本模块条目时，所有声明都视为未记录。
    pub async fn get_verified_owned_resources(
        &self,
        manifest: &ModuleManifest,
        entries: &[RegistryEntry],
    ) -> Result<VerificationResult> {
        let foreign = Self::foreign_claims(&manifest.module_id, entries);
        let recorded: BTreeSet<&ResourceRef> = entries
            .iter()
            .filter(|e| e.module_id == manifest.module_id)
            .flat_map(|e| e.claims.iter())
            .collect();
        let mut result = VerificationResult::new(&manifest.module_id);

        for resource in manifest.claimed_resources() {
            if let Some(owner) = foreign.get(&resource) {
                warn!(module_id = %manifest.module_id, resource = %resource, claimed_by = %owner, "资源归属其他模块，跳过");
                result.conflicting.push(OwnershipViolation {
                    resource,
                    claimed_by: owner.clone(),
                });
                continue;
            }

            if !recorded.contains(&resource) {
                warn!(module_id = %manifest.module_id, resource = %resource, "资源未在安装时声明，跳过");
                result.unclaimed_at_install.push(resource);
                continue;
            }

            if self.store.exists(&resource).await? {
                result.push_verified(resource);
            } else {
                debug!(module_id = %manifest.module_id, resource = %resource, "声明的资源不存在");
                result.push_missing(resource);
            }
        }

        Ok(result)
    }
}
