//! 数据清理器
//!
//! 只删除调用方传入的已核验资源，自身不推导所有权。删除顺序为
//! 字段组、内容类型、数据表。启用自动备份时，先备份全部资源再开始删除，
//! 任一备份失败则不删除任何资源。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::manifest::{ModuleKind, ResourceRef};
use super::store::ResourceStore;
use crate::utils::id::backup_label;
use crate::utils::{CoreError, Result};

/// 清除请求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeRequest {
    pub module_id: String,
    pub kind: ModuleKind,
    pub owns_tables: Vec<String>,
    pub owns_content_types: Vec<String>,
    pub owns_field_groups: Vec<String>,
}

impl PurgeRequest {
    /// 按删除顺序排列的资源
    pub fn resources(&self) -> Vec<ResourceRef> {
        self.owns_field_groups
            .iter()
            .map(ResourceRef::field_group)
            .chain(self.owns_content_types.iter().map(ResourceRef::content_type))
            .chain(self.owns_tables.iter().map(ResourceRef::table))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.owns_tables.is_empty()
            && self.owns_content_types.is_empty()
            && self.owns_field_groups.is_empty()
    }
}

/// 清除结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeOutcome {
    pub module_id: String,
    /// 已删除的资源
    pub dropped: Vec<ResourceRef>,
    /// 备份快照名称（未备份时为 None）
    pub backup: Option<String>,
}

/// 数据清理器
pub struct DataCleaner {
    store: Arc<dyn ResourceStore>,
}

impl DataCleaner {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// 清除模块数据
    ///
    /// # Errors
    ///
    /// 备份或删除任一资源失败时返回 `PurgeFailed`。删除中途失败时，
    /// 已删除的资源不会恢复。
    #[instrument(skip(self, request), fields(module_id = %request.module_id, kind = %request.kind))]
    pub async fn purge(&self, request: &PurgeRequest, auto_backup: bool) -> Result<PurgeOutcome> {
        let resources = request.resources();
        let mut outcome = PurgeOutcome {
            module_id: request.module_id.clone(),
            ..Default::default()
        };

        if resources.is_empty() {
            info!("没有需要清除的资源");
            return Ok(outcome);
        }

        if auto_backup {
            let label = format!("{}-{}", request.module_id, backup_label());
            for resource in &resources {
                self.store
                    .backup(resource, &label)
                    .await
                    .map_err(|e| purge_failed(request, resource, format!("备份失败: {}", e)))?;
            }
            info!(backup = %label, count = resources.len(), "资源已备份");
            outcome.backup = Some(label);
        }

        for resource in resources {
            self.store
                .drop_resource(&resource)
                .await
                .map_err(|e| purge_failed(request, &resource, e.to_string()))?;
            info!(resource = %resource, "资源已清除");
            outcome.dropped.push(resource);
        }

        Ok(outcome)
    }
}

fn purge_failed(request: &PurgeRequest, resource: &ResourceRef, reason: String) -> CoreError {
    CoreError::PurgeFailed {
        module_id: request.module_id.clone(),
        resource: resource.to_string(),
        reason,
    }
}
