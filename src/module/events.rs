//! 生命周期事件
//!
//! 管理器在每个模块完成安装、激活、停用、卸载或更新后发布事件。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::generate_id;

/// 事件发送方
pub const EVENT_SENDER: &str = "app_manager";

/// 事件类型常量
pub mod lifecycle_events {
    /// 模块已安装
    pub const MODULE_INSTALLED: &str = "apps.module.installed";
    /// 模块已激活
    pub const MODULE_ACTIVATED: &str = "apps.module.activated";
    /// 模块已停用
    pub const MODULE_DEACTIVATED: &str = "apps.module.deactivated";
    /// 模块已卸载
    pub const MODULE_UNINSTALLED: &str = "apps.module.uninstalled";
    /// 模块已更新
    pub const MODULE_UPDATED: &str = "apps.module.updated";
}

/// 生命周期事件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEventKind {
    Installed,
    Activated,
    Deactivated,
    Uninstalled,
    Updated,
}

impl LifecycleEventKind {
    /// 事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEventKind::Installed => lifecycle_events::MODULE_INSTALLED,
            LifecycleEventKind::Activated => lifecycle_events::MODULE_ACTIVATED,
            LifecycleEventKind::Deactivated => lifecycle_events::MODULE_DEACTIVATED,
            LifecycleEventKind::Uninstalled => lifecycle_events::MODULE_UNINSTALLED,
            LifecycleEventKind::Updated => lifecycle_events::MODULE_UPDATED,
        }
    }
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

/// 生命周期事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// 事件唯一标识（10 位 62 进制）
    pub event_id: String,
    pub kind: LifecycleEventKind,
    pub sender: String,
    pub module_id: String,
    /// 事件发生时模块的版本
    pub version: String,
    /// 附加数据
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleEventKind, module_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            event_id: generate_id(),
            kind,
            sender: EVENT_SENDER.to_string(),
            module_id: module_id.into(),
            version: version.into(),
            data: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

/// 事件发布函数
pub type EventPublisher = Arc<dyn Fn(LifecycleEvent) -> BoxFuture<'static, ()> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::id::is_valid_id;

    #[test]
    fn test_event_creation() {
        let event = LifecycleEvent::new(LifecycleEventKind::Installed, "forms", "1.0.0")
            .with_data(serde_json::json!({"auto_activate": true}));

        assert!(is_valid_id(&event.event_id));
        assert_eq!(event.event_type(), "apps.module.installed");
        assert_eq!(event.sender, EVENT_SENDER);
        assert_eq!(event.data["auto_activate"], true);
    }

    #[test]
    fn test_event_serialization() {
        let event = LifecycleEvent::new(LifecycleEventKind::Updated, "forms", "1.1.0");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "updated");

        let parsed: LifecycleEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }
}
