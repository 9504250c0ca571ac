//! 配置加载集成测试
//!
//! 测试配置文件加载、合并以及基于配置创建管理器

use chips_app_manager::{ManagerConfig, ModuleManager};
use std::sync::Arc;
use tempfile::TempDir;

/// 测试 YAML 配置加载
#[tokio::test]
async fn test_yaml_config_loading() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("apps.yaml");
    tokio::fs::write(
        &config_path,
        r#"
logging:
  level: debug
  json_format: true
modules:
  manifest_dirs:
    - ./modules
    - ./vendor/modules
  registry_path: ./data/registry.json
  data_dir: ./data/modules
  auto_activate: false
"#,
    )
    .await
    .unwrap();

    let config = ManagerConfig::from_file(&config_path).await.unwrap();

    assert_eq!(config.config_path.as_deref(), Some(config_path.as_path()));
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json_format);
    assert_eq!(config.modules.manifest_dirs.len(), 2);
    assert!(!config.modules.auto_activate);
    // 未配置备份目录时使用数据目录下的 .backup
    assert_eq!(
        config.modules.effective_backup_dir().unwrap(),
        std::path::Path::new("./data/modules/.backup")
    );
}

/// 测试 JSON 配置格式
#[tokio::test]
async fn test_json_config_format() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("apps.json");
    tokio::fs::write(
        &config_path,
        r#"{"modules": {"registry_path": "/var/lib/chips/registry.json"}}"#,
    )
    .await
    .unwrap();

    let config = ManagerConfig::from_file(&config_path).await.unwrap();
    assert_eq!(config.logging.level, "info");
    assert!(config.modules.auto_activate);
    assert!(config.modules.registry_path.is_some());
}

/// 测试无效配置
#[tokio::test]
async fn test_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("broken.yaml");
    tokio::fs::write(&config_path, "modules: [not, a, map]")
        .await
        .unwrap();

    assert!(ManagerConfig::from_file(&config_path).await.is_err());
    assert!(ManagerConfig::from_file(temp_dir.path().join("missing.yaml"))
        .await
        .is_err());
}

/// 测试配置合并
#[tokio::test]
async fn test_config_merge_overrides() {
    let mut base = ManagerConfig::builder()
        .manifest_dir("/opt/chips/modules")
        .registry_path("/opt/chips/registry.json")
        .build();
    let overrides = ManagerConfig::builder()
        .manifest_dir("./local-modules")
        .log_level("trace")
        .auto_activate(false)
        .build();

    base.merge(overrides);

    assert_eq!(base.modules.manifest_dirs.len(), 2);
    assert_eq!(base.logging.level, "trace");
    assert!(!base.modules.auto_activate);
    assert!(base.modules.registry_path.is_some());
}

/// 测试基于配置创建管理器
#[tokio::test]
async fn test_manager_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let module_dir = temp_dir.path().join("modules").join("blog");
    tokio::fs::create_dir_all(&module_dir).await.unwrap();
    tokio::fs::write(
        module_dir.join("module.yaml"),
        "id: blog\nname: Blog\nversion: 0.3.0\n",
    )
    .await
    .unwrap();
    // 无效清单被跳过
    let broken_dir = temp_dir.path().join("modules").join("broken");
    tokio::fs::create_dir_all(&broken_dir).await.unwrap();
    tokio::fs::write(broken_dir.join("module.yaml"), "id: broken\nversion: latest\n")
        .await
        .unwrap();

    let config = ManagerConfig::builder()
        .manifest_dir(temp_dir.path().join("modules"))
        .registry_path(temp_dir.path().join("registry.json"))
        .build();

    let manager = ModuleManager::from_config(config.modules, Arc::default())
        .await
        .unwrap();

    assert_eq!(manager.manifests().list().len(), 1);
    assert!(manager.manifests().contains("blog"));
    assert!(manager.list_installed().await.is_empty());
}
