//! Chips App Manager 命令行入口
//!
//! 在本地清单目录和注册表文件上执行模块生命周期操作。
//!
//! # 命令概览
//!
//! - `install` - 安装模块及其依赖
//! - `activate` / `deactivate` - 激活或停用模块
//! - `uninstall` - 卸载模块
//! - `update` / `check-updates` - 更新模块
//! - `list` / `status` / `can-uninstall` - 查询
//! - `check-config` - 验证配置与清单
//!
//! # 使用示例
//!
//! ```bash
//! # 安装模块（自动安装依赖）
//! chips-apps -m ./modules -r ./data/registry.json install forms
//!
//! # 强制卸载并清除数据
//! chips-apps -c apps.yaml uninstall core --force --purge
//!
//! # 检查配置文件
//! chips-apps check-config -c apps.yaml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use chips_app_manager::module::{ManifestCatalog, ManifestParser, ManifestProvider};
use chips_app_manager::{
    HookRegistry, InstallOptions, Logger, LoggerConfig, ManagerConfig, ModuleManager,
    UninstallOptions,
};

/// Chips App Manager - 薯片应用模块管理
#[derive(Parser)]
#[command(name = "chips-apps")]
#[command(version, about = "薯片应用模块生命周期管理", long_about = None)]
#[command(author = "Chips Team")]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "apps.yaml", global = true)]
    config: PathBuf,

    /// 清单目录（可多次指定，追加到配置中的目录之后）
    #[arg(short, long = "manifest-dir", global = true)]
    manifest_dirs: Vec<PathBuf>,

    /// 注册表文件路径
    #[arg(short, long, global = true)]
    registry: Option<PathBuf>,

    /// 模块数据目录
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 安装模块
    ///
    /// 按依赖顺序安装模块及其尚未安装的依赖。
    Install {
        /// 模块 ID
        module_id: String,

        /// 安装后不激活
        #[arg(long)]
        no_activate: bool,

        /// 不解析依赖，要求依赖已安装
        #[arg(long)]
        skip_dependencies: bool,
    },

    /// 激活模块
    Activate {
        /// 模块 ID
        module_id: String,
    },

    /// 停用模块
    Deactivate {
        /// 模块 ID
        module_id: String,
    },

    /// 卸载模块
    ///
    /// 存在依赖者时需要 --force 才会级联卸载。
    Uninstall {
        /// 模块 ID
        module_id: String,

        /// 级联卸载所有依赖者
        #[arg(long)]
        force: bool,

        /// 清除模块数据
        #[arg(long, conflicts_with = "keep_data")]
        purge: bool,

        /// 保留模块数据
        #[arg(long)]
        keep_data: bool,
    },

    /// 更新模块到清单目录中的版本
    Update {
        /// 模块 ID
        module_id: String,
    },

    /// 列出可更新的模块
    CheckUpdates,

    /// 列出已安装的模块
    List,

    /// 查看模块状态
    Status {
        /// 模块 ID
        module_id: String,
    },

    /// 查看阻止卸载的模块
    CanUninstall {
        /// 模块 ID
        module_id: String,
    },

    /// 验证配置文件与清单目录
    CheckConfig,
}

/// 加载配置并应用命令行覆盖
async fn load_config(cli: &Cli) -> Result<ManagerConfig, Box<dyn std::error::Error>> {
    let mut config = if cli.config.exists() {
        ManagerConfig::from_file(&cli.config).await?
    } else {
        ManagerConfig::default()
    };

    config.modules.manifest_dirs.extend(cli.manifest_dirs.iter().cloned());
    if let Some(ref registry) = cli.registry {
        config.modules.registry_path = Some(registry.clone());
    }
    if let Some(ref data_dir) = cli.data_dir {
        config.modules.data_dir = Some(data_dir.clone());
    }
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }

    Ok(config)
}

/// 检查配置与清单
async fn check_config(config: &ManagerConfig) -> Result<(), Box<dyn std::error::Error>> {
    match config.config_path {
        Some(ref path) => println!("配置文件: {}", path.display()),
        None => println!("⚠️  配置文件不存在，使用默认配置"),
    }
    println!();
    println!("────────────────────────────────────────");
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!();
    println!("  [模块配置]");
    println!("    清单目录:       {:?}", config.modules.manifest_dirs);
    println!("    注册表:         {:?}", config.modules.registry_path);
    println!("    数据目录:       {:?}", config.modules.data_dir);
    println!("    备份目录:       {:?}", config.modules.effective_backup_dir());
    println!("    自动激活:       {}", if config.modules.auto_activate { "是" } else { "否" });
    println!("────────────────────────────────────────");

    let catalog = ManifestCatalog::with_dirs(config.modules.manifest_dirs.clone());
    let count = catalog.reload().await?;
    println!();
    println!("已加载 {} 个模块清单", count);

    let manifests = catalog.list();
    let mut problems = 0;
    for manifest in &manifests {
        if let Err(e) = ManifestParser::validate(manifest) {
            println!("❌ {}", e);
            problems += 1;
        }
    }

    // 命令行没有内置钩子，声明了钩子的模块无法安装
    let hooks = HookRegistry::new();
    for (module_id, phase, entry) in hooks.unresolved(&manifests).await {
        println!("⚠️  模块 '{}' 的 {} 钩子 '{}' 未注册", module_id, phase, entry);
    }

    if problems == 0 {
        println!("✅ 配置有效！");
        Ok(())
    } else {
        Err(format!("{} 个清单无效", problems).into())
    }
}

fn print_entry(entry: &chips_app_manager::RegistryEntry) {
    println!(
        "  {:<24} {:<10} {:<10} {}",
        entry.module_id,
        entry.version,
        entry.status,
        entry.installed_at.format("%Y-%m-%d %H:%M:%S")
    );
}

/// 执行生命周期命令
async fn run(command: Commands, config: ManagerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let _guard = Logger::try_init(LoggerConfig::from_log_config(&config.logging));
    if let Some(ref path) = config.config_path {
        info!("已加载配置文件: {}", path.display());
    }

    let manager = ModuleManager::from_config(config.modules, Arc::new(HookRegistry::new())).await?;

    match command {
        Commands::Install {
            module_id,
            no_activate,
            skip_dependencies,
        } => {
            let mut options = InstallOptions::new();
            if no_activate {
                options = options.auto_activate(false);
            }
            if skip_dependencies {
                options = options.skip_dependencies();
            }
            let report = manager.install(&module_id, options).await?;
            println!("已安装: {:?}", report.installed);
            if !report.skipped.is_empty() {
                println!("已存在: {:?}", report.skipped);
            }
            if !report.activated.is_empty() {
                println!("已激活: {:?}", report.activated);
            }
        }

        Commands::Activate { module_id } => {
            manager.activate(&module_id).await?;
            println!("✅ 模块 '{}' 已激活", module_id);
        }

        Commands::Deactivate { module_id } => {
            manager.deactivate(&module_id).await?;
            println!("✅ 模块 '{}' 已停用", module_id);
        }

        Commands::Uninstall {
            module_id,
            force,
            purge,
            keep_data,
        } => {
            let mut options = UninstallOptions::new();
            if force {
                options = options.force();
            }
            if purge {
                options = options.purge_data(true);
            } else if keep_data {
                options = options.purge_data(false);
            }

            let report = manager.uninstall(&module_id, options).await?;
            if report.is_empty() {
                println!("模块 '{}' 未安装", module_id);
            } else {
                println!("已卸载: {:?}", report.removed);
                for verification in &report.purged {
                    println!(
                        "  {} 清除 {} 个资源，跳过 {} 个不存在的资源",
                        verification.module_id,
                        verification.verified().len(),
                        verification.missing().len()
                    );
                }
                for backup in &report.backups {
                    println!("  备份: {}", backup);
                }
            }
        }

        Commands::Update { module_id } => {
            let entry = manager.update(&module_id).await?;
            println!("✅ 模块 '{}' 已更新到 {}", module_id, entry.version);
        }

        Commands::CheckUpdates => {
            let updates = manager.check_updates().await;
            if updates.is_empty() {
                println!("所有模块均为最新版本");
            }
            for update in updates {
                println!("  {:<24} {} -> {}", update.module_id, update.installed, update.available);
            }
        }

        Commands::List => {
            let entries = manager.list_installed().await;
            println!("已安装模块 ({})", entries.len());
            println!("═══════════════════════════════════════");
            for entry in &entries {
                print_entry(entry);
            }
        }

        Commands::Status { module_id } => match manager.get_status(&module_id).await {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => println!("模块 '{}' 未安装", module_id),
        },

        Commands::CanUninstall { module_id } => {
            let blocking = manager.can_uninstall(&module_id).await;
            if blocking.is_empty() {
                println!("✅ 模块 '{}' 可以直接卸载", module_id);
            } else {
                println!("⚠️  以下模块依赖 '{}': {:?}", module_id, blocking);
            }
        }

        Commands::CheckConfig => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli).await?;

    match cli.command {
        Commands::CheckConfig => check_config(&config).await,
        command => run(command, config).await,
    }
}
