// ==========================================
// 商品导入系统 - 配置层
// ==========================================
// 职责: 导入参数管理，支持命令行覆写
// 存储: config_kv 表
// 优先级: 命令行 > config_kv > 内置默认值
// ==========================================

pub mod config_manager;
pub mod import_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager, ImportSettings, SettingsOverrides};
pub use import_config_trait::ImportConfigReader;
