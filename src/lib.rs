// ==========================================
// 商品导入系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + csv
// 系统定位: 多 worker 共享文件队列的商品 CSV 导入
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 解析与编排
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::ImportFileStatus;

// 领域实体
pub use domain::{ImportErrorRecord, ImportFile, ParseCounters, ProductRecord};

// 仓储
pub use repository::{
    ImportErrorRepository, ImportFileRepository, ProductRepository, RepositoryError,
    RepositoryResult,
};

// 导入
pub use importer::{
    CsvProductFileParser, ImportError, ImportResult, ProductImportWorker, RowError, RunSummary,
};

// 配置
pub use config::{ConfigManager, ImportConfigReader, ImportSettings, SettingsOverrides};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "商品导入系统";
