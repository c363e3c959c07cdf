// ==========================================
// 商品导入系统 - 导入层
// ==========================================
// 职责: CSV 文件 → 校验 → 批次 → 商品表
// 组成: 行校验 / 批次解析 / 编排循环 + 协作接口
// ==========================================

// 模块声明
pub mod error;
pub mod file_parser;
pub mod import_traits;
pub mod import_worker;
pub mod row_validator;

// 重导出核心类型
pub use error::{ImportError, ImportResult, RowError};
pub use file_parser::{CsvProductFileParser, ProductBatches, DEFAULT_BATCH_SIZE};
pub use import_worker::{ProductImportWorker, RunSummary};

// 重导出 Trait 接口
pub use import_traits::{BatchParser, BatchStream, ErrorSink, FileRegistry, ProductStore};
