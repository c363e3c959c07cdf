// ==========================================
// 商品导入系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体与类型
// 红线: 不含数据访问逻辑
// ==========================================

pub mod import_file;
pub mod product;
pub mod types;

// 重导出核心类型
pub use import_file::{ImportErrorRecord, ImportFile};
pub use product::{ParseCounters, ProductRecord};
pub use types::ImportFileStatus;
