// ==========================================
// 商品导入系统 - 导入模块错误类型
// ==========================================
// 分类:
// - 文件级致命错误（ImportError）: 整个文件中止，由编排器收尾为 error
// - 行级错误（RowError）: 只影响当前行，记录后继续解析
// 工具: thiserror 派生宏
// ==========================================

use crate::repository::RepositoryError;
use thiserror::Error;

/// 文件级致命错误
///
/// Display 文本会原样写入 import_files.last_error
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("Invalid CSV header")]
    InvalidHeader { expected: String, found: String },

    #[error("File not readable: {0}")]
    FileNotReadable(String),

    #[error("Failed to open file: {0}")]
    FileOpenFailed(String),

    #[error("CSV read failed: {0}")]
    CsvReadError(String),

    // ===== 存储错误 =====
    #[error("Storage failure: {0}")]
    Storage(#[from] RepositoryError),

    // ===== 配置错误 =====
    #[error("Invalid configuration (key: {key}): {message}")]
    ConfigError { key: String, message: String },
}

impl ImportError {
    pub fn is_invalid_header(&self) -> bool {
        matches!(self, ImportError::InvalidHeader { .. })
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvReadError(err.to_string())
    }
}

/// 行级校验错误（按校验顺序排列，先命中者生效）
///
/// Display 文本即写入 import_errors.message 的内容
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowError {
    #[error("Invalid column count")]
    InvalidColumnCount,

    #[error("external_id is required")]
    ExternalIdRequired,

    #[error("name is required")]
    NameRequired,

    #[error("price must be a number > 0")]
    InvalidPrice,

    #[error("stock must be an integer >= 0")]
    InvalidStock,

    #[error("active must be true|false")]
    InvalidActive,
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_error_message_is_stable() {
        let err = ImportError::InvalidHeader {
            expected: "external_id;name;price;stock;active".to_string(),
            found: "id;name".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid CSV header");
        assert!(err.is_invalid_header());
    }

    #[test]
    fn test_storage_error_wraps_repository_error() {
        let err: ImportError = RepositoryError::LockError("poisoned".to_string()).into();
        assert!(!err.is_invalid_header());
        assert!(err.to_string().starts_with("Storage failure:"));
    }
}
