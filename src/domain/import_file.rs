// ==========================================
// 商品导入系统 - 导入文件领域模型
// ==========================================
// 对齐: import_files / import_errors 表
// ==========================================

use crate::domain::types::ImportFileStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// ImportFile - 导入文件登记
// ==========================================
// 红线: file_path 全局唯一; attempts 只增不减
// 用途: 发现时创建，认领/收尾时更新，本系统从不删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportFile {
    pub id: i64,
    pub file_path: String,
    pub file_size: i64,                      // 字节数
    pub file_mtime: i64,                     // 修改时间（unix 秒）
    pub status: ImportFileStatus,
    pub attempts: i64,                       // 已认领次数
    pub locked_at: Option<DateTime<Utc>>,    // 租约时间
    pub processed_at: Option<DateTime<Utc>>, // 完成时间
    pub last_error: Option<String>,
    pub rows_success: i64,
    pub rows_failed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// ImportErrorRecord - 行/表头校验失败记录
// ==========================================
// 红线: (import_file_id, line_number, message) 唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportErrorRecord {
    pub id: i64,
    pub import_file_id: i64,
    pub line_number: i64,        // 1 起始，表头为第 1 行
    pub external_id: Option<String>,
    pub message: String,
    pub raw_line: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
