// ==========================================
// 商品导入系统 - 领域类型定义
// ==========================================
// 依据: import_files.status 字段取值
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 导入文件状态 (Import File Status)
// ==========================================
// 流转: pending → processing → {processed | error}
// error 可被再次认领回到 processing（受最大尝试次数约束）
// 序列化格式: 全小写 (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportFileStatus {
    Pending,    // 待处理
    Processing, // 处理中（已被某个 worker 认领）
    Processed,  // 处理完成
    Error,      // 处理失败（可重试）
}

impl ImportFileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportFileStatus::Pending => "pending",
            ImportFileStatus::Processing => "processing",
            ImportFileStatus::Processed => "processed",
            ImportFileStatus::Error => "error",
        }
    }

    /// 从数据库字符串解析状态
    ///
    /// 未知取值返回 None，由调用方决定如何处理
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(ImportFileStatus::Pending),
            "processing" => Some(ImportFileStatus::Processing),
            "processed" => Some(ImportFileStatus::Processed),
            "error" => Some(ImportFileStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ImportFileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
