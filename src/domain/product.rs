// ==========================================
// 商品导入系统 - 商品领域模型
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 通过校验的一行商品数据
///
/// 由解析器产出、商品仓储消费；持久化仅以 external_id 作为 upsert 键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub external_id: String,
    pub name: String,
    pub price: f64,   // 严格大于 0
    pub stock: i64,   // 非负整数
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 单个文件的行级计数
///
/// 只有在批次序列被完整消费后才代表整个文件的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseCounters {
    pub success: usize,
    pub failed: usize,
}
