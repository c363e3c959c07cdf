// ==========================================
// 商品导入系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入流程所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::repository::RepositoryResult;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入流程所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
// 约定: 缺失或格式错误的值回落到默认值，仅存储故障返回 Err
pub trait ImportConfigReader: Send + Sync {
    /// 获取导入目录
    ///
    /// # 默认值
    /// - /imports/products
    fn get_import_dir(&self) -> RepositoryResult<String>;

    /// 获取每批次最大记录数
    ///
    /// # 默认值
    /// - 1000
    fn get_batch_size(&self) -> RepositoryResult<usize>;

    /// 获取单个文件的最大认领次数
    ///
    /// # 默认值
    /// - 5
    fn get_max_attempts(&self) -> RepositoryResult<i64>;

    /// 获取认领事务锁竞争时的重试次数
    ///
    /// # 默认值
    /// - 3
    fn get_claim_retries(&self) -> RepositoryResult<u32>;

    /// 获取 processing 租约超时（秒，0 表示不回收）
    ///
    /// # 默认值
    /// - 1800
    fn get_lease_timeout_secs(&self) -> RepositoryResult<u64>;
}
