// ==========================================
// 商品导入系统 - 导入流程协作接口
// ==========================================
// 职责: 定义编排器依赖的协作者接口（不包含实现）
// 实现者:
// - FileRegistry  → ImportFileRepository
// - ErrorSink     → ImportErrorRepository
// - ProductStore  → ProductRepository
// - BatchParser   → CsvProductFileParser
// ==========================================

use crate::domain::{ImportFile, ParseCounters, ProductRecord};
use crate::importer::error::ImportResult;
use crate::repository::RepositoryResult;
use std::path::Path;
use std::time::Duration;

// ==========================================
// FileRegistry Trait
// ==========================================
// 用途: 共享的待导入文件队列 + 租约式认领协议
pub trait FileRegistry: Send + Sync {
    /// 扫描目录并登记新文件（已存在的路径保持不变）
    ///
    /// # 返回
    /// - Ok(usize): 新登记的文件数
    /// - 目录不存在/不可读 → Ok(0)
    fn discover(&self, directory: &Path) -> RepositoryResult<usize>;

    /// 回收租约超时的 processing 文件（置为 error，attempts 不变）
    fn reclaim_stale(&self, lease_timeout: Duration) -> RepositoryResult<usize>;

    /// 原子地认领下一个文件
    ///
    /// # 返回
    /// - Ok(Some(file)): 已认领（status=processing, attempts+1, locked_at=now）
    /// - Ok(None): 没有可认领的文件
    /// - Err: 重试耗尽或数据库故障
    fn claim_next(&self) -> RepositoryResult<Option<ImportFile>>;

    /// 收尾: 处理完成
    fn mark_processed(
        &self,
        file: &ImportFile,
        rows_success: usize,
        rows_failed: usize,
    ) -> RepositoryResult<()>;

    /// 收尾: 处理失败（attempts 保持认领时的递增结果）
    fn mark_error(&self, file: &ImportFile, error_message: &str) -> RepositoryResult<()>;
}

// ==========================================
// ErrorSink Trait
// ==========================================
// 用途: 持久化表头/行校验失败，按 (file, line, message) 去重
pub trait ErrorSink: Send + Sync {
    /// 记录表头错误（固定第 1 行）
    ///
    /// # 返回
    /// - Ok(true): 新增记录
    /// - Ok(false): 已存在相同记录
    fn log_header_error(
        &self,
        import_file_id: i64,
        raw_header: &str,
        expected_header: &str,
    ) -> RepositoryResult<bool>;

    /// 记录行错误
    fn log_line_error(
        &self,
        import_file_id: i64,
        line_number: u64,
        external_id: Option<&str>,
        message: &str,
        raw_line: &str,
    ) -> RepositoryResult<bool>;
}

// ==========================================
// ProductStore Trait
// ==========================================
// 用途: 按 external_id 幂等批量 upsert（冲突时后写覆盖）
pub trait ProductStore: Send + Sync {
    /// # 返回
    /// - Ok(usize): 本批写入（插入或更新）的记录数
    fn upsert_many(&self, records: &[ProductRecord]) -> RepositoryResult<usize>;
}

// ==========================================
// BatchStream Trait
// ==========================================
// 用途: 单次、只进的批次序列；counters() 在序列耗尽后代表整个文件
pub trait BatchStream: Iterator<Item = ImportResult<Vec<ProductRecord>>> {
    fn counters(&self) -> ParseCounters;
}

// ==========================================
// BatchParser Trait
// ==========================================
// 用途: 打开文件、校验表头，返回惰性批次序列
pub trait BatchParser: Send + Sync {
    /// # 返回
    /// - Ok(stream): 表头合法，可开始消费批次
    /// - Err(ImportError::InvalidHeader): 表头不匹配（已写入一条表头错误）
    /// - Err(FileNotReadable / FileOpenFailed): 文件不可读或打开失败
    fn parse<'a>(
        &'a self,
        path: &Path,
        import_file_id: i64,
        batch_size: usize,
    ) -> ImportResult<Box<dyn BatchStream + 'a>>;
}
