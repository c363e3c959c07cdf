// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、CSV 文件生成、组件装配
// ==========================================
#![allow(dead_code)]

use product_import::config::ImportSettings;
use product_import::db::{ensure_schema, open_sqlite_connection};
use product_import::{
    CsvProductFileParser, ImportErrorRepository, ImportFileRepository, ProductImportWorker,
    ProductRepository,
};
use rusqlite::Connection;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 合法表头
pub const HEADER: &str = "external_id;name;price;stock;active";

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_string_lossy().into_owned();

    let conn = open_sqlite_connection(&db_path)?;
    ensure_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开一个共享连接（同一 worker 内的仓储共用）
pub fn open_shared(db_path: &str) -> Arc<Mutex<Connection>> {
    let conn = open_sqlite_connection(db_path).expect("打开测试数据库失败");
    Arc::new(Mutex::new(conn))
}

/// 在目录下写入 CSV 文件
pub fn write_csv(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("写入测试 CSV 失败");
    path
}

/// 由表头 + 数据行拼出 CSV 内容
pub fn csv_with_rows(rows: &[&str]) -> String {
    let mut contents = String::from(HEADER);
    contents.push('\n');
    for row in rows {
        contents.push_str(row);
        contents.push('\n');
    }
    contents
}

pub type TestWorker = ProductImportWorker<
    ImportFileRepository,
    ProductRepository,
    CsvProductFileParser<ImportErrorRepository>,
>;

/// 装配一个使用真实 SQLite 的导入 worker
pub fn build_worker(db_path: &str, import_dir: &Path, batch_size: usize) -> TestWorker {
    let conn = open_shared(db_path);
    let settings = ImportSettings {
        import_dir: import_dir.to_path_buf(),
        batch_size,
        ..ImportSettings::default()
    };

    let registry = ImportFileRepository::from_connection(conn.clone())
        .with_limits(settings.max_attempts, settings.claim_retries);
    let products = ProductRepository::from_connection(conn.clone());
    let parser = CsvProductFileParser::new(ImportErrorRepository::from_connection(conn));

    ProductImportWorker::new(registry, products, parser, settings)
}
