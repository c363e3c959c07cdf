// ==========================================
// 商品导入系统 - 命令行入口
// ==========================================
// 用法: product-import [--max-files N] [--workers N] [--dir DIR] [--db PATH]
// 退出码: 所有 worker 循环正常结束即为 0（与单个文件成败无关）
// ==========================================

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use product_import::config::{ConfigManager, ImportSettings, SettingsOverrides};
use product_import::db::{ensure_schema, open_sqlite_connection, read_schema_version};
use product_import::{
    logging, CsvProductFileParser, ImportErrorRepository, ImportFileRepository,
    ProductImportWorker, ProductRepository, RunSummary,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "product-import")]
#[command(about = "Claim pending product CSV files and import them in batches")]
#[command(version)]
struct Cli {
    /// Maximum number of files each worker claims in this run
    #[arg(long, default_value_t = 20)]
    max_files: usize,

    /// Import directory (overrides config_kv `import_dir`)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// SQLite database path (default: $PRODUCT_IMPORT_DB_PATH or the user data dir)
    #[arg(long)]
    db: Option<String>,

    /// Rows per upsert batch (overrides config_kv `batch_size`)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Number of concurrent worker loops
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Print run summaries as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Enable debug logging for this crate
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            import_dir: self.dir.clone(),
            batch_size: self.batch_size,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志系统
    if cli.log_json {
        logging::init_json(cli.verbose);
    } else {
        logging::init(cli.verbose);
    }

    let db_path = cli.db.clone().unwrap_or_else(get_default_db_path);
    info!(
        version = product_import::VERSION,
        db_path = %db_path,
        workers = cli.workers,
        max_files = cli.max_files,
        "{} 启动",
        product_import::APP_NAME
    );

    // 建表（幂等）
    {
        let conn = open_sqlite_connection(&db_path)
            .with_context(|| format!("无法打开数据库: {}", db_path))?;
        ensure_schema(&conn).context("初始化数据库结构失败")?;
        let schema_version = read_schema_version(&conn)?;
        info!(schema_version = ?schema_version, "数据库结构就绪");
    }

    let config = ConfigManager::new(&db_path).context("无法初始化配置管理器")?;
    let settings =
        ImportSettings::load(&config, &cli.overrides()).context("导入配置无效")?;

    // 每个 worker 独立连接，在阻塞线程池上并发运行
    let workers = cli.workers.max(1);
    let handles = (0..workers).map(|worker_index| {
        let db_path = db_path.clone();
        let settings = settings.clone();
        let max_files = cli.max_files;
        tokio::task::spawn_blocking(move || run_worker(worker_index, &db_path, settings, max_files))
    });

    let mut summaries = Vec::with_capacity(workers);
    let mut failed_workers = 0;
    for (worker_index, joined) in join_all(handles).await.into_iter().enumerate() {
        match joined {
            Ok(Ok(summary)) => summaries.push(summary),
            Ok(Err(e)) => {
                error!(worker = worker_index, error = %format!("{:#}", e), "worker 运行失败");
                failed_workers += 1;
            }
            Err(e) => {
                error!(worker = worker_index, error = %e, "worker 线程异常退出");
                failed_workers += 1;
            }
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    }

    if failed_workers > 0 {
        anyhow::bail!("{} 个 worker 运行失败", failed_workers);
    }
    Ok(())
}

/// 单个 worker: 一个连接，仓储共享该连接
fn run_worker(
    worker_index: usize,
    db_path: &str,
    settings: ImportSettings,
    max_files: usize,
) -> Result<RunSummary> {
    let conn = open_sqlite_connection(db_path)
        .with_context(|| format!("worker #{} 无法打开数据库", worker_index))?;
    let conn = Arc::new(Mutex::new(conn));

    let registry = ImportFileRepository::from_connection(conn.clone())
        .with_limits(settings.max_attempts, settings.claim_retries);
    let product_store = ProductRepository::from_connection(conn.clone());
    let parser = CsvProductFileParser::new(ImportErrorRepository::from_connection(conn));

    let worker = ProductImportWorker::new(registry, product_store, parser, settings);
    let summary = worker
        .run(max_files)
        .with_context(|| format!("worker #{} 导入运行中止", worker_index))?;

    info!(
        worker = worker_index,
        run_id = %summary.run_id,
        files_processed = summary.files_processed,
        files_failed = summary.files_failed,
        files_abandoned = summary.files_abandoned,
        rows_upserted = summary.rows_upserted,
        "worker 运行完成"
    );
    Ok(summary)
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 PRODUCT_IMPORT_DB_PATH > 用户数据目录 > 当前目录
fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("PRODUCT_IMPORT_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./product_import.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("product-import");
        // 目录创建失败时由打开数据库时报错
        std::fs::create_dir_all(&dir).ok();
        path = dir.join("product_import.db");
    }

    path.to_string_lossy().into_owned()
}
