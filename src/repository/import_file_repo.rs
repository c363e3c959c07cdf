// ==========================================
// 商品导入系统 - 导入文件登记仓储
// ==========================================
// 职责: 共享待导入队列（发现 / 认领 / 收尾 / 租约回收）
// 红线: 认领必须是单个原子单元，任意时刻每个文件至多一个持有者
// 约束: 所有查询使用参数化
// ==========================================
// SQLite 无行锁，SKIP LOCKED 的等价实现:
// - BEGIN IMMEDIATE 获取写锁（同一时刻仅一个认领事务）
// - 条件 UPDATE 作为 CAS（状态/尝试次数在更新时再次校验）
// - SQLITE_BUSY 视为锁竞争，有限次重试后升级为错误
// ==========================================

use crate::db::{format_timestamp, now_timestamp, open_sqlite_connection, parse_timestamp};
use crate::domain::{ImportFile, ImportFileStatus};
use crate::importer::import_traits::FileRegistry;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// 最大尝试次数（attempts 达到后永不再被认领）
pub const MAX_ATTEMPTS: i64 = 5;

/// 认领事务的最大重试次数
pub const DEFAULT_CLAIM_RETRIES: u32 = 3;

/// 认领重试的基础退避（毫秒，按次数线性增长）
const CLAIM_RETRY_BACKOFF_MS: u64 = 50;

/// 租约超时回收时写入的错误信息
pub const LEASE_EXPIRED_MESSAGE: &str = "lease expired";

const IMPORT_FILE_COLUMNS: &str = "id, file_path, file_size, file_mtime, status, attempts, \
     locked_at, processed_at, last_error, rows_success, rows_failed, created_at, updated_at";

// ==========================================
// ImportFileRepository
// ==========================================
pub struct ImportFileRepository {
    conn: Arc<Mutex<Connection>>,
    max_attempts: i64,
    claim_retries: u32,
}

impl ImportFileRepository {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self::from_connection(Arc::new(Mutex::new(conn))))
    }

    /// 从已有连接创建（同一 worker 内的仓储共享一个连接）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            max_attempts: MAX_ATTEMPTS,
            claim_retries: DEFAULT_CLAIM_RETRIES,
        }
    }

    /// 覆盖尝试上限与认领重试次数
    pub fn with_limits(mut self, max_attempts: i64, claim_retries: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.claim_retries = claim_retries.max(1);
        self
    }

    pub fn max_attempts(&self) -> i64 {
        self.max_attempts
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 单次认领尝试（一个 IMMEDIATE 事务）
    fn try_claim_next(&self) -> RepositoryResult<Option<ImportFile>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // pending 优先于 error，同级按 id（登记顺序）
        let candidate: Option<i64> = tx
            .query_row(
                r#"
                SELECT id
                FROM import_files
                WHERE status IN ('pending', 'error')
                  AND attempts < ?1
                ORDER BY
                  CASE WHEN status = 'pending' THEN 0 ELSE 1 END,
                  id
                LIMIT 1
                "#,
                params![self.max_attempts],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let now = now_timestamp();
        let changed = tx.execute(
            r#"
            UPDATE import_files
            SET status = 'processing',
                locked_at = ?1,
                attempts = attempts + 1,
                updated_at = ?1
            WHERE id = ?2
              AND status IN ('pending', 'error')
              AND attempts < ?3
            "#,
            params![now, id, self.max_attempts],
        )?;

        // 写锁下不会发生；CAS 失败时放弃本次认领
        if changed == 0 {
            return Ok(None);
        }

        let file = tx.query_row(
            &format!("SELECT {} FROM import_files WHERE id = ?1", IMPORT_FILE_COLUMNS),
            params![id],
            map_import_file_row,
        )?;

        tx.commit()?;
        Ok(Some(file))
    }

    /// 按 id 查询
    pub fn find_by_id(&self, id: i64) -> RepositoryResult<Option<ImportFile>> {
        let conn = self.get_conn()?;
        let file = conn
            .query_row(
                &format!("SELECT {} FROM import_files WHERE id = ?1", IMPORT_FILE_COLUMNS),
                params![id],
                map_import_file_row,
            )
            .optional()?;
        Ok(file)
    }

    /// 按文件路径查询
    pub fn find_by_path(&self, file_path: &str) -> RepositoryResult<Option<ImportFile>> {
        let conn = self.get_conn()?;
        let file = conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_files WHERE file_path = ?1",
                    IMPORT_FILE_COLUMNS
                ),
                params![file_path],
                map_import_file_row,
            )
            .optional()?;
        Ok(file)
    }

    /// 全部登记文件（按 id）
    pub fn list_all(&self) -> RepositoryResult<Vec<ImportFile>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_files ORDER BY id",
            IMPORT_FILE_COLUMNS
        ))?;
        let files = stmt
            .query_map([], map_import_file_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }
}

impl FileRegistry for ImportFileRepository {
    /// 扫描目录下的 *.csv 并 INSERT OR IGNORE
    ///
    /// 已登记的路径（包括已 processed 的）保持不变，避免仅因文件仍在磁盘上而重复导入
    fn discover(&self, directory: &Path) -> RepositoryResult<usize> {
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %directory.display(), error = %e, "导入目录不可读，跳过发现");
                return Ok(0);
            }
        };

        // 排序保证登记顺序（即认领顺序）确定
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "csv").unwrap_or(false))
            .collect();
        paths.sort();

        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let now = now_timestamp();
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO import_files (
                    file_path, file_size, file_mtime, status, attempts, created_at, updated_at
                ) VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4)
                "#,
            )?;

            for path in &paths {
                let meta = match std::fs::metadata(path) {
                    Ok(meta) if meta.is_file() => meta,
                    _ => continue,
                };
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);

                inserted += stmt.execute(params![
                    path.to_string_lossy().into_owned(),
                    meta.len() as i64,
                    mtime,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            dir = %directory.display(),
            found = paths.len(),
            inserted,
            "导入目录扫描完成"
        );
        Ok(inserted)
    }

    /// 回收租约超时的 processing 文件
    ///
    /// 置为 error 而非 pending，attempts 不重置：反复崩溃的文件最终会耗尽尝试次数
    fn reclaim_stale(&self, lease_timeout: Duration) -> RepositoryResult<usize> {
        let timeout = chrono::Duration::from_std(lease_timeout).map_err(|e| {
            RepositoryError::FieldValueError {
                field: "lease_timeout".to_string(),
                message: e.to_string(),
            }
        })?;
        let cutoff = format_timestamp(Utc::now() - timeout);

        let conn = self.get_conn()?;
        let reclaimed = conn.execute(
            r#"
            UPDATE import_files
            SET status = 'error',
                last_error = ?1,
                updated_at = ?2
            WHERE status = 'processing'
              AND locked_at IS NOT NULL
              AND locked_at < ?3
            "#,
            params![LEASE_EXPIRED_MESSAGE, now_timestamp(), cutoff],
        )?;

        if reclaimed > 0 {
            info!(reclaimed, cutoff = %cutoff, "回收租约超时的导入文件");
        }
        Ok(reclaimed)
    }

    /// 认领（有限次重试吸收瞬时锁竞争，耗尽后返回错误而非空结果）
    fn claim_next(&self) -> RepositoryResult<Option<ImportFile>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.try_claim_next() {
                Ok(claimed) => return Ok(claimed),
                Err(e) if e.is_contention() && attempt < self.claim_retries => {
                    warn!(attempt, error = %e, "认领事务锁竞争，重试");
                    thread::sleep(Duration::from_millis(CLAIM_RETRY_BACKOFF_MS * attempt as u64));
                }
                Err(e) if e.is_contention() => {
                    return Err(RepositoryError::ClaimContention {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 收尾: 处理完成
    ///
    /// 以认领时的 attempts 作为租约令牌，租约已被回收/重新认领时返回 LeaseLost
    fn mark_processed(
        &self,
        file: &ImportFile,
        rows_success: usize,
        rows_failed: usize,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let now = now_timestamp();
        let changed = conn.execute(
            r#"
            UPDATE import_files
            SET status = 'processed',
                processed_at = ?1,
                last_error = NULL,
                rows_success = ?2,
                rows_failed = ?3,
                updated_at = ?1
            WHERE id = ?4
              AND status = 'processing'
              AND attempts = ?5
            "#,
            params![now, rows_success as i64, rows_failed as i64, file.id, file.attempts],
        )?;

        ensure_lease_held(changed, file)
    }

    fn mark_error(&self, file: &ImportFile, error_message: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            r#"
            UPDATE import_files
            SET status = 'error',
                last_error = ?1,
                updated_at = ?2
            WHERE id = ?3
              AND status = 'processing'
              AND attempts = ?4
            "#,
            params![error_message, now_timestamp(), file.id, file.attempts],
        )?;

        ensure_lease_held(changed, file)
    }
}

fn ensure_lease_held(changed: usize, file: &ImportFile) -> RepositoryResult<()> {
    if changed == 0 {
        warn!(
            import_file_id = file.id,
            attempts = file.attempts,
            "收尾被拒绝: 租约已失效"
        );
        return Err(RepositoryError::LeaseLost {
            id: file.id,
            attempts: file.attempts,
        });
    }
    Ok(())
}

// ==========================================
// 行映射
// ==========================================

fn map_import_file_row(row: &Row) -> rusqlite::Result<ImportFile> {
    let status_raw: String = row.get(4)?;
    let status = ImportFileStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            Box::new(RepositoryError::FieldValueError {
                field: "status".to_string(),
                message: format!("未知状态: {}", status_raw),
            }),
        )
    })?;

    Ok(ImportFile {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_size: row.get(2)?,
        file_mtime: row.get(3)?,
        status,
        attempts: row.get(5)?,
        locked_at: optional_timestamp(row, 6)?,
        processed_at: optional_timestamp(row, 7)?,
        last_error: row.get(8)?,
        rows_success: row.get(9)?,
        rows_failed: row.get(10)?,
        created_at: required_timestamp(row, 11)?,
        updated_at: required_timestamp(row, 12)?,
    })
}

pub(crate) fn optional_timestamp(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| timestamp_error(idx, &raw)),
    }
}

pub(crate) fn required_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| timestamp_error(idx, &raw))
}

fn timestamp_error(idx: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(RepositoryError::FieldValueError {
            field: format!("column#{}", idx),
            message: format!("无法解析时间戳: {}", raw),
        }),
    )
}
