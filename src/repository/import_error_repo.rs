// ==========================================
// 商品导入系统 - 导入错误仓储
// ==========================================
// 职责: 持久化表头/行校验失败
// 红线: (import_file_id, line_number, message) 唯一，重复写入静默忽略
// ==========================================

use crate::db::{now_timestamp, open_sqlite_connection};
use crate::domain::ImportErrorRecord;
use crate::importer::import_traits::ErrorSink;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::import_file_repo::required_timestamp;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex, MutexGuard};

/// 表头错误固定写在第 1 行
pub const HEADER_LINE_NUMBER: i64 = 1;

/// 表头错误信息（后接期望表头）
pub fn header_error_message(expected_header: &str) -> String {
    format!("Invalid header. Expected: {}", expected_header)
}

pub struct ImportErrorRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ImportErrorRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self::from_connection(Arc::new(Mutex::new(conn))))
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn insert_or_ignore(
        &self,
        import_file_id: i64,
        line_number: i64,
        external_id: Option<&str>,
        message: &str,
        raw_line: Option<&str>,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let now = now_timestamp();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO import_errors (
                import_file_id, line_number, external_id, message, raw_line, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
            params![import_file_id, line_number, external_id, message, raw_line, now],
        )?;
        Ok(inserted == 1)
    }

    /// 查询某文件的全部错误（按行号）
    pub fn list_by_file(&self, import_file_id: i64) -> RepositoryResult<Vec<ImportErrorRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, import_file_id, line_number, external_id, message, raw_line,
                   created_at, updated_at
            FROM import_errors
            WHERE import_file_id = ?1
            ORDER BY line_number, id
            "#,
        )?;
        let records = stmt
            .query_map(params![import_file_id], map_import_error_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count_by_file(&self, import_file_id: i64) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM import_errors WHERE import_file_id = ?1",
            params![import_file_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl ErrorSink for ImportErrorRepository {
    fn log_header_error(
        &self,
        import_file_id: i64,
        raw_header: &str,
        expected_header: &str,
    ) -> RepositoryResult<bool> {
        self.insert_or_ignore(
            import_file_id,
            HEADER_LINE_NUMBER,
            None,
            &header_error_message(expected_header),
            Some(raw_header),
        )
    }

    fn log_line_error(
        &self,
        import_file_id: i64,
        line_number: u64,
        external_id: Option<&str>,
        message: &str,
        raw_line: &str,
    ) -> RepositoryResult<bool> {
        self.insert_or_ignore(
            import_file_id,
            line_number as i64,
            external_id,
            message,
            Some(raw_line),
        )
    }
}

fn map_import_error_row(row: &Row) -> rusqlite::Result<ImportErrorRecord> {
    Ok(ImportErrorRecord {
        id: row.get(0)?,
        import_file_id: row.get(1)?,
        line_number: row.get(2)?,
        external_id: row.get(3)?,
        message: row.get(4)?,
        raw_line: row.get(5)?,
        created_at: required_timestamp(row, 6)?,
        updated_at: required_timestamp(row, 7)?,
    })
}
