// ==========================================
// 商品导入系统 - 商品仓储
// ==========================================
// 职责: 按 external_id 幂等批量 upsert
// 红线: 一批在一个事务内写入，冲突时后写覆盖 name/price/stock/active
// ==========================================

use crate::db::{format_timestamp, open_sqlite_connection};
use crate::domain::ProductRecord;
use crate::importer::import_traits::ProductStore;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::import_file_repo::required_timestamp;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub struct ProductRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProductRepository {
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

    /// 按 external_id 查询
    pub fn find_by_external_id(&self, external_id: &str) -> RepositoryResult<Option<ProductRecord>> {
        let conn = self.get_conn()?;
        let record = conn
            .query_row(
                r#"
                SELECT external_id, name, price, stock, active, created_at, updated_at
                FROM products
                WHERE external_id = ?1
                "#,
                params![external_id],
                |row| {
                    Ok(ProductRecord {
                        external_id: row.get(0)?,
                        name: row.get(1)?,
                        price: row.get(2)?,
                        stock: row.get(3)?,
                        active: row.get::<_, i64>(4)? != 0,
                        created_at: required_timestamp(row, 5)?,
                        updated_at: required_timestamp(row, 6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn count(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl ProductStore for ProductRepository {
    /// 批量 upsert（事务 + 预编译语句）
    ///
    /// created_at 仅在首次插入时写入；更新只刷新 updated_at
    fn upsert_many(&self, records: &[ProductRecord]) -> RepositoryResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO products (
                    external_id, name, price, stock, active, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(external_id) DO UPDATE SET
                    name = excluded.name,
                    price = excluded.price,
                    stock = excluded.stock,
                    active = excluded.active,
                    updated_at = excluded.updated_at
                "#,
            )?;

            for record in records {
                written += stmt.execute(params![
                    record.external_id,
                    record.name,
                    record.price,
                    record.stock,
                    record.active as i64,
                    format_timestamp(record.created_at),
                    format_timestamp(record.updated_at),
                ])?;
            }
        }
        tx.commit()?;

        debug!(batch = records.len(), written, "商品批次已写入");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, ensure_schema};
    use chrono::{Duration, Utc};

    fn memory_repo() -> ProductRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        ProductRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn record(external_id: &str, name: &str, price: f64, stock: i64, active: bool) -> ProductRecord {
        let now = Utc::now();
        ProductRecord {
            external_id: external_id.to_string(),
            name: name.to_string(),
            price,
            stock,
            active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_empty_batch_writes_nothing() {
        let repo = memory_repo();
        assert_eq!(repo.upsert_many(&[]).unwrap(), 0);
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_upsert_inserts_then_overwrites() {
        let repo = memory_repo();
        let first = record("E200", "Lamp", 19.9, 5, true);
        assert_eq!(repo.upsert_many(&[first.clone()]).unwrap(), 1);

        let mut second = record("E200", "Desk Lamp", 24.5, 0, false);
        second.created_at = first.created_at + Duration::days(1);
        second.updated_at = first.updated_at + Duration::days(1);
        repo.upsert_many(&[second.clone()]).unwrap();

        assert_eq!(repo.count().unwrap(), 1);
        let stored = repo.find_by_external_id("E200").unwrap().unwrap();
        assert_eq!(stored.name, "Desk Lamp");
        assert_eq!(stored.price, 24.5);
        assert_eq!(stored.stock, 0);
        assert!(!stored.active);
        // created_at 保持首次写入
        assert_eq!(
            format_timestamp(stored.created_at),
            format_timestamp(first.created_at)
        );
        assert_eq!(
            format_timestamp(stored.updated_at),
            format_timestamp(second.updated_at)
        );
    }

    #[test]
    fn test_duplicate_ids_in_one_batch_last_wins() {
        let repo = memory_repo();
        let batch = vec![
            record("E1", "first", 1.0, 1, true),
            record("E1", "second", 2.0, 2, true),
            record("E2", "other", 3.0, 3, false),
        ];
        repo.upsert_many(&batch).unwrap();

        assert_eq!(repo.count().unwrap(), 2);
        assert_eq!(repo.find_by_external_id("E1").unwrap().unwrap().name, "second");
        assert!(repo.find_by_external_id("missing").unwrap().is_none());
    }
}
