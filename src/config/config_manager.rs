// ==========================================
// 商品导入系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::db::{configure_sqlite_connection, now_timestamp, open_sqlite_connection};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::DEFAULT_BATCH_SIZE;
use crate::repository::import_file_repo::{DEFAULT_CLAIM_RETRIES, MAX_ATTEMPTS};
use crate::repository::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

/// 默认导入目录
pub const DEFAULT_IMPORT_DIR: &str = "/imports/products";

/// 默认 processing 租约超时（秒）
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 1800;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, ?3)
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, now_timestamp()],
        )?;
        Ok(())
    }

    /// 获取所有 global 配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let config_map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        serde_json::to_string(&config_map).map_err(|e| RepositoryError::FieldValueError {
            field: "config_snapshot".to_string(),
            message: e.to_string(),
        })
    }

    /// 读取并解析配置，缺失回落默认值，格式错误或不满足约束时告警后回落
    fn get_parsed_or_default<T>(
        &self,
        key: &str,
        default: T,
        is_valid: impl Fn(&T) -> bool,
    ) -> RepositoryResult<T>
    where
        T: FromStr + Display,
    {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };

        match raw.trim().parse::<T>() {
            Ok(value) if is_valid(&value) => Ok(value),
            _ => {
                warn!(
                    config_key = key,
                    raw_value = %raw,
                    default = %default,
                    "配置值格式错误，使用默认值"
                );
                Ok(default)
            }
        }
    }
}

// ==========================================
// ImportConfigReader Trait 实现
// ==========================================
impl ImportConfigReader for ConfigManager {
    fn get_import_dir(&self) -> RepositoryResult<String> {
        let value = self.get_global_config_value(config_keys::IMPORT_DIR)?;
        Ok(value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_IMPORT_DIR.to_string()))
    }

    fn get_batch_size(&self) -> RepositoryResult<usize> {
        self.get_parsed_or_default(config_keys::BATCH_SIZE, DEFAULT_BATCH_SIZE, |v| *v > 0)
    }

    fn get_max_attempts(&self) -> RepositoryResult<i64> {
        self.get_parsed_or_default(config_keys::MAX_ATTEMPTS, MAX_ATTEMPTS, |v| *v > 0)
    }

    fn get_claim_retries(&self) -> RepositoryResult<u32> {
        self.get_parsed_or_default(config_keys::CLAIM_RETRIES, DEFAULT_CLAIM_RETRIES, |v| *v > 0)
    }

    fn get_lease_timeout_secs(&self) -> RepositoryResult<u64> {
        self.get_parsed_or_default(
            config_keys::LEASE_TIMEOUT_SECS,
            DEFAULT_LEASE_TIMEOUT_SECS,
            |_| true,
        )
    }
}

// ==========================================
// SettingsOverrides - 命令行覆写
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub import_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub max_attempts: Option<i64>,
    pub claim_retries: Option<u32>,
    pub lease_timeout_secs: Option<u64>,
}

// ==========================================
// ImportSettings - 一次运行的生效配置
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSettings {
    pub import_dir: PathBuf,
    pub batch_size: usize,
    pub max_attempts: i64,
    pub claim_retries: u32,
    pub lease_timeout: Option<Duration>, // None 表示不回收
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            import_dir: PathBuf::from(DEFAULT_IMPORT_DIR),
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: MAX_ATTEMPTS,
            claim_retries: DEFAULT_CLAIM_RETRIES,
            lease_timeout: Some(Duration::from_secs(DEFAULT_LEASE_TIMEOUT_SECS)),
        }
    }
}

impl ImportSettings {
    /// 合并 config_kv 与命令行覆写
    ///
    /// 命令行给出的非法值直接报错（不静默回落）
    pub fn load(
        reader: &dyn ImportConfigReader,
        overrides: &SettingsOverrides,
    ) -> ImportResult<Self> {
        if overrides.batch_size == Some(0) {
            return Err(invalid_override(config_keys::BATCH_SIZE, "must be > 0"));
        }
        if matches!(overrides.max_attempts, Some(v) if v <= 0) {
            return Err(invalid_override(config_keys::MAX_ATTEMPTS, "must be > 0"));
        }
        if overrides.claim_retries == Some(0) {
            return Err(invalid_override(config_keys::CLAIM_RETRIES, "must be > 0"));
        }

        let import_dir = match &overrides.import_dir {
            Some(dir) => dir.clone(),
            None => PathBuf::from(reader.get_import_dir()?),
        };
        let batch_size = match overrides.batch_size {
            Some(v) => v,
            None => reader.get_batch_size()?,
        };
        let max_attempts = match overrides.max_attempts {
            Some(v) => v,
            None => reader.get_max_attempts()?,
        };
        let claim_retries = match overrides.claim_retries {
            Some(v) => v,
            None => reader.get_claim_retries()?,
        };
        let lease_timeout_secs = match overrides.lease_timeout_secs {
            Some(v) => v,
            None => reader.get_lease_timeout_secs()?,
        };

        Ok(Self {
            import_dir,
            batch_size,
            max_attempts,
            claim_retries,
            lease_timeout: (lease_timeout_secs > 0).then(|| Duration::from_secs(lease_timeout_secs)),
        })
    }
}

fn invalid_override(key: &str, message: &str) -> ImportError {
    ImportError::ConfigError {
        key: key.to_string(),
        message: message.to_string(),
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 导入目录
    pub const IMPORT_DIR: &str = "import_dir";

    // 批次
    pub const BATCH_SIZE: &str = "batch_size";

    // 认领
    pub const MAX_ATTEMPTS: &str = "max_attempts";
    pub const CLAIM_RETRIES: &str = "claim_retries";
    pub const LEASE_TIMEOUT_SECS: &str = "lease_timeout_secs";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;

    fn memory_manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_when_config_missing() {
        let manager = memory_manager();
        let settings = ImportSettings::load(&manager, &SettingsOverrides::default()).unwrap();
        assert_eq!(settings, ImportSettings::default());
        assert_eq!(settings.import_dir, PathBuf::from("/imports/products"));
        assert_eq!(settings.batch_size, 1000);
        assert_eq!(settings.max_attempts, 5);
    }

    #[test]
    fn test_config_kv_values_are_used() {
        let manager = memory_manager();
        manager.set_global_config_value(config_keys::IMPORT_DIR, "/data/in").unwrap();
        manager.set_global_config_value(config_keys::BATCH_SIZE, "250").unwrap();
        manager.set_global_config_value(config_keys::LEASE_TIMEOUT_SECS, "0").unwrap();

        let settings = ImportSettings::load(&manager, &SettingsOverrides::default()).unwrap();
        assert_eq!(settings.import_dir, PathBuf::from("/data/in"));
        assert_eq!(settings.batch_size, 250);
        assert_eq!(settings.lease_timeout, None);
    }

    #[test]
    fn test_malformed_value_falls_back_to_default() {
        let manager = memory_manager();
        manager.set_global_config_value(config_keys::BATCH_SIZE, "lots").unwrap();
        manager.set_global_config_value(config_keys::MAX_ATTEMPTS, "0").unwrap();

        assert_eq!(manager.get_batch_size().unwrap(), DEFAULT_BATCH_SIZE);
        assert_eq!(manager.get_max_attempts().unwrap(), MAX_ATTEMPTS);
    }

    #[test]
    fn test_cli_overrides_win() {
        let manager = memory_manager();
        manager.set_global_config_value(config_keys::BATCH_SIZE, "250").unwrap();

        let overrides = SettingsOverrides {
            import_dir: Some(PathBuf::from("/tmp/x")),
            batch_size: Some(10),
            ..Default::default()
        };
        let settings = ImportSettings::load(&manager, &overrides).unwrap();
        assert_eq!(settings.import_dir, PathBuf::from("/tmp/x"));
        assert_eq!(settings.batch_size, 10);
    }

    #[test]
    fn test_zero_batch_size_override_rejected() {
        let manager = memory_manager();
        let overrides = SettingsOverrides {
            batch_size: Some(0),
            ..Default::default()
        };
        let err = ImportSettings::load(&manager, &overrides).unwrap_err();
        assert!(matches!(err, ImportError::ConfigError { .. }));
    }

    #[test]
    fn test_set_value_overwrites_and_snapshot() {
        let manager = memory_manager();
        manager.set_global_config_value("batch_size", "1").unwrap();
        manager.set_global_config_value("batch_size", "2").unwrap();
        assert_eq!(
            manager.get_global_config_value("batch_size").unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(manager.get_config_snapshot().unwrap(), r#"{"batch_size":"2"}"#);
    }
}
