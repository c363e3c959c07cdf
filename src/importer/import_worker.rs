// ==========================================
// 商品导入系统 - 导入编排器
// ==========================================
// 流程: 发现 → 回收超时租约 → 循环(认领 → 解析 → 逐批 upsert → 收尾)
// 红线:
// - 单个文件的致命错误只终止该文件（收尾为 error），不终止本次运行
// - 批次立即落库，不跨批缓存（峰值内存 = 一个批次）
// - 仅发现/认领/收尾基础设施故障会使整个运行失败
// ==========================================

use crate::config::ImportSettings;
use crate::domain::{ImportFile, ParseCounters};
use crate::importer::error::ImportResult;
use crate::importer::import_traits::{BatchParser, FileRegistry, ProductStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ==========================================
// RunSummary - 单次运行汇总
// ==========================================
// rows_* 只统计成功收尾（processed）的文件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub discovered: usize,
    pub reclaimed: usize,
    pub files_claimed: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    /// 收尾时租约已失效（被回收或重新认领）而放弃的文件
    pub files_abandoned: usize,
    pub rows_upserted: usize,
    pub rows_success: usize,
    pub rows_failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// 单个文件的处理结果
#[derive(Debug, Clone, Copy, Default)]
struct FileReport {
    rows_upserted: usize,
    counters: ParseCounters,
}

// ==========================================
// ProductImportWorker
// ==========================================
pub struct ProductImportWorker<F, P, B>
where
    F: FileRegistry,
    P: ProductStore,
    B: BatchParser,
{
    registry: F,
    product_store: P,
    parser: B,
    settings: ImportSettings,
}

impl<F, P, B> ProductImportWorker<F, P, B>
where
    F: FileRegistry,
    P: ProductStore,
    B: BatchParser,
{
    pub fn new(registry: F, product_store: P, parser: B, settings: ImportSettings) -> Self {
        Self {
            registry,
            product_store,
            parser,
            settings,
        }
    }

    pub fn registry(&self) -> &F {
        &self.registry
    }

    pub fn product_store(&self) -> &P {
        &self.product_store
    }

    pub fn parser(&self) -> &B {
        &self.parser
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// 执行一次导入运行
    ///
    /// # 参数
    /// - max_files: 本次最多认领的文件数（无论成功或失败都计入）
    ///
    /// # 返回
    /// - Ok(RunSummary): 循环正常结束（即使所有文件都失败）
    /// - Err: 发现/认领/错误收尾本身失败
    pub fn run(&self, max_files: usize) -> ImportResult<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        info!(
            run_id = %run_id,
            max_files,
            import_dir = %self.settings.import_dir.display(),
            batch_size = self.settings.batch_size,
            "导入运行开始"
        );

        let discovered = self.registry.discover(&self.settings.import_dir)?;
        let reclaimed = match self.settings.lease_timeout {
            Some(lease_timeout) => self.registry.reclaim_stale(lease_timeout)?,
            None => 0,
        };

        let mut summary = RunSummary {
            run_id,
            discovered,
            reclaimed,
            files_claimed: 0,
            files_processed: 0,
            files_failed: 0,
            files_abandoned: 0,
            rows_upserted: 0,
            rows_success: 0,
            rows_failed: 0,
            started_at,
            finished_at: started_at,
        };

        while summary.files_claimed < max_files {
            let Some(file) = self.registry.claim_next()? else {
                debug!(run_id = %summary.run_id, "没有可认领的文件，提前结束");
                break;
            };
            summary.files_claimed += 1;

            info!(
                run_id = %summary.run_id,
                file = %file.file_path,
                import_file_id = file.id,
                attempt = file.attempts,
                "开始处理导入文件"
            );

            let outcome = self.process_file(&file).and_then(|report| {
                self.registry.mark_processed(
                    &file,
                    report.counters.success,
                    report.counters.failed,
                )?;
                Ok(report)
            });

            match outcome {
                Ok(report) => {
                    summary.files_processed += 1;
                    summary.rows_upserted += report.rows_upserted;
                    summary.rows_success += report.counters.success;
                    summary.rows_failed += report.counters.failed;

                    info!(
                        run_id = %summary.run_id,
                        file = %file.file_path,
                        import_file_id = file.id,
                        rows_success = report.counters.success,
                        rows_failed = report.counters.failed,
                        rows_upserted = report.rows_upserted,
                        "导入文件处理完成"
                    );
                }
                Err(e) => {
                    let message = e.to_string();
                    error!(
                        run_id = %summary.run_id,
                        file = %file.file_path,
                        import_file_id = file.id,
                        attempt = file.attempts,
                        error = %message,
                        "导入文件处理失败"
                    );
                    match self.registry.mark_error(&file, &message) {
                        Ok(()) => summary.files_failed += 1,
                        Err(lost) if lost.is_lease_lost() => {
                            warn!(
                                run_id = %summary.run_id,
                                import_file_id = file.id,
                                attempt = file.attempts,
                                "租约已失效，跳过收尾"
                            );
                            summary.files_abandoned += 1;
                        }
                        Err(other) => return Err(other.into()),
                    }
                }
            }
        }

        summary.finished_at = Utc::now();
        info!(
            run_id = %summary.run_id,
            discovered = summary.discovered,
            reclaimed = summary.reclaimed,
            files_claimed = summary.files_claimed,
            files_processed = summary.files_processed,
            files_failed = summary.files_failed,
            files_abandoned = summary.files_abandoned,
            rows_upserted = summary.rows_upserted,
            "导入运行结束"
        );

        Ok(summary)
    }

    /// 解析并逐批落库（不做收尾）
    fn process_file(&self, file: &ImportFile) -> ImportResult<FileReport> {
        let mut stream = self.parser.parse(
            Path::new(&file.file_path),
            file.id,
            self.settings.batch_size,
        )?;

        let mut rows_upserted = 0;
        while let Some(batch) = stream.next() {
            let batch = batch?;
            let written = self.product_store.upsert_many(&batch)?;
            rows_upserted += written;
            debug!(
                import_file_id = file.id,
                batch = batch.len(),
                written,
                "批次已落库"
            );
        }

        Ok(FileReport {
            rows_upserted,
            counters: stream.counters(),
        })
    }
}
