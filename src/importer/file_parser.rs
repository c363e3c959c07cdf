// ==========================================
// 商品导入系统 - CSV 批次解析器
// ==========================================
// 格式: ';' 分隔，'"' 引用，'\' 转义，首行为固定表头
// 职责: 文件 → 惰性批次序列（不整体载入内存）
// - 表头不匹配: 记录一条表头错误后整体失败
// - 行校验失败: 记录行错误后继续下一行
// 资源: 文件句柄归批次序列所有，序列 drop 时关闭（含提前放弃消费）
// ==========================================

use crate::domain::{ParseCounters, ProductRecord};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::import_traits::{BatchParser, BatchStream, ErrorSink};
use crate::importer::row_validator::{
    expected_header_line, header_matches, is_blank_row, join_raw_line, validate_row,
    FIELD_DELIMITER,
};
use chrono::Utc;
use csv::{ByteRecord, Reader, ReaderBuilder};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};

/// 默认批次大小
pub const DEFAULT_BATCH_SIZE: usize = 1000;

// ==========================================
// CsvProductFileParser
// ==========================================
pub struct CsvProductFileParser<S: ErrorSink> {
    error_sink: S,
}

impl<S: ErrorSink> CsvProductFileParser<S> {
    pub fn new(error_sink: S) -> Self {
        Self { error_sink }
    }

    pub fn error_sink(&self) -> &S {
        &self.error_sink
    }

    /// 打开文件并校验表头，返回惰性批次序列
    ///
    /// # 参数
    /// - path: CSV 文件路径
    /// - import_file_id: 所属 import_files.id（错误记录外键）
    /// - batch_size: 每批记录数（最小为 1）
    ///
    /// # 返回
    /// - Ok(ProductBatches): 逐批产出 ProductRecord
    /// - Err(FileNotReadable / FileOpenFailed): 未读取任何行
    /// - Err(InvalidHeader): 已写入一条表头错误，未处理任何数据行
    pub fn parse_file(
        &self,
        path: &Path,
        import_file_id: i64,
        batch_size: usize,
    ) -> ImportResult<ProductBatches<'_, S>> {
        let display_path = path.display().to_string();

        // 检查文件可读
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(ImportError::FileNotReadable(display_path)),
        }

        // 打开文件
        let file = File::open(path).map_err(|e| {
            warn!(file = %display_path, error = %e, "文件打开失败");
            ImportError::FileOpenFailed(display_path.clone())
        })?;

        let mut reader = ReaderBuilder::new()
            .delimiter(FIELD_DELIMITER as u8)
            .quote(b'"')
            .escape(Some(b'\\'))
            .has_headers(false)
            .flexible(true) // 列数校验交给行校验器
            .from_reader(LineReader::new(BufReader::new(file)));

        // 读取表头
        let mut record = ByteRecord::new();
        let header: Vec<String> = if reader.read_byte_record(&mut record)? {
            decode_fields(&record)
        } else {
            Vec::new()
        };

        if !header_matches(&header) {
            let raw_header = join_raw_line(&header);
            let expected = expected_header_line();

            // reader 在此处 drop，文件句柄随之关闭
            self.error_sink
                .log_header_error(import_file_id, &raw_header, &expected)?;

            warn!(
                file = %display_path,
                import_file_id,
                found = %raw_header,
                "CSV 表头不匹配"
            );
            return Err(ImportError::InvalidHeader {
                expected,
                found: raw_header,
            });
        }

        debug!(file = %display_path, import_file_id, batch_size, "表头校验通过");

        let embedded_lines = embedded_line_count(&record);
        Ok(ProductBatches {
            reader,
            record,
            embedded_lines,
            error_sink: &self.error_sink,
            import_file_id,
            batch_size: batch_size.max(1),
            counters: ParseCounters::default(),
            finished: false,
        })
    }
}

impl<S: ErrorSink> BatchParser for CsvProductFileParser<S> {
    fn parse<'a>(
        &'a self,
        path: &Path,
        import_file_id: i64,
        batch_size: usize,
    ) -> ImportResult<Box<dyn BatchStream + 'a>> {
        let batches = self.parse_file(path, import_file_id, batch_size)?;
        Ok(Box::new(batches))
    }
}

// ==========================================
// ProductBatches - 惰性批次序列
// ==========================================
// 单次、只进；每个批次按文件顺序恰好产出一次
// I/O 或错误记录失败后产出一个 Err 并结束
pub struct ProductBatches<'a, S: ErrorSink> {
    reader: Reader<LineReader<BufReader<File>>>,
    record: ByteRecord,
    /// 已读记录（含表头）引号内换行的累计数
    embedded_lines: u64,
    error_sink: &'a S,
    import_file_id: i64,
    batch_size: usize,
    counters: ParseCounters,
    finished: bool,
}

impl<'a, S: ErrorSink> ProductBatches<'a, S> {
    /// 当前记录的行号（按记录计: 表头为第 1 行，空行各占一行，跨行记录只占一行）
    ///
    /// 已供给的行数减去迄今所有记录引号内的换行数
    fn current_line(&mut self) -> u64 {
        self.embedded_lines += embedded_line_count(&self.record);
        self.reader
            .get_ref()
            .lines()
            .saturating_sub(self.embedded_lines)
            .max(1)
    }

    fn fail(&mut self, err: ImportError) -> Option<ImportResult<Vec<ProductRecord>>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl<'a, S: ErrorSink> Iterator for ProductBatches<'a, S> {
    type Item = ImportResult<Vec<ProductRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut batch = Vec::with_capacity(self.batch_size);

        loop {
            match self.reader.read_byte_record(&mut self.record) {
                Ok(true) => {}
                Ok(false) => {
                    // 文件结束: 剩余的不满批次最后产出一次
                    self.finished = true;
                    return if batch.is_empty() { None } else { Some(Ok(batch)) };
                }
                Err(e) => return self.fail(e.into()),
            }

            let line_number = self.current_line();
            let fields = decode_fields(&self.record);

            if is_blank_row(&fields) {
                continue;
            }

            match validate_row(&fields, Utc::now()) {
                Ok(product) => {
                    batch.push(product);
                    self.counters.success += 1;

                    if batch.len() >= self.batch_size {
                        return Some(Ok(batch));
                    }
                }
                Err(row_error) => {
                    self.counters.failed += 1;

                    let message = row_error.to_string();
                    let raw_line = join_raw_line(&fields);
                    // 首列原样记录（不 TRIM）
                    let external_id = fields.first().map(String::as_str);

                    debug!(
                        import_file_id = self.import_file_id,
                        line_number,
                        error = %message,
                        "行校验失败"
                    );

                    if let Err(e) = self.error_sink.log_line_error(
                        self.import_file_id,
                        line_number,
                        external_id,
                        &message,
                        &raw_line,
                    ) {
                        return self.fail(e.into());
                    }
                }
            }
        }
    }
}

impl<'a, S: ErrorSink> BatchStream for ProductBatches<'a, S> {
    /// 当前计数（序列耗尽后即整个文件的结果）
    fn counters(&self) -> ParseCounters {
        self.counters
    }
}

// ==========================================
// LineReader - 逐行供给 csv 读取器
// ==========================================
// 每次 read 至多返回一行，因此 csv 产出一条记录时，
// lines() 恰为该记录最后一个字节所在的行（csv 会静默跳过空行，行号需自行统计）
// 行结束符 \n、\r\n、单独的 \r 均视为换行，统一改写为 \n
struct LineReader<R> {
    inner: R,
    line: Vec<u8>,
    pos: usize,
    lines: u64,
}

impl<R: BufRead> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::new(),
            pos: 0,
            lines: 0,
        }
    }

    /// 已开始供给的行数
    fn lines(&self) -> u64 {
        self.lines
    }

    /// 读入下一行到 line（以 \n 结尾），文件结束返回 false
    fn fill_line(&mut self) -> io::Result<bool> {
        self.line.clear();
        self.pos = 0;

        loop {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                break;
            }

            match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(end) => {
                    let carriage_return = available[end] == b'\r';
                    self.line.extend_from_slice(&available[..end]);
                    self.inner.consume(end + 1);

                    // \r\n 只算一次换行
                    if carriage_return && self.inner.fill_buf()?.first() == Some(&b'\n') {
                        self.inner.consume(1);
                    }

                    self.line.push(b'\n');
                    self.lines += 1;
                    return Ok(true);
                }
                None => {
                    let len = available.len();
                    self.line.extend_from_slice(available);
                    self.inner.consume(len);
                }
            }
        }

        // 末行无换行符
        if self.line.is_empty() {
            return Ok(false);
        }
        self.line.push(b'\n');
        self.lines += 1;
        Ok(true)
    }
}

impl<R: BufRead> Read for LineReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.line.len() && !self.fill_line()? {
            return Ok(0);
        }

        let n = (self.line.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.line[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// 记录内（引号字段中）的换行数
fn embedded_line_count(record: &ByteRecord) -> u64 {
    record.as_slice().iter().filter(|b| **b == b'\n').count() as u64
}

/// 字段解码（非 UTF-8 字节做有损替换，不中止文件）
fn decode_fields(record: &ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect()
}
