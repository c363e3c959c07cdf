// ==========================================
// 商品导入系统 - 行校验器
// ==========================================
// 职责: 单行原始字段 → ProductRecord 或分类后的 RowError
// 校验顺序（先命中者生效）:
// 1. 列数 = 5
// 2. 全字段 TRIM
// 3. external_id 非空
// 4. name 非空
// 5. price 为数值且 > 0
// 6. stock 仅由十进制数字组成
// 7. active 为 true|false（不区分大小写）
// ==========================================

use crate::domain::ProductRecord;
use crate::importer::error::RowError;
use chrono::{DateTime, Utc};

/// 必需表头（顺序固定）
pub const REQUIRED_HEADER: [&str; 5] = ["external_id", "name", "price", "stock", "active"];

/// 列分隔符
pub const FIELD_DELIMITER: char = ';';

/// 期望表头的文本形式: external_id;name;price;stock;active
pub fn expected_header_line() -> String {
    REQUIRED_HEADER.join(&FIELD_DELIMITER.to_string())
}

/// 字段 TRIM: 仅去除 ASCII 空白集合（空格、\t、\n、\r、\0、\x0B）
///
/// 不去除 Unicode 空白（如 U+00A0），仅由此类字符组成的字段视为非空
pub fn trim_field(value: &str) -> &str {
    value.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r' | '\0' | '\x0B'))
}

/// 表头是否与期望完全一致（逐字段 TRIM 后比较）
pub fn header_matches(fields: &[String]) -> bool {
    fields.len() == REQUIRED_HEADER.len()
        && fields
            .iter()
            .zip(REQUIRED_HEADER.iter())
            .all(|(actual, expected)| trim_field(actual) == *expected)
}

/// 完全空白的行（无字段，或仅有一个空字段）直接跳过，不计数
pub fn is_blank_row(fields: &[String]) -> bool {
    match fields {
        [] => true,
        [only] => only.is_empty(),
        _ => false,
    }
}

/// 还原原始行文本: 各字段 TRIM 后以 ';' 连接
pub fn join_raw_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| trim_field(f))
        .collect::<Vec<_>>()
        .join(&FIELD_DELIMITER.to_string())
}

/// 校验并映射一行
///
/// # 参数
/// - fields: 原始字段（未 TRIM）
/// - now: 写入 created_at / updated_at 的时间
pub fn validate_row(fields: &[String], now: DateTime<Utc>) -> Result<ProductRecord, RowError> {
    let [external_id, name, price, stock, active] = fields else {
        return Err(RowError::InvalidColumnCount);
    };

    let external_id = trim_field(external_id);
    let name = trim_field(name);
    let price = trim_field(price);
    let stock = trim_field(stock);
    let active = trim_field(active);

    if external_id.is_empty() {
        return Err(RowError::ExternalIdRequired);
    }
    if name.is_empty() {
        return Err(RowError::NameRequired);
    }

    let price = parse_price(price).ok_or(RowError::InvalidPrice)?;
    let stock = parse_stock(stock).ok_or(RowError::InvalidStock)?;
    let active = parse_active(active).ok_or(RowError::InvalidActive)?;

    Ok(ProductRecord {
        external_id: external_id.to_string(),
        name: name.to_string(),
        price,
        stock,
        active,
        created_at: now,
        updated_at: now,
    })
}

/// 数值且严格大于 0
fn parse_price(value: &str) -> Option<f64> {
    if !is_numeric(value) {
        return None;
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p > 0.0)
}

/// 仅十进制数字（无符号、无小数点），且不超出 i64
fn parse_stock(value: &str) -> Option<i64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<i64>().ok()
}

fn parse_active(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// 十进制数值字面量: [+-]digits[.digits][(e|E)[+-]digits]
///
/// 至少一位数字；inf / nan 等单词不接受
fn is_numeric(value: &str) -> bool {
    let bytes = value.as_bytes();
    let mut i = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }

    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;

    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }

    if digits == 0 {
        return false;
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }

    i == bytes.len()
}
