// ==========================================
// 日志系统初始化
// ==========================================
// 使用 tracing 和 tracing-subscriber
// 支持环境变量配置日志级别
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 默认过滤器（RUST_LOG 未设置时）
fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,product_import=debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

/// 初始化日志系统
///
/// # 环境变量
/// - RUST_LOG: 日志级别过滤器（默认: info）
///   例如: RUST_LOG=debug 或 RUST_LOG=product_import=trace
///
/// # 示例
/// ```no_run
/// use product_import::logging;
/// logging::init(false);
/// ```
pub fn init(verbose: bool) {
    fmt()
        .with_env_filter(default_filter(verbose))
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .init();
}

/// 初始化 JSON 格式日志（便于采集）
pub fn init_json(verbose: bool) {
    fmt()
        .json()
        .with_env_filter(default_filter(verbose))
        .with_current_span(false)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// 初始化测试环境的日志系统
///
/// 使用更详细的日志级别，便于调试
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
