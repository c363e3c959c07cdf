// ==========================================
// 导入编排器端到端测试
// ==========================================
// 测试目标: 真实 SQLite + 真实 CSV 文件下的完整运行
// - 成功文件: processed + 计数 + 商品落库
// - 表头错误: error + 一条表头错误记录 + 重试不重复记录
// - 运行预算与多 worker 并发
// ==========================================

mod test_helpers;

use product_import::{
    logging, ImportErrorRepository, ImportFileRepository, ImportFileStatus, ProductRepository,
};
use std::thread;
use test_helpers::{build_worker, csv_with_rows, open_shared, write_csv};

#[test]
fn test_run_imports_valid_rows_and_marks_processed() {
    logging::init_test();

    let (_db_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let dir = tempfile::tempdir().unwrap();
    write_csv(
        dir.path(),
        "products.csv",
        &csv_with_rows(&[
            "E200;Produto OK 1;10.00;5;true",
            "E201;;25.00;10;true",
            "E202;Produto OK 2;7.5;0;false",
            "E203;Produto OK 3;3;2;TRUE",
        ]),
    );

    let worker = build_worker(&db_path, dir.path(), 2);
    let summary = worker.run(20).expect("运行不应失败");

    assert_eq!(summary.discovered, 1);
    assert_eq!(summary.files_claimed, 1);
    assert_eq!(summary.files_processed, 1);
    assert_eq!(summary.files_failed, 0);
    assert_eq!(summary.rows_success, 3);
    assert_eq!(summary.rows_failed, 1);
    assert_eq!(summary.rows_upserted, 3);

    let files = worker.registry().list_all().unwrap();
    assert_eq!(files[0].status, ImportFileStatus::Processed);
    assert_eq!(files[0].attempts, 1);
    assert_eq!(files[0].rows_success, 3);
    assert_eq!(files[0].rows_failed, 1);
    assert!(files[0].processed_at.is_some());

    let products = worker.product_store();
    assert_eq!(products.count().unwrap(), 3);
    let e202 = products.find_by_external_id("E202").unwrap().unwrap();
    assert_eq!(e202.price, 7.5);
    assert_eq!(e202.stock, 0);
    assert!(!e202.active);

    let errors = worker.parser().error_sink().list_by_file(files[0].id).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].line_number, 3);
    assert_eq!(errors[0].message, "name is required");
}

#[test]
fn test_header_error_marks_file_error_and_retry_does_not_duplicate() {
    logging::init_test();

    let (_db_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "bad.csv", "id;name;price;stock;active\nE1;A;1;1;true\n");

    let worker = build_worker(&db_path, dir.path(), 1000);
    let first = worker.run(20).unwrap();
    assert_eq!(first.files_failed, 1);
    assert_eq!(first.files_processed, 0);

    let file = worker.registry().list_all().unwrap().remove(0);
    assert_eq!(file.status, ImportFileStatus::Error);
    assert_eq!(file.attempts, 1);
    assert_eq!(file.last_error.as_deref(), Some("Invalid CSV header"));

    let errors = ImportErrorRepository::from_connection(open_shared(&db_path));
    let records = errors.list_by_file(file.id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].line_number, 1);
    assert_eq!(
        records[0].message,
        "Invalid header. Expected: external_id;name;price;stock;active"
    );
    assert_eq!(
        records[0].raw_line.as_deref(),
        Some("id;name;price;stock;active")
    );

    // 再次运行: 同一文件被重新认领，错误记录去重
    let second = worker.run(20).unwrap();
    assert_eq!(second.files_failed, 1);
    let file = worker.registry().find_by_id(file.id).unwrap().unwrap();
    assert_eq!(file.attempts, 2);
    assert_eq!(errors.count_by_file(file.id).unwrap(), 1);
    assert_eq!(ProductRepository::new(&db_path).unwrap().count().unwrap(), 0);
}

#[test]
fn test_budget_leaves_remaining_files_pending() {
    let (_db_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "a.csv", &csv_with_rows(&["A1;Alpha;1.00;1;true"]));
    write_csv(dir.path(), "b.csv", &csv_with_rows(&["B1;Beta;2.00;2;true"]));

    let worker = build_worker(&db_path, dir.path(), 1000);
    let summary = worker.run(1).unwrap();
    assert_eq!(summary.files_claimed, 1);

    let files = worker.registry().list_all().unwrap();
    assert_eq!(files[0].status, ImportFileStatus::Processed);
    assert!(files[0].file_path.ends_with("a.csv"));
    assert_eq!(files[1].status, ImportFileStatus::Pending);

    let summary = worker.run(1).unwrap();
    assert_eq!(summary.discovered, 0);
    assert_eq!(summary.files_processed, 1);
    assert_eq!(worker.product_store().count().unwrap(), 2);
}

#[test]
fn test_later_file_overwrites_product_by_external_id() {
    let (_db_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "01.csv", &csv_with_rows(&["P1;Old name;10.00;1;true"]));
    write_csv(dir.path(), "02.csv", &csv_with_rows(&["P1;New name;12.50;9;false"]));

    let worker = build_worker(&db_path, dir.path(), 1000);
    let summary = worker.run(20).unwrap();
    assert_eq!(summary.files_processed, 2);
    assert_eq!(summary.rows_upserted, 2);

    let product = worker.product_store().find_by_external_id("P1").unwrap().unwrap();
    assert_eq!(product.name, "New name");
    assert_eq!(product.price, 12.5);
    assert_eq!(product.stock, 9);
    assert!(!product.active);
    assert_eq!(worker.product_store().count().unwrap(), 1);
}

#[test]
fn test_missing_import_dir_is_not_an_error() {
    let (_db_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");

    let worker = build_worker(&db_path, &missing, 1000);
    let summary = worker.run(20).unwrap();
    assert_eq!(summary.discovered, 0);
    assert_eq!(summary.files_claimed, 0);
}

#[test]
fn test_concurrent_workers_process_each_file_once() {
    logging::init_test();

    let (_db_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let dir = tempfile::tempdir().unwrap();
    for i in 0..6 {
        let row = format!("C{};Item {};1.00;{};true", i, i, i);
        write_csv(dir.path(), &format!("c{}.csv", i), &csv_with_rows(&[row.as_str()]));
    }

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let db_path = db_path.clone();
            let import_dir = dir.path().to_path_buf();
            thread::spawn(move || build_worker(&db_path, &import_dir, 1000).run(20).unwrap())
        })
        .collect();

    let summaries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let processed: usize = summaries.iter().map(|s| s.files_processed).sum();
    let discovered: usize = summaries.iter().map(|s| s.discovered).sum();
    assert_eq!(processed, 6);
    assert_eq!(discovered, 6);

    let registry = ImportFileRepository::new(&db_path).unwrap();
    let files = registry.list_all().unwrap();
    assert_eq!(files.len(), 6);
    assert!(files
        .iter()
        .all(|f| f.status == ImportFileStatus::Processed && f.attempts == 1));
    assert_eq!(ProductRepository::new(&db_path).unwrap().count().unwrap(), 6);
}
