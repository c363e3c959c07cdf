// ==========================================
// 并发认领测试
// ==========================================
// 测试目标: N 个独立连接并发认领 M 个文件（N > M），
//           恰好 M 次成功且没有文件被返回两次
// ==========================================

mod test_helpers;

use product_import::importer::FileRegistry;
use product_import::{logging, ImportFileRepository};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use test_helpers::write_csv;

const FILES: usize = 5;
const WORKERS: usize = 8;

#[test]
fn test_single_claim_per_worker_has_exactly_m_winners() {
    logging::init_test();

    let (_db_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let dir = tempfile::tempdir().unwrap();
    for i in 0..FILES {
        write_csv(dir.path(), &format!("file_{:02}.csv", i), "x");
    }
    ImportFileRepository::new(&db_path)
        .unwrap()
        .discover(dir.path())
        .unwrap();

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let db_path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // 每个线程一个独立连接
                let registry = ImportFileRepository::new(&db_path).unwrap();
                barrier.wait();
                registry.claim_next().unwrap().map(|f| f.id)
            })
        })
        .collect();

    let claimed: Vec<i64> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(claimed.len(), FILES);
    let unique: HashSet<i64> = claimed.iter().copied().collect();
    assert_eq!(unique.len(), FILES);
}

#[test]
fn test_draining_workers_never_share_a_file() {
    let (_db_file, db_path) = test_helpers::create_test_db().expect("Failed to create test db");
    let dir = tempfile::tempdir().unwrap();
    for i in 0..FILES * 4 {
        write_csv(dir.path(), &format!("file_{:02}.csv", i), "x");
    }
    ImportFileRepository::new(&db_path)
        .unwrap()
        .discover(dir.path())
        .unwrap();

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let db_path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let registry = ImportFileRepository::new(&db_path).unwrap();
                barrier.wait();
                let mut ids = Vec::new();
                while let Some(file) = registry.claim_next().unwrap() {
                    registry.mark_processed(&file, 0, 0).unwrap();
                    ids.push(file.id);
                }
                ids
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }

    assert_eq!(all.len(), FILES * 4);
    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(unique.len(), FILES * 4);

    let registry = ImportFileRepository::new(&db_path).unwrap();
    assert!(registry.list_all().unwrap().iter().all(|f| f.attempts == 1));
}
