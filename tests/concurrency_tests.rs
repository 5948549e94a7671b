//! Summary: Reader/writer concurrency integration tests (spec §5).
//! Copyright (c) YOAB. All rights reserved.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thunderpager::{Pager, PagerConfig};

fn test_db_path(name: &str) -> String {
    format!("/tmp/thunderpager_concurrency_test_{name}.db")
}

fn cleanup(path: &str) {
    let _ = fs::remove_file(path);
}

#[test]
fn test_multiple_readers_run_concurrently() {
    let path = test_db_path("multi_readers");
    cleanup(&path);

    let pager = Arc::new(Pager::open(&path, PagerConfig::default()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pager = Arc::clone(&pager);
            thread::spawn(move || {
                let txn = pager.begin(false).unwrap();
                let meta = txn.get_page_metadata(0).unwrap();
                assert!(meta.is_busy());
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    cleanup(&path);
}

#[test]
fn test_writer_does_not_block_concurrent_readers() {
    let path = test_db_path("writer_no_block_readers");
    cleanup(&path);

    let pager = Arc::new(Pager::open(&path, PagerConfig::default()).unwrap());

    let writer_pager = Arc::clone(&pager);
    let writer = thread::spawn(move || {
        let mut txn = writer_pager.begin(true).unwrap();
        let page_num = txn.allocate_page(0, 0).unwrap();
        thread::sleep(Duration::from_millis(50));
        {
            let view = txn.modify_page(page_num).unwrap();
            view.bytes[0] = 1;
        }
        txn.commit().unwrap();
    });

    // Readers started while the writer above is mid-transaction must not
    // block: they observe the pre-commit state until the writer commits.
    for _ in 0..4 {
        let pager = Arc::clone(&pager);
        let txn = pager.begin(false).unwrap();
        let _ = txn.get_page_metadata(0).unwrap();
        drop(txn);
    }

    writer.join().unwrap();
    cleanup(&path);
}

#[test]
fn test_single_writer_mutex_serializes_writers() {
    let path = test_db_path("serialize_writers");
    cleanup(&path);

    let pager = Arc::new(Pager::open(&path, PagerConfig::default()).unwrap());
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let pager = Arc::clone(&pager);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let mut txn = pager.begin(true).unwrap();
                order.lock().unwrap().push((i, "start"));
                thread::sleep(Duration::from_millis(10));
                order.lock().unwrap().push((i, "end"));
                txn.allocate_page(0, 0).unwrap();
                txn.commit().unwrap();
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let log = order.lock().unwrap();
    // Every writer's start/end pair must be contiguous: no interleaving of
    // two different writers' "start"/"end" markers, since only one writer
    // can hold the exclusive mutex at a time.
    let mut i = 0;
    while i < log.len() {
        let (id, marker) = log[i];
        assert_eq!(marker, "start");
        let (next_id, next_marker) = log[i + 1];
        assert_eq!(next_id, id);
        assert_eq!(next_marker, "end");
        i += 2;
    }

    cleanup(&path);
}

#[test]
fn test_concurrent_allocations_never_collide() {
    let path = test_db_path("concurrent_allocations");
    cleanup(&path);

    let mut config = PagerConfig::default();
    config.initial_file_size_pages = 256;
    let pager = Arc::new(Pager::open(&path, config).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pager = Arc::clone(&pager);
            thread::spawn(move || {
                let mut txn = pager.begin(true).unwrap();
                let page_num = txn.allocate_page(0, 0).unwrap();
                txn.commit().unwrap();
                page_num
            })
        })
        .collect();

    let mut allocated: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    allocated.sort_unstable();
    let before_dedup = allocated.len();
    allocated.dedup();
    assert_eq!(allocated.len(), before_dedup, "no two writers should have been handed the same page");

    cleanup(&path);
}
