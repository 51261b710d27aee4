mod common;

use common::{at, fast_transfer, upload_config, MemoryStorage};
use gsync_lib::config::TransferConfig;
use gsync_lib::core::{ActionKind, SyncEngine};
use gsync_lib::error::ProviderErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn source_with_files(names: &[&str]) -> Arc<MemoryStorage> {
    let source = Arc::new(MemoryStorage::local_like("src"));
    for name in names {
        source.add_file(name, name.as_bytes(), at(1));
    }
    source
}

#[tokio::test]
async fn permanent_failure_is_isolated_and_not_retried() {
    let source = source_with_files(&["a.txt", "b.txt", "c.txt"]);
    let dest = Arc::new(MemoryStorage::drive_like("dst"));
    dest.fail("b.txt", ProviderErrorKind::PermissionDenied, 1);

    let report = SyncEngine::new(fast_transfer())
        .run_with(&upload_config(false), source, dest.clone())
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.count(ActionKind::Upload), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path.to_string(), "b.txt");
    assert!(report.failures[0].error.contains("permission denied"));
    assert_eq!(dest.attempts("b.txt"), 1);
    assert_eq!(dest.file("a.txt").unwrap(), b"a.txt");
    assert_eq!(dest.file("c.txt").unwrap(), b"c.txt");
    assert!(dest.file("b.txt").is_none());
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let source = source_with_files(&["a.txt"]);
    let dest = Arc::new(MemoryStorage::drive_like("dst"));
    dest.fail("a.txt", ProviderErrorKind::Transient, 1);
    dest.fail("a.txt", ProviderErrorKind::RateLimited, 1);

    let report = SyncEngine::new(fast_transfer())
        .run_with(&upload_config(false), source, dest.clone())
        .await
        .unwrap();

    assert!(report.is_success(), "{}", report);
    assert_eq!(dest.attempts("a.txt"), 3);
    assert_eq!(dest.file("a.txt").unwrap(), b"a.txt");
    assert_eq!(report.bytes_transferred, 5);
}

#[tokio::test]
async fn retries_are_bounded() {
    let source = source_with_files(&["a.txt"]);
    let dest = Arc::new(MemoryStorage::drive_like("dst"));
    dest.fail("a.txt", ProviderErrorKind::Transient, 10);

    let transfer = TransferConfig {
        max_retries: 2,
        ..fast_transfer()
    };
    let report = SyncEngine::new(transfer)
        .run_with(&upload_config(false), source, dest.clone())
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(dest.attempts("a.txt"), 3);
}

#[tokio::test]
async fn failed_directory_creation_fails_its_children_only() {
    let source = Arc::new(MemoryStorage::local_like("src"));
    source.add_dir("docs");
    source.add_dir("docs/sub");
    source.add_file("docs/sub/x.txt", b"x", at(1));
    source.add_file("docs/y.txt", b"y", at(1));
    source.add_file("z.txt", b"z", at(1));
    let dest = Arc::new(MemoryStorage::drive_like("dst"));
    dest.fail("docs", ProviderErrorKind::Quota, 1);

    let report = SyncEngine::new(fast_transfer())
        .run_with(&upload_config(true), source, dest.clone())
        .await
        .unwrap();

    let mut failed: Vec<String> = report.failures.iter().map(|f| f.path.to_string()).collect();
    failed.sort();
    assert_eq!(failed, vec!["docs", "docs/sub", "docs/sub/x.txt", "docs/y.txt"]);

    let dependent = report
        .failures
        .iter()
        .filter(|f| f.error.contains("parent directory was not created"))
        .count();
    assert_eq!(dependent, 3);
    // 依赖失败的动作没有调用存储
    assert_eq!(dest.attempts("docs/y.txt"), 0);
    assert_eq!(dest.file("z.txt").unwrap(), b"z");
}

#[tokio::test]
async fn children_wait_for_directory_creation_under_concurrency() {
    let source = Arc::new(MemoryStorage::local_like("src"));
    for d in 0..4 {
        let dir = format!("d{}", d);
        source.add_dir(&dir);
        for f in 0..5 {
            source.add_file(&format!("{}/f{}.txt", dir, f), b"data", at(1));
        }
    }
    let dest = Arc::new(MemoryStorage::drive_like("dst"));
    let transfer = TransferConfig {
        max_concurrent_transfers: 8,
        ..fast_transfer()
    };

    let report = SyncEngine::new(transfer)
        .run_with(&upload_config(true), source, dest.clone())
        .await
        .unwrap();

    assert!(report.is_success(), "{}", report);
    assert_eq!(report.count(ActionKind::CreateDir), 4);
    assert_eq!(report.count(ActionKind::Upload), 20);
    assert_eq!(report.bytes_transferred, 80);
}

#[tokio::test]
async fn cancellation_stops_new_transfers() {
    let names: Vec<String> = (0..6).map(|i| format!("f{}.bin", i)).collect();
    let source = Arc::new(MemoryStorage::local_like("src"));
    for name in &names {
        source.add_file(name, &[9u8; 16], at(1));
    }
    let dest = Arc::new(MemoryStorage::drive_like("dst").with_write_delay(Duration::from_millis(200)));

    let cancel = CancellationToken::new();
    let transfer = TransferConfig {
        max_concurrent_transfers: 1,
        ..fast_transfer()
    };
    let engine = SyncEngine::new(transfer).with_cancel(cancel.clone());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });
    let report = engine
        .run_with(&upload_config(false), source, dest.clone())
        .await
        .unwrap();
    trigger.await.unwrap();

    assert!(report.cancelled);
    assert!(!report.is_success());
    assert!(report.not_started >= 1);
    let completed = report.count(ActionKind::Upload);
    assert_eq!(completed + report.not_started + report.failures.len(), names.len());

    // 已写入的文件都是完整的
    for name in &names {
        if let Some(data) = dest.file(name) {
            assert_eq!(data, vec![9u8; 16]);
        }
    }
}
