use std::sync::Mutex;

use super::*;

fn pool(retry: u32) -> TransferPool {
    TransferPool::from_config(&DownloadConfig {
        retry,
        retry_wait: 0,
        parallel: 1,
    })
}

fn files(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn manifest_transfers_last() {
    let ordered = order_files(files(&[
        "manifest.txt",
        "package.tgz",
        "sources/manifest.txt",
        "headers.tgz",
    ]));
    assert_eq!(ordered, [
        "headers.tgz",
        "package.tgz",
        "manifest.txt",
        "sources/manifest.txt",
    ]);
}

#[tokio::test]
async fn transfers_every_file_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    pool(0)
        .run(files(&["manifest.txt", "b.tgz", "a.tgz"]), move |file| {
            let record = Arc::clone(&record);
            async move {
                record.lock().unwrap().push(file);
                Ok(())
            }
        })
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), ["a.tgz", "b.tgz", "manifest.txt"]);
}

#[tokio::test]
async fn manifest_waits_for_concurrent_archives() {
    let wide = TransferPool::from_config(&DownloadConfig {
        retry: 0,
        retry_wait: 0,
        parallel: 4,
    });
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    wide.run(
        files(&["manifest.txt", "a.tgz", "b.tgz", "c.tgz"]),
        move |file| {
            let record = Arc::clone(&record);
            async move {
                // Archives dawdle; a manifest merely sequenced after them
                // would finish first on a wide pool.
                if !is_manifest(&file) {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                record.lock().unwrap().push(file);
                Ok(())
            }
        },
    )
    .await
    .unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen.last().map(String::as_str), Some("manifest.txt"));
}

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    pool(2)
        .run(files(&["a.tgz"]), move |file| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchFailure::Transient(format!("{file}: connection reset")))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let err = pool(2)
        .run(files(&["a.tgz"]), |_| async {
            Err(FetchFailure::Transient("connection reset".to_string()))
        })
        .await
        .unwrap_err();
    match err {
        TransferError::Exhausted { file, attempts, .. } => {
            assert_eq!(file, "a.tgz");
            assert_eq!(attempts, 3);
        },
        other => panic!("expected exhaustion, got {other}"),
    }
}

#[tokio::test]
async fn fatal_failures_do_not_retry() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let err = pool(5)
        .run(files(&["a.tgz"]), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FetchFailure::Fatal("corrupt archive".to_string()))
            }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Fatal { .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_auth_failures_abort_the_pool() {
    let err = pool(10)
        .run(files(&["a.tgz"]), |_| async {
            Err(FetchFailure::Auth("401".to_string()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::TooManyLoginAttempts));
}
