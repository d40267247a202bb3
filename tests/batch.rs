// 批次调度测试：并发上限、失败隔离、清除、事件

mod common;

use async_trait::async_trait;
use common::{write_file, MockBackend};
use fs_uploader::uploader::{ProgressSink, StateUpdate, UploadRequest, UploadStrategy};
use fs_uploader::{
    StrategyKind, UploadBatch, UploadError, UploadEvent, UploadManager, UploadStatus, UploadTask,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// 每个文件需要拿到一个许可才能完成
struct GatedStrategy {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl UploadStrategy for GatedStrategy {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn upload(
        &self,
        _req: &UploadRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        progress.report(StateUpdate::Progress(10.0));
        tokio::select! {
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            permit = self.gate.acquire() => {
                permit.map_err(|_| UploadError::Cancelled)?.forget();
                Ok(())
            }
        }
    }
}

fn tasks(n: usize) -> Vec<UploadTask> {
    (0..n)
        .map(|i| UploadTask::new(format!("f{}.bin", i), format!("/tmp/f{}.bin", i), 10))
        .collect()
}

async fn wait_until(manager: &UploadManager, check: impl Fn(&UploadManager) -> bool) {
    for _ in 0..200 {
        if check(manager) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached: {:?}", manager.snapshot());
}

fn count(manager: &UploadManager, status: UploadStatus) -> usize {
    manager.store().count_by_status(status)
}

#[tokio::test]
async fn test_pool_admits_one_per_completion() {
    let backend = MockBackend::start().await;
    let manager = Arc::new(UploadManager::new(backend.client(), Duration::from_millis(50)));
    let gate = Arc::new(Semaphore::new(0));
    let strategy = Arc::new(GatedStrategy { gate: gate.clone() });

    let batch = UploadBatch::new("/dst", tasks(5)).with_concurrency(3);
    let handle = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.submit_with(batch, strategy).await })
    };

    wait_until(&manager, |m| count(m, UploadStatus::Uploading) == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count(&manager, UploadStatus::Uploading), 3);
    assert_eq!(count(&manager, UploadStatus::Queued), 2);

    // 一个结束后恰好补上一个
    gate.add_permits(1);
    wait_until(&manager, |m| count(m, UploadStatus::Succeeded) == 1).await;
    wait_until(&manager, |m| count(m, UploadStatus::Queued) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count(&manager, UploadStatus::Uploading), 3);
    assert_eq!(count(&manager, UploadStatus::Queued), 1);

    gate.add_permits(10);
    let report = handle.await.unwrap().unwrap();
    assert!(report.all_succeeded());
    assert_eq!(report.total(), 5);
    assert!(manager.all_done());
}

#[tokio::test]
async fn test_failure_isolated_end_to_end() {
    let backend = MockBackend::start().await;
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("folder");
    std::fs::create_dir_all(&root).unwrap();
    for name in ["a.txt", "bad.txt", "c.txt"] {
        write_file(&root, name, 256);
    }

    let tasks = fs_uploader::uploader::FolderScanner::new().scan(&root).unwrap();
    let manager = UploadManager::new(backend.client(), Duration::from_millis(50));
    let report = manager
        .submit(
            UploadBatch::new("/dst", tasks)
                .with_strategy(StrategyKind::Stream)
                .with_concurrency(2),
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    let bad = report
        .files
        .iter()
        .find(|f| f.path == "folder/bad.txt")
        .unwrap();
    assert_eq!(bad.status, UploadStatus::Failed);
    assert_eq!(bad.message, "Upload failed with status 500");

    let paths: Vec<String> = backend
        .requests("put")
        .iter()
        .map(|r| r.header("file-path").unwrap().to_string())
        .collect();
    assert_eq!(paths.len(), 3);
    assert!(paths.contains(&"%2Fdst%2Ffolder%2Fa.txt".to_string()));
}

#[tokio::test]
async fn test_events_and_clear_done() {
    let backend = MockBackend::start().await;
    let manager = UploadManager::new(backend.client(), Duration::from_millis(50));
    let mut rx = manager.subscribe();

    let gate = Arc::new(Semaphore::new(10));
    let report = manager
        .submit_with(
            UploadBatch::new("/", tasks(2)),
            Arc::new(GatedStrategy { gate }),
        )
        .await
        .unwrap();
    assert!(report.all_succeeded());

    let mut queued = 0;
    let mut finished = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            UploadEvent::Queued { size, .. } => {
                assert_eq!(size, 10);
                queued += 1;
            }
            UploadEvent::Finished { status, .. } => {
                assert_eq!(status, UploadStatus::Succeeded);
                finished += 1;
            }
            _ => {}
        }
    }
    assert_eq!(queued, 2);
    assert_eq!(finished, 2);

    assert_eq!(manager.clear_done(), 2);
    assert!(manager.snapshot().is_empty());
    match rx.try_recv() {
        Ok(UploadEvent::Cleared { paths }) => assert_eq!(paths.len(), 2),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_running_batch() {
    let backend = MockBackend::start().await;
    let manager = Arc::new(UploadManager::new(backend.client(), Duration::from_millis(50)));
    let strategy = Arc::new(GatedStrategy {
        gate: Arc::new(Semaphore::new(0)),
    });

    let batch = UploadBatch::new("/dst", tasks(5)).with_concurrency(2);
    let handle = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.submit_with(batch, strategy).await })
    };

    wait_until(&manager, |m| count(m, UploadStatus::Uploading) == 2).await;
    manager.cancel();

    let report = handle.await.unwrap().unwrap();
    assert!(report.cancelled);
    assert_eq!(report.failed(), 5);
    assert!(report.files.iter().all(|f| f.message == "upload cancelled"));

    // 取消后可以重新提交
    let gate = Arc::new(Semaphore::new(10));
    let report = manager
        .submit_with(
            UploadBatch::new("/dst", tasks(5)),
            Arc::new(GatedStrategy { gate }),
        )
        .await
        .unwrap();
    assert!(report.all_succeeded());
}
