// 上传模块
//
// - 并发池：限制同时上传的文件数
// - 上传策略：直传（支持分片）/ 流式 / 秒传 / 任务队列
// - 状态表：按字段更新，变化通过事件广播
// - 管理器：批次校验、派发、写入终态、取消

mod body;
pub mod chunk;
pub mod command;
pub mod direct;
pub mod error;
pub mod folder;
pub mod manager;
pub mod rapid_upload;
pub mod scheduler;
pub mod speed;
pub mod store;
pub mod strategy;
pub mod stream;
pub mod task;

pub use chunk::{ChunkPlan, UploadChunk};
pub use command::{CommandReply, UploadCommand};
pub use direct::DirectStrategy;
pub use error::UploadError;
pub use folder::{FolderScanner, ScanOptions};
pub use manager::{BatchReport, FileReport, UploadBatch, UploadManager, DEFAULT_CONCURRENCY};
pub use rapid_upload::{FileHashes, RapidStrategy, RapidUploadChecker};
pub use scheduler::{async_pool, PoolOutcome, PoolOutcomes, WorkerPanic};
pub use speed::{SpeedSampler, DEFAULT_SPEED_INTERVAL_MS};
pub use store::{EventPriority, TaskReporter, UploadEvent, UploadStore};
pub use strategy::{ProgressSink, StrategyKind, UploadOptions, UploadRequest, UploadStrategy};
pub use stream::{StreamStrategy, TaskStrategy};
pub use task::{StateUpdate, UploadState, UploadStatus, UploadTask, MAX_IN_FLIGHT_PROGRESS};

/// 拼接远端路径
///
/// 目标目录与任务相对路径之间只保留一个 `/`，结果总以 `/` 开头
///
/// # 示例
/// `join_remote_path("/dst/", "photos/a.jpg")` → `"/dst/photos/a.jpg"`
pub fn join_remote_path(dir: &str, relative: &str) -> String {
    let segments: Vec<&str> = dir
        .split('/')
        .chain(relative.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// 远端路径所在目录
///
/// `"/dst/a.txt"` → `"/dst"`，`"/a.txt"` → `"/"`
pub fn path_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

/// 格式化字节大小
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
