// 上传管理器
//
// 负责一个批次的完整生命周期：
// - 提交前校验（空批次、并发数、重复路径、路径正在上传）
// - 为每个文件登记 Queued 状态
// - 通过并发池以最多 N 个并发执行单文件上传
// - 根据每个文件的结果写入终态（Succeeded / Failed + message）
// - 取消：停止派发新文件，在途上传尽快结束
//
// 单个文件的失败只体现在该文件的状态中，不影响同批次其他文件

use crate::config::UploadConfig;
use crate::netdisk::FsApiClient;
use crate::uploader::error::UploadError;
use crate::uploader::scheduler::async_pool;
use crate::uploader::store::{UploadEvent, UploadStore};
use crate::uploader::strategy::{StrategyKind, UploadOptions, UploadRequest, UploadStrategy};
use crate::uploader::task::{StateUpdate, UploadState, UploadStatus, UploadTask};
use crate::uploader::join_remote_path;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 默认并发上传数
pub const DEFAULT_CONCURRENCY: usize = 3;

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// 上传批次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBatch {
    /// 远端目标目录
    #[serde(default = "default_target_dir")]
    pub target_dir: String,
    pub tasks: Vec<UploadTask>,
    #[serde(default)]
    pub strategy: StrategyKind,
    /// 最大并发数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub options: UploadOptions,
}

fn default_target_dir() -> String {
    "/".to_string()
}

impl UploadBatch {
    /// 使用默认并发和直传策略创建批次
    pub fn new(target_dir: impl Into<String>, tasks: Vec<UploadTask>) -> Self {
        Self {
            target_dir: target_dir.into(),
            tasks,
            strategy: StrategyKind::default(),
            concurrency: DEFAULT_CONCURRENCY,
            options: UploadOptions::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    /// 提交前校验
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.tasks.is_empty() {
            return Err(UploadError::Validation("empty batch".to_string()));
        }
        if self.concurrency == 0 {
            return Err(UploadError::Validation(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if task.path.is_empty() {
                return Err(UploadError::Validation("empty task path".to_string()));
            }
            if !seen.insert(task.path.as_str()) {
                return Err(UploadError::Validation(format!(
                    "duplicate path in batch: {}",
                    task.path
                )));
            }
        }
        Ok(())
    }
}

/// 单个文件的最终结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub path: String,
    pub size: u64,
    pub status: UploadStatus,
    pub message: String,
}

/// 批次报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// 按提交顺序
    pub files: Vec<FileReport>,
    /// 批次是否被取消
    pub cancelled: bool,
    /// 耗时（毫秒）
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.files.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(UploadStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(UploadStatus::Failed)
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.total()
    }

    /// 成功上传的总字节数
    pub fn uploaded_bytes(&self) -> u64 {
        self.files
            .iter()
            .filter(|f| f.status == UploadStatus::Succeeded)
            .map(|f| f.size)
            .sum()
    }

    fn count(&self, status: UploadStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }
}

/// 上传管理器
pub struct UploadManager {
    /// 后端 API 客户端
    client: FsApiClient,
    /// 状态表
    store: Arc<UploadStore>,
    /// 测速节流间隔
    speed_interval: Duration,
    /// 当前取消令牌，cancel() 后替换为新令牌
    cancel_token: Mutex<CancellationToken>,
}

impl UploadManager {
    /// 创建上传管理器
    pub fn new(client: FsApiClient, speed_interval: Duration) -> Self {
        Self {
            client,
            store: Arc::new(UploadStore::new()),
            speed_interval,
            cancel_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// 创建上传管理器（从配置读取参数）
    pub fn with_config(client: FsApiClient, config: &UploadConfig) -> Self {
        Self::new(client, Duration::from_millis(config.speed_interval_ms))
    }

    /// 状态表
    pub fn store(&self) -> &Arc<UploadStore> {
        &self.store
    }

    /// 订阅状态事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.store.subscribe()
    }

    /// 所有任务状态（按登记顺序）
    pub fn snapshot(&self) -> Vec<UploadState> {
        self.store.snapshot()
    }

    /// 所有任务均已结束
    pub fn all_done(&self) -> bool {
        self.store.all_done()
    }

    /// 清除已结束的任务
    pub fn clear_done(&self) -> usize {
        self.store.clear_done()
    }

    /// 取消所有正在执行的批次
    ///
    /// 未派发的文件不再上传，在途上传尽快结束；之后提交的批次不受影响
    pub fn cancel(&self) {
        let mut token = self.cancel_token.lock();
        token.cancel();
        *token = CancellationToken::new();
        info!("已取消所有上传批次");
    }

    /// 提交批次并等待全部文件结束
    ///
    /// 校验失败时返回错误且不会派发任何文件；
    /// 校验通过后单个文件的失败只记录在报告和状态表中
    pub async fn submit(&self, batch: UploadBatch) -> Result<BatchReport, UploadError> {
        let strategy: Arc<dyn UploadStrategy> =
            Arc::from(batch.strategy.build(self.client.clone(), self.speed_interval));
        self.submit_with(batch, strategy).await
    }

    /// 使用指定的策略实例提交批次（忽略 batch.strategy）
    pub async fn submit_with(
        &self,
        batch: UploadBatch,
        strategy: Arc<dyn UploadStrategy>,
    ) -> Result<BatchReport, UploadError> {
        batch.validate()?;
        self.register(&batch.tasks)?;

        let started = Instant::now();
        let cancel = self.cancel_token.lock().child_token();
        let UploadBatch {
            target_dir,
            tasks,
            concurrency,
            options,
            ..
        } = batch;

        info!(
            "开始上传批次: {} 个文件, 策略={}, 并发={}, 目标目录={}",
            tasks.len(),
            strategy.name(),
            concurrency,
            target_dir
        );

        let summary: Vec<(String, u64)> = tasks.iter().map(|t| (t.path.clone(), t.size)).collect();
        // 按输入下标记录每个文件的结果，报告不回读状态表
        let mut results: Vec<Option<FileResult>> = vec![None; tasks.len()];

        let store = Arc::clone(&self.store);
        let pool_cancel = cancel.clone();
        let mut outcomes = async_pool(
            concurrency,
            tasks,
            move |_, task: UploadTask| {
                let store = Arc::clone(&store);
                let strategy = Arc::clone(&strategy);
                let cancel = pool_cancel.clone();
                let req = UploadRequest {
                    remote_path: join_remote_path(&target_dir, &task.path),
                    local_path: task.local_path.clone(),
                    size: task.size,
                    options,
                };
                async move { handle_file(&store, strategy.as_ref(), &task.path, req, &cancel).await }
            },
            cancel.clone(),
        );

        while let Some(outcome) = outcomes.next().await {
            let result = match outcome.result {
                Ok(result) => result,
                Err(panic) => {
                    let path = &summary[outcome.index].0;
                    error!("上传任务异常退出: path={}, 错误: {}", path, panic);
                    let message = UploadError::WorkerPanicked(panic.0).to_string();
                    self.store.mark_failed(path, message.clone());
                    FileResult::failed(message)
                }
            };
            results[outcome.index] = Some(result);
        }

        let files: Vec<FileReport> = summary
            .into_iter()
            .zip(results)
            .map(|((path, size), result)| {
                // 取消后未派发的文件
                let result = result.unwrap_or_else(|| {
                    let message = UploadError::Cancelled.to_string();
                    self.store.mark_failed(&path, message.clone());
                    FileResult::failed(message)
                });
                FileReport {
                    path,
                    size,
                    status: result.status,
                    message: result.message,
                }
            })
            .collect();

        let report = BatchReport {
            files,
            cancelled: cancel.is_cancelled(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "上传批次结束: 成功 {}/{}, 失败 {}, 耗时 {}ms{}",
            report.succeeded(),
            report.total(),
            report.failed(),
            report.elapsed_ms,
            if report.cancelled { " (已取消)" } else { "" }
        );

        Ok(report)
    }

    /// 为批次中的文件登记 Queued 状态
    ///
    /// 任一路径仍在上传时整体回滚
    fn register(&self, tasks: &[UploadTask]) -> Result<(), UploadError> {
        if let Some(task) = tasks.iter().find(|t| self.store.is_active(&t.path)) {
            return Err(UploadError::Validation(format!(
                "path already in flight: {}",
                task.path
            )));
        }

        for (i, task) in tasks.iter().enumerate() {
            if !self.store.insert_queued(task) {
                for registered in &tasks[..i] {
                    self.store.remove(&registered.path);
                }
                return Err(UploadError::Validation(format!(
                    "path already in flight: {}",
                    task.path
                )));
            }
        }
        Ok(())
    }
}

/// 单个文件的最终结果（报告用）
#[derive(Debug, Clone)]
struct FileResult {
    status: UploadStatus,
    message: String,
}

impl FileResult {
    fn failed(message: String) -> Self {
        Self {
            status: UploadStatus::Failed,
            message,
        }
    }
}

/// 上传单个文件并写入终态
async fn handle_file(
    store: &Arc<UploadStore>,
    strategy: &dyn UploadStrategy,
    path: &str,
    req: UploadRequest,
    cancel: &CancellationToken,
) -> FileResult {
    store.update(path, StateUpdate::Status(UploadStatus::Uploading));

    let reporter = store.reporter(path);
    match strategy.upload(&req, &reporter, cancel).await {
        Ok(()) => {
            // 成功时保留策略写入的提示（如任务 id）
            let message = store.get(path).map(|s| s.message).unwrap_or_default();
            store.mark_succeeded(path);
            info!("上传成功: {} -> {}", path, req.remote_path);
            FileResult {
                status: UploadStatus::Succeeded,
                message,
            }
        }
        Err(e) => {
            if e.is_direct_unsupported() {
                warn!("直传不可用: {}，可换用其他上传方式重新提交", path);
            } else {
                warn!("上传失败: {}, 错误: {}", path, e);
            }
            let message = e.to_string();
            store.mark_failed(path, message.clone());
            FileResult::failed(message)
        }
    }
}
