// 上传并发池
//
// 固定数量的 worker 从共享队列中按输入顺序领取任务：
// - 任意时刻最多 limit 个 mapper 在执行
// - 每个输入恰好被执行一次（取消后未领取的输入不再执行）
// - 结果按完成顺序产出，附带输入下标
// - 单个 mapper 的失败或 panic 不影响其余输入
//
// 池本身不关心上传语义，管理器把单文件上传作为 mapper 传入

use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// mapper 异常退出（panic）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPanic(pub String);

impl std::fmt::Display for WorkerPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for WorkerPanic {}

impl From<JoinError> for WorkerPanic {
    fn from(err: JoinError) -> Self {
        if err.is_panic() {
            let payload = err.into_panic();
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            WorkerPanic(message)
        } else {
            WorkerPanic("task aborted".to_string())
        }
    }
}

/// 单个输入的执行结果
#[derive(Debug)]
pub struct PoolOutcome<T> {
    /// 输入下标
    pub index: usize,
    pub result: Result<T, WorkerPanic>,
}

/// 按完成顺序产出结果的流
///
/// 所有 worker 退出后流结束
pub struct PoolOutcomes<T> {
    rx: mpsc::UnboundedReceiver<PoolOutcome<T>>,
}

impl<T> Stream for PoolOutcomes<T> {
    type Item = PoolOutcome<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// 以最多 `limit` 个并发执行 `mapper`
///
/// # 参数
/// * `limit` - 并发上限（小于 1 时按 1 处理，调用方应在此之前校验）
/// * `inputs` - 输入，按顺序领取
/// * `mapper` - 异步映射函数，参数为 (下标, 输入)
/// * `cancel` - 取消后 worker 不再领取新输入，已在执行的 mapper 自行响应取消
pub fn async_pool<I, T, F, Fut>(
    limit: usize,
    inputs: Vec<I>,
    mapper: F,
    cancel: CancellationToken,
) -> PoolOutcomes<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(usize, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let total = inputs.len();
    let worker_count = limit.max(1).min(total);
    let queue: Arc<Mutex<VecDeque<(usize, I)>>> =
        Arc::new(Mutex::new(inputs.into_iter().enumerate().collect()));
    let mapper = Arc::new(mapper);
    let (tx, rx) = mpsc::unbounded_channel();

    debug!("启动并发池: 输入数={}, worker数={}", total, worker_count);

    for worker_id in 0..worker_count {
        let queue = Arc::clone(&queue);
        let mapper = Arc::clone(&mapper);
        let tx = tx.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    debug!("worker #{} 收到取消信号，停止领取", worker_id);
                    break;
                }

                let next = queue.lock().pop_front();
                let Some((index, input)) = next else {
                    break;
                };

                // 单独 spawn，隔离 mapper 的 panic
                let result = tokio::spawn(mapper(index, input))
                    .await
                    .map_err(WorkerPanic::from);

                if let Err(panic) = &result {
                    warn!("输入 #{} 执行异常: {}", index, panic);
                }

                if tx.send(PoolOutcome { index, result }).is_err() {
                    // 接收端已丢弃，无需继续
                    break;
                }
            }
        });
    }

    PoolOutcomes { rx }
}
