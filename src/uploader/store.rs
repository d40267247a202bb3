//! 上传状态表
//!
//! 以任务路径为键保存每个文件的 [`UploadState`]，按字段接受更新，
//! 每次实际发生的变化都会通过 broadcast 通道发布 [`UploadEvent`]，供外部界面订阅。
//!
//! 每个条目只由持有该路径的上传任务写入，不同任务之间没有共享的可变数据。

use crate::uploader::strategy::ProgressSink;
use crate::uploader::task::{StateUpdate, UploadState, UploadStatus, UploadTask};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// 默认事件通道容量
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// 事件优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// 低优先级：进度/速度更新
    Low = 0,
    /// 中优先级：状态变更
    Medium = 1,
    /// 高优先级：完成、失败、清除等关键事件
    High = 2,
}

/// 上传事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 任务进入队列
    Queued { path: String, size: u64 },
    /// 字段更新
    Updated { path: String, update: StateUpdate },
    /// 任务进入终态
    Finished {
        path: String,
        status: UploadStatus,
        message: String,
    },
    /// 终态任务被清除
    Cleared { paths: Vec<String> },
}

impl UploadEvent {
    /// 事件对应的任务路径（Cleared 没有单一路径）
    pub fn path(&self) -> Option<&str> {
        match self {
            UploadEvent::Queued { path, .. }
            | UploadEvent::Updated { path, .. }
            | UploadEvent::Finished { path, .. } => Some(path),
            UploadEvent::Cleared { .. } => None,
        }
    }

    /// 获取事件优先级
    pub fn priority(&self) -> EventPriority {
        match self {
            UploadEvent::Updated {
                update: StateUpdate::Progress(_) | StateUpdate::Speed(_),
                ..
            } => EventPriority::Low,
            UploadEvent::Queued { .. } | UploadEvent::Updated { .. } => EventPriority::Medium,
            UploadEvent::Finished { .. } | UploadEvent::Cleared { .. } => EventPriority::High,
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            UploadEvent::Queued { .. } => "queued",
            UploadEvent::Updated { .. } => "updated",
            UploadEvent::Finished { .. } => "finished",
            UploadEvent::Cleared { .. } => "cleared",
        }
    }
}

/// 上传状态表
#[derive(Debug)]
pub struct UploadStore {
    /// path -> state
    states: DashMap<String, UploadState>,
    /// 插入顺序（用于展示）
    order: RwLock<Vec<String>>,
    /// 事件发送器
    events: broadcast::Sender<UploadEvent>,
}

impl UploadStore {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            states: DashMap::new(),
            order: RwLock::new(Vec::new()),
            events,
        }
    }

    /// 订阅状态事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: UploadEvent) {
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(event);
    }

    /// 路径是否正在使用（存在且非终态）
    pub fn is_active(&self, path: &str) -> bool {
        self.states
            .get(path)
            .map(|s| !s.status.is_terminal())
            .unwrap_or(false)
    }

    /// 为任务登记 Queued 状态
    ///
    /// 同路径的终态记录会被替换（重新提交）；同路径仍在进行中时返回 false
    pub fn insert_queued(&self, task: &UploadTask) -> bool {
        // 检查与写入在同一个分片锁内完成，锁在更新顺序表前释放
        let replaced = match self.states.entry(task.path.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().status.is_terminal() {
                    return false;
                }
                entry.insert(UploadState::queued(task));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(UploadState::queued(task));
                false
            }
        };

        {
            let mut order = self.order.write();
            if replaced {
                order.retain(|p| p != &task.path);
            }
            order.push(task.path.clone());
        }

        debug!("登记上传任务: path={}, size={}", task.path, task.size);
        self.publish(UploadEvent::Queued {
            path: task.path.clone(),
            size: task.size,
        });
        true
    }

    /// 撤销登记（提交失败时回滚）
    pub(crate) fn remove(&self, path: &str) -> bool {
        let removed = self.states.remove(path).is_some();
        if removed {
            self.order.write().retain(|p| p != path);
        }
        removed
    }

    /// 更新单个字段，返回是否发生变化
    pub fn update(&self, path: &str, update: StateUpdate) -> bool {
        let finished = {
            let Some(mut state) = self.states.get_mut(path) else {
                return false;
            };
            if !state.apply(&update) {
                return false;
            }
            state
                .status
                .is_terminal()
                .then(|| (state.status, state.message.clone()))
        };

        self.publish(UploadEvent::Updated {
            path: path.to_string(),
            update,
        });

        if let Some((status, message)) = finished {
            self.publish(UploadEvent::Finished {
                path: path.to_string(),
                status,
                message,
            });
        }
        true
    }

    /// 标记成功（进度置为 100）
    pub fn mark_succeeded(&self, path: &str) -> bool {
        self.update(path, StateUpdate::Status(UploadStatus::Succeeded))
    }

    /// 标记失败，先写入错误信息再进入终态
    pub fn mark_failed(&self, path: &str, message: impl Into<String>) -> bool {
        self.update(path, StateUpdate::Message(message.into()));
        self.update(path, StateUpdate::Status(UploadStatus::Failed))
    }

    /// 获取单个任务状态
    pub fn get(&self, path: &str) -> Option<UploadState> {
        self.states.get(path).map(|s| s.clone())
    }

    /// 按插入顺序返回所有任务状态
    pub fn snapshot(&self) -> Vec<UploadState> {
        let order = self.order.read();
        order
            .iter()
            .filter_map(|path| self.states.get(path).map(|s| s.clone()))
            .collect()
    }

    /// 指定状态的任务数
    pub fn count_by_status(&self, status: UploadStatus) -> usize {
        self.states.iter().filter(|s| s.status == status).count()
    }

    /// 所有任务均已进入终态
    pub fn all_done(&self) -> bool {
        self.states.iter().all(|s| s.status.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// 清除已结束（成功/失败）的任务，进行中的任务保留
    pub fn clear_done(&self) -> usize {
        let removed: Vec<String> = {
            let mut order = self.order.write();
            let mut removed = Vec::new();
            order.retain(|path| {
                let done = self
                    .states
                    .remove_if(path, |_, s| s.status.is_terminal())
                    .is_some();
                if done {
                    removed.push(path.clone());
                }
                !done
            });
            removed
        };

        let count = removed.len();
        if count > 0 {
            info!("清除了 {} 个已结束的上传任务", count);
            self.publish(UploadEvent::Cleared { paths: removed });
        }
        count
    }

    /// 为指定路径创建进度上报句柄
    pub fn reporter(self: &Arc<Self>, path: impl Into<String>) -> TaskReporter {
        TaskReporter {
            store: Arc::clone(self),
            path: path.into(),
        }
    }
}

impl Default for UploadStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个任务的进度上报句柄
///
/// 策略通过它按字段更新自己所属路径的状态
#[derive(Debug, Clone)]
pub struct TaskReporter {
    store: Arc<UploadStore>,
    path: String,
}

impl TaskReporter {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl ProgressSink for TaskReporter {
    fn report(&self, update: StateUpdate) {
        // 终态由管理器根据上传结果写入，策略上报的终态被忽略
        if let StateUpdate::Status(status) = &update {
            if status.is_terminal() {
                return;
            }
        }
        self.store.update(&self.path, update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(path: &str) -> UploadTask {
        UploadTask::new(path, format!("./{}", path), 100)
    }

    #[test]
    fn test_insert_and_snapshot_order() {
        let store = UploadStore::new();
        assert!(store.insert_queued(&task("b.txt")));
        assert!(store.insert_queued(&task("a.txt")));

        let paths: Vec<_> = store.snapshot().into_iter().map(|s| s.path).collect();
        assert_eq!(paths, vec!["b.txt", "a.txt"]);
        assert_eq!(store.count_by_status(UploadStatus::Queued), 2);
        assert!(!store.all_done());
    }

    #[test]
    fn test_reject_active_duplicate() {
        let store = UploadStore::new();
        assert!(store.insert_queued(&task("a.txt")));
        assert!(!store.insert_queued(&task("a.txt")));

        // 终态后允许重新提交
        store.mark_failed("a.txt", "boom");
        assert!(store.insert_queued(&task("a.txt")));
        assert_eq!(store.get("a.txt").unwrap().status, UploadStatus::Queued);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_insert_same_path() {
        let store = UploadStore::new();
        let accepted = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    if store.insert_queued(&task("a.txt")) {
                        accepted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(accepted.into_inner(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_clear_done_keeps_active() {
        let store = UploadStore::new();
        for p in ["ok.txt", "bad.txt", "running.txt", "waiting.txt"] {
            store.insert_queued(&task(p));
        }
        store.update("running.txt", StateUpdate::Status(UploadStatus::Uploading));
        store.mark_succeeded("ok.txt");
        store.mark_failed("bad.txt", "HTTP 500");

        assert_eq!(store.clear_done(), 2);
        let paths: Vec<_> = store.snapshot().into_iter().map(|s| s.path).collect();
        assert_eq!(paths, vec!["running.txt", "waiting.txt"]);
        assert_eq!(store.clear_done(), 0);
    }

    #[test]
    fn test_mark_failed_sets_message() {
        let store = UploadStore::new();
        store.insert_queued(&task("a.txt"));
        store.update("a.txt", StateUpdate::Progress(42.0));
        store.mark_failed("a.txt", "Upload failed with status 500");

        let s = store.get("a.txt").unwrap();
        assert_eq!(s.status, UploadStatus::Failed);
        assert_eq!(s.message, "Upload failed with status 500");
        assert_eq!(s.progress, 42.0);
        assert!(store.all_done());
    }

    #[tokio::test]
    async fn test_events_published() {
        let store = UploadStore::new();
        let mut rx = store.subscribe();

        store.insert_queued(&task("a.txt"));
        store.update("a.txt", StateUpdate::Progress(10.0));
        // 无变化不发布事件
        store.update("a.txt", StateUpdate::Progress(5.0));
        store.mark_succeeded("a.txt");

        assert_eq!(
            rx.recv().await.unwrap(),
            UploadEvent::Queued {
                path: "a.txt".to_string(),
                size: 100
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            UploadEvent::Updated {
                path: "a.txt".to_string(),
                update: StateUpdate::Progress(10.0)
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            UploadEvent::Updated {
                path: "a.txt".to_string(),
                update: StateUpdate::Status(UploadStatus::Succeeded)
            }
        );
        let finished = rx.recv().await.unwrap();
        assert_eq!(finished.priority(), EventPriority::High);
        assert_eq!(
            finished,
            UploadEvent::Finished {
                path: "a.txt".to_string(),
                status: UploadStatus::Succeeded,
                message: String::new()
            }
        );
    }

    #[test]
    fn test_reporter_ignores_terminal_status() {
        let store = Arc::new(UploadStore::new());
        store.insert_queued(&task("a.txt"));
        let reporter = store.reporter("a.txt");

        reporter.report(StateUpdate::Status(UploadStatus::Uploading));
        reporter.report(StateUpdate::Status(UploadStatus::Succeeded));
        reporter.report(StateUpdate::Speed(2048.0));

        let s = store.get("a.txt").unwrap();
        assert_eq!(s.status, UploadStatus::Uploading);
        assert_eq!(s.speed, 2048.0);
    }
}
