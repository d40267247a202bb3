//! 外部命令接口
//!
//! 界面或其他进程通过 `{kind, payload}` 形式的 JSON 命令驱动管理器，
//! 状态变化则通过 [`UploadEvent`](crate::uploader::UploadEvent) 订阅获得。

use crate::uploader::manager::{BatchReport, UploadBatch, UploadManager};
use crate::uploader::task::UploadState;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 上传命令
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum UploadCommand {
    /// 提交批次（等待批次结束后回复）
    Submit(UploadBatch),
    /// 清除已结束的任务
    ClearDone,
    /// 取消所有批次
    Cancel,
    /// 获取当前所有任务状态
    Snapshot,
}

impl UploadCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            UploadCommand::Submit(_) => "submit",
            UploadCommand::ClearDone => "clear_done",
            UploadCommand::Cancel => "cancel",
            UploadCommand::Snapshot => "snapshot",
        }
    }
}

/// 命令回复
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum CommandReply {
    Submitted(BatchReport),
    Cleared { count: usize },
    Cancelled,
    Snapshot(Vec<UploadState>),
    /// 命令被拒绝（如批次校验失败）
    Error { message: String },
}

impl UploadManager {
    /// 处理外部命令
    pub async fn handle(&self, command: UploadCommand) -> CommandReply {
        debug!("处理命令: {}", command.kind());

        match command {
            UploadCommand::Submit(batch) => match self.submit(batch).await {
                Ok(report) => CommandReply::Submitted(report),
                Err(e) => CommandReply::Error {
                    message: e.to_string(),
                },
            },
            UploadCommand::ClearDone => CommandReply::Cleared {
                count: self.clear_done(),
            },
            UploadCommand::Cancel => {
                self.cancel();
                CommandReply::Cancelled
            }
            UploadCommand::Snapshot => CommandReply::Snapshot(self.snapshot()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netdisk::FsApiClient;
    use crate::uploader::strategy::StrategyKind;
    use std::time::Duration;

    fn manager() -> UploadManager {
        let client = FsApiClient::with_client(reqwest::Client::new(), "http://127.0.0.1:9", None);
        UploadManager::new(client, Duration::from_millis(500))
    }

    #[test]
    fn test_command_deserialize() {
        let cmd: UploadCommand = serde_json::from_str(
            r#"{
                "kind": "submit",
                "payload": {
                    "target_dir": "/dst",
                    "tasks": [{"path": "a.txt", "local_path": "/tmp/a.txt", "size": 3}],
                    "strategy": "stream",
                    "options": {"overwrite": true}
                }
            }"#,
        )
        .unwrap();

        match cmd {
            UploadCommand::Submit(batch) => {
                assert_eq!(batch.target_dir, "/dst");
                assert_eq!(batch.strategy, StrategyKind::Stream);
                assert_eq!(batch.concurrency, 3);
                assert!(batch.options.overwrite);
                assert!(!batch.options.as_task);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cmd: UploadCommand = serde_json::from_str(r#"{"kind":"clear_done"}"#).unwrap();
        assert_eq!(cmd.kind(), "clear_done");
    }

    #[test]
    fn test_reply_serialize() {
        let json = serde_json::to_string(&CommandReply::Cleared { count: 2 }).unwrap();
        assert_eq!(json, r#"{"kind":"cleared","payload":{"count":2}}"#);
    }

    #[tokio::test]
    async fn test_handle_invalid_submit() {
        let manager = manager();
        let reply = manager
            .handle(UploadCommand::Submit(UploadBatch::new("/", vec![])))
            .await;
        match reply {
            CommandReply::Error { message } => assert!(message.contains("empty batch")),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_clear_and_snapshot() {
        let manager = manager();
        assert!(matches!(
            manager.handle(UploadCommand::ClearDone).await,
            CommandReply::Cleared { count: 0 }
        ));
        assert!(matches!(
            manager.handle(UploadCommand::Cancel).await,
            CommandReply::Cancelled
        ));
        match manager.handle(UploadCommand::Snapshot).await {
            CommandReply::Snapshot(states) => assert!(states.is_empty()),
            other => panic!("unexpected reply: {:?}", other),
        }
    }
}
