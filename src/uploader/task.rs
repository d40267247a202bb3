// 上传任务定义
//
// UploadTask：批次中的一个文件（创建后不可变）
// UploadState：该文件的可变上传状态，由管理器/策略/测速器按字段更新

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 非终态下允许的最大进度（100 只属于 Succeeded）
pub const MAX_IN_FLIGHT_PROGRESS: f64 = 99.9;

/// 上传任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// 等待中
    Queued,
    /// 上传中
    Uploading,
    /// 上传成功
    Succeeded,
    /// 失败
    Failed,
}

impl UploadStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Succeeded | UploadStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Queued => "queued",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Succeeded => "succeeded",
            UploadStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 上传任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    /// 相对目标目录的路径，如 "photos/2024/a.jpg"（同时作为状态表的键）
    pub path: String,
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 文件大小
    pub size: u64,
}

impl UploadTask {
    /// 创建新的上传任务
    pub fn new(path: impl Into<String>, local_path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            local_path: local_path.into(),
            size,
        }
    }

    /// 从单个本地文件创建任务，相对路径为文件名
    pub async fn from_file(local_path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(local_path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("不是普通文件: {}", local_path.display()),
            ));
        }

        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Self::new(name, local_path, metadata.len()))
    }

    /// 文件名（相对路径的最后一段）
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// 单个字段的状态更新
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "lowercase")]
pub enum StateUpdate {
    Status(UploadStatus),
    /// 百分比 0-100
    Progress(f64),
    /// bytes/s
    Speed(f64),
    Message(String),
}

/// 上传状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadState {
    pub path: String,
    pub size: u64,
    pub status: UploadStatus,
    /// 进度百分比，单调不减
    pub progress: f64,
    /// 上传速度 (bytes/s)
    pub speed: f64,
    /// 错误或提示信息
    pub message: String,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 完成时间 (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

impl UploadState {
    /// 为任务创建初始状态（Queued）
    pub fn queued(task: &UploadTask) -> Self {
        Self {
            path: task.path.clone(),
            size: task.size,
            status: UploadStatus::Queued,
            progress: 0.0,
            speed: 0.0,
            message: String::new(),
            created_at: chrono::Utc::now().timestamp(),
            finished_at: None,
        }
    }

    /// 应用一次字段更新，返回状态是否发生变化
    ///
    /// - 终态不再接受任何更新
    /// - 进度只增不减，非终态下上限为 [`MAX_IN_FLIGHT_PROGRESS`]
    /// - 进入 Succeeded 时进度置为 100
    pub fn apply(&mut self, update: &StateUpdate) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        match update {
            StateUpdate::Status(status) => {
                // 不允许回到 Queued
                if self.status == *status || *status == UploadStatus::Queued {
                    return false;
                }
                self.status = *status;
                match status {
                    UploadStatus::Succeeded => {
                        self.progress = 100.0;
                        self.finished_at = Some(chrono::Utc::now().timestamp());
                    }
                    UploadStatus::Failed => {
                        self.finished_at = Some(chrono::Utc::now().timestamp());
                    }
                    _ => {}
                }
                true
            }
            StateUpdate::Progress(value) => {
                let value = if value.is_finite() {
                    value.clamp(0.0, MAX_IN_FLIGHT_PROGRESS)
                } else {
                    return false;
                };
                if value <= self.progress {
                    return false;
                }
                self.progress = value;
                true
            }
            StateUpdate::Speed(value) => {
                if !value.is_finite() || *value < 0.0 {
                    return false;
                }
                self.speed = *value;
                true
            }
            StateUpdate::Message(message) => {
                if self.message == *message {
                    return false;
                }
                self.message = message.clone();
                true
            }
        }
    }
}
