// 上传策略
//
// 策略负责把单个本地文件送到远端存储，管理器不关心具体协议：
// - Direct：向后端申请直传票据，直接上传到存储（支持分片）
// - Stream：经后端代理的流式上传（PUT /api/fs/put）
// - Rapid：先计算文件哈希再流式上传，后端命中时可跳过存储
// - Task：表单上传并加入后端任务队列（PUT /api/fs/form）
//
// 策略只上报 Uploading / 进度 / 速度 / 提示信息，终态由管理器根据返回值写入

use crate::netdisk::FsApiClient;
use crate::uploader::direct::DirectStrategy;
use crate::uploader::error::UploadError;
use crate::uploader::rapid_upload::RapidStrategy;
use crate::uploader::stream::{StreamStrategy, TaskStrategy};
use crate::uploader::task::StateUpdate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 状态上报接口
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: StateUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(StateUpdate) + Send + Sync,
{
    fn report(&self, update: StateUpdate) {
        self(update)
    }
}

/// 上传选项（对整个批次生效）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// 作为后台任务上传
    pub as_task: bool,
    /// 覆盖同名文件
    pub overwrite: bool,
    /// 尝试秒传
    pub try_rapid: bool,
}

/// 单个文件的上传请求
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// 远端完整路径，如 "/dst/photos/a.jpg"
    pub remote_path: String,
    /// 本地文件
    pub local_path: PathBuf,
    /// 文件大小
    pub size: u64,
    pub options: UploadOptions,
}

impl UploadRequest {
    /// 远端文件名
    pub fn file_name(&self) -> &str {
        self.remote_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.remote_path)
    }

    /// 远端所在目录
    pub fn remote_dir(&self) -> String {
        crate::uploader::path_dir(&self.remote_path)
    }
}

/// 上传策略
#[async_trait]
pub trait UploadStrategy: Send + Sync {
    /// 策略名称（日志用）
    fn name(&self) -> &'static str;

    /// 上传单个文件
    ///
    /// 成功返回 Ok(())；失败时不重试，错误原样返回给管理器
    async fn upload(
        &self,
        req: &UploadRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError>;
}

/// 策略类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// 直传
    #[default]
    Direct,
    /// 流式代理上传
    Stream,
    /// 秒传
    Rapid,
    /// 任务队列上传
    Task,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Direct,
        StrategyKind::Stream,
        StrategyKind::Rapid,
        StrategyKind::Task,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Direct => "direct",
            StrategyKind::Stream => "stream",
            StrategyKind::Rapid => "rapid",
            StrategyKind::Task => "task",
        }
    }

    /// 构建策略实例
    ///
    /// # 参数
    /// * `client` - 后端 API 客户端
    /// * `speed_interval` - 测速节流间隔
    pub fn build(&self, client: FsApiClient, speed_interval: Duration) -> Box<dyn UploadStrategy> {
        match self {
            StrategyKind::Direct => Box::new(DirectStrategy::new(client, speed_interval)),
            StrategyKind::Stream => Box::new(StreamStrategy::new(client, speed_interval)),
            StrategyKind::Rapid => Box::new(RapidStrategy::new(client, speed_interval)),
            StrategyKind::Task => Box::new(TaskStrategy::new(client, speed_interval)),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "httpdirect" => Ok(StrategyKind::Direct),
            "stream" => Ok(StrategyKind::Stream),
            "rapid" => Ok(StrategyKind::Rapid),
            "task" | "form" => Ok(StrategyKind::Task),
            other => Err(UploadError::Validation(format!(
                "unknown upload strategy: {}",
                other
            ))),
        }
    }
}
