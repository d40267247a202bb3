// 秒传
//
// 原理：
// 1. 一次读取文件，同时计算 MD5 / SHA-1 / SHA-256
// 2. 通过 X-File-Md5 / X-File-Sha1 / X-File-Sha256 请求头随流式上传一起发送
// 3. 后端已有相同内容时可以跳过存储，直接完成上传

use crate::netdisk::FsApiClient;
use crate::uploader::error::UploadError;
use crate::uploader::stream::StreamStrategy;
use crate::uploader::strategy::{ProgressSink, UploadRequest, UploadStrategy};
use crate::uploader::task::{StateUpdate, UploadStatus};
use async_trait::async_trait;
use md5::Context as Md5Context;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 秒传所需的哈希信息（小写十六进制）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHashes {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    /// 文件大小
    pub file_size: u64,
}

/// 秒传哈希计算器
pub struct RapidUploadChecker;

impl RapidUploadChecker {
    /// 读取缓冲区大小
    const BUFFER_SIZE: usize = 64 * 1024;

    /// 计算文件哈希
    ///
    /// # 参数
    /// * `path` - 本地文件路径
    ///
    /// # 返回
    /// 秒传所需的哈希信息
    pub async fn calculate_hashes(path: &Path) -> Result<FileHashes, UploadError> {
        let path = path.to_path_buf();

        // 在阻塞线程池中执行文件 I/O
        tokio::task::spawn_blocking(move || Self::calculate_hashes_sync(&path))
            .await
            .map_err(|e| UploadError::WorkerPanicked(e.to_string()))?
    }

    /// 计算文件哈希，取消时立即返回（后台计算自然结束后丢弃）
    pub async fn calculate_hashes_cancellable(
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileHashes, UploadError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            result = Self::calculate_hashes(path) => result,
        }
    }

    /// 同步计算文件哈希（内部方法）
    fn calculate_hashes_sync(path: &Path) -> Result<FileHashes, UploadError> {
        let started = Instant::now();
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();

        // 使用 BufReader 提高读取效率
        let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);

        let mut md5_hasher = Md5Context::new();
        let mut sha1_hasher = Sha1::new();
        let mut sha256_hasher = Sha256::new();
        let mut buffer = vec![0u8; Self::BUFFER_SIZE];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }

            let data = &buffer[..bytes_read];
            md5_hasher.consume(data);
            sha1_hasher.update(data);
            sha256_hasher.update(data);
        }

        let hashes = FileHashes {
            md5: format!("{:x}", md5_hasher.compute()),
            sha1: hex::encode(sha1_hasher.finalize()),
            sha256: hex::encode(sha256_hasher.finalize()),
            file_size,
        };

        debug!(
            "文件哈希计算完成: path={:?}, size={}, md5={}, 耗时={:?}",
            path,
            file_size,
            hashes.md5,
            started.elapsed()
        );

        Ok(hashes)
    }
}

/// 秒传策略：计算哈希后走流式上传
pub struct RapidStrategy {
    stream: StreamStrategy,
}

impl RapidStrategy {
    pub fn new(client: FsApiClient, speed_interval: Duration) -> Self {
        Self {
            stream: StreamStrategy::new(client, speed_interval),
        }
    }
}

#[async_trait]
impl UploadStrategy for RapidStrategy {
    fn name(&self) -> &'static str {
        "rapid"
    }

    async fn upload(
        &self,
        req: &UploadRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        progress.report(StateUpdate::Status(UploadStatus::Uploading));

        let hashes = RapidUploadChecker::calculate_hashes_cancellable(&req.local_path, cancel).await?;
        info!(
            "尝试秒传: path={}, size={}, md5={}",
            req.remote_path, hashes.file_size, hashes.md5
        );

        self.stream
            .put_stream(req, Some(hashes), progress, cancel)
            .await?;
        Ok(())
    }
}
