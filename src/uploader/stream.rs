// 经后端代理的上传策略
//
// Stream：PUT /api/fs/put，原始请求体为文件内容
// Task：  PUT /api/fs/form，multipart 表单，强制 As-Task，由后端排队转存
//
// 两者都按已发送字节上报进度；后端响应为 {code, message, data}

use crate::netdisk::client::PutMeta;
use crate::netdisk::{FsApiClient, FsUploadResult};
use crate::uploader::body::{self, report_sent, CountedBody};
use crate::uploader::error::UploadError;
use crate::uploader::rapid_upload::{FileHashes, RapidUploadChecker};
use crate::uploader::speed::SpeedSampler;
use crate::uploader::strategy::{ProgressSink, UploadRequest, UploadStrategy};
use crate::uploader::task::{StateUpdate, UploadStatus};
use async_trait::async_trait;
use reqwest::multipart;
use std::time::{Duration, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 组装上传元信息
///
/// # 参数
/// * `req` - 上传请求
/// * `as_task` - 是否作为任务
/// * `hashes` - 秒传哈希（可选）
pub(crate) async fn put_meta(
    req: &UploadRequest,
    as_task: bool,
    hashes: Option<FileHashes>,
) -> Result<PutMeta, UploadError> {
    let metadata = tokio::fs::metadata(&req.local_path).await?;
    let last_modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64);

    Ok(PutMeta {
        remote_path: req.remote_path.clone(),
        size: metadata.len(),
        as_task,
        overwrite: req.options.overwrite,
        last_modified,
        hashes,
    })
}

/// 后端返回了任务信息时写入提示
fn report_task(result: &FsUploadResult, progress: &dyn ProgressSink) {
    if let Some(task) = &result.task {
        info!("已加入后端任务队列: id={}, name={}", task.id, task.name);
        progress.report(StateUpdate::Message(format!("queued as task {}", task.id)));
    }
}

/// 流式代理上传
pub struct StreamStrategy {
    client: FsApiClient,
    speed_interval: Duration,
}

impl StreamStrategy {
    pub fn new(client: FsApiClient, speed_interval: Duration) -> Self {
        Self {
            client,
            speed_interval,
        }
    }

    /// 发送 PUT /api/fs/put
    pub(crate) async fn put_stream(
        &self,
        req: &UploadRequest,
        hashes: Option<FileHashes>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<FsUploadResult, UploadError> {
        let meta = put_meta(req, req.options.as_task, hashes).await?;
        let builder = self.client.put_stream_request(&meta);
        let body = CountedBody::from_file(&req.local_path).await?;
        let total = body.len();
        let mut sampler = SpeedSampler::new(self.speed_interval);

        debug!(
            "流式上传: path={}, size={}, as_task={}, rapid={}",
            req.remote_path,
            total,
            meta.as_task,
            meta.hashes.is_some()
        );

        let response = body
            .send(
                builder,
                None,
                cancel,
                report_sent(progress, total, &mut sampler),
            )
            .await?;

        let result = FsApiClient::parse_upload_response(response).await?;
        report_task(&result, progress);
        Ok(result)
    }
}

#[async_trait]
impl UploadStrategy for StreamStrategy {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn upload(
        &self,
        req: &UploadRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        progress.report(StateUpdate::Status(UploadStatus::Uploading));

        let hashes = if req.options.try_rapid {
            Some(RapidUploadChecker::calculate_hashes_cancellable(&req.local_path, cancel).await?)
        } else {
            None
        };

        self.put_stream(req, hashes, progress, cancel).await?;
        Ok(())
    }
}

/// 表单上传并加入后端任务队列
pub struct TaskStrategy {
    client: FsApiClient,
    speed_interval: Duration,
}

impl TaskStrategy {
    pub fn new(client: FsApiClient, speed_interval: Duration) -> Self {
        Self {
            client,
            speed_interval,
        }
    }
}

#[async_trait]
impl UploadStrategy for TaskStrategy {
    fn name(&self) -> &'static str {
        "task"
    }

    async fn upload(
        &self,
        req: &UploadRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        progress.report(StateUpdate::Status(UploadStatus::Uploading));

        let hashes = if req.options.try_rapid {
            Some(RapidUploadChecker::calculate_hashes_cancellable(&req.local_path, cancel).await?)
        } else {
            None
        };

        let meta = put_meta(req, true, hashes).await?;
        let (file_body, total, sent_rx) = CountedBody::from_file(&req.local_path)
            .await?
            .into_parts();

        let part = multipart::Part::stream_with_length(file_body, total)
            .file_name(req.file_name().to_string())
            .mime_str("application/octet-stream")
            .map_err(UploadError::transport)?;
        let form = multipart::Form::new().part("file", part);

        let builder = self.client.put_form_request(&meta).multipart(form);
        let mut sampler = SpeedSampler::new(self.speed_interval);

        debug!("表单上传: path={}, size={}", req.remote_path, total);

        let response = body::drive(
            builder,
            sent_rx,
            None,
            cancel,
            report_sent(progress, total, &mut sampler),
        )
        .await?;

        let result = FsApiClient::parse_upload_response(response).await?;
        report_task(&result, progress);
        Ok(())
    }
}
