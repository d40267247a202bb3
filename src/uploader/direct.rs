// 直传策略
//
// 流程：申请票据 → 单次上传 或 分片循环 → 完成
// - 票据为空：后端不支持直传，返回 TicketUnavailable，不发出任何数据请求
// - chunk_size == 0：一次请求发送整个文件，进度按已发送字节计算
// - chunk_size > 0：分片严格按顺序上传，前一片确认后才发下一片；
//   进度按已确认字节计算，在途字节只参与测速
// - 任意一片失败立即停止，不回滚、不重试

use crate::netdisk::{FsApiClient, UploadTicket};
use crate::uploader::body::{percent, report_sent, CountedBody};
use crate::uploader::chunk::ChunkPlan;
use crate::uploader::error::UploadError;
use crate::uploader::speed::SpeedSampler;
use crate::uploader::strategy::{ProgressSink, UploadRequest, UploadStrategy};
use crate::uploader::task::{StateUpdate, UploadStatus};
use async_trait::async_trait;
use reqwest::header::CONTENT_RANGE;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 直传策略
pub struct DirectStrategy {
    client: FsApiClient,
    speed_interval: Duration,
}

impl DirectStrategy {
    pub fn new(client: FsApiClient, speed_interval: Duration) -> Self {
        Self {
            client,
            speed_interval,
        }
    }

    /// 申请票据（可被取消）
    async fn request_ticket(
        &self,
        req: &UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<UploadTicket, UploadError> {
        let dir = req.remote_dir();
        let ticket = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = self.client.get_direct_upload_info(
                &dir,
                req.file_name(),
                req.size,
                req.options.overwrite,
            ) => result?,
        };

        ticket.ok_or(UploadError::TicketUnavailable)
    }

    /// 单次上传整个文件
    async fn upload_single(
        &self,
        req: &UploadRequest,
        ticket: &UploadTicket,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let builder = self.client.ticket_request(ticket)?;
        let body = CountedBody::from_file(&req.local_path).await?;
        let total = body.len();
        let mut sampler = SpeedSampler::new(self.speed_interval);

        debug!("单次直传: path={}, size={}", req.remote_path, total);

        body.send(
            builder,
            None,
            cancel,
            report_sent(progress, total, &mut sampler),
        )
        .await?;

        Ok(())
    }

    /// 分片上传
    async fn upload_chunked(
        &self,
        req: &UploadRequest,
        ticket: &UploadTicket,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let plan = ChunkPlan::new(req.size, ticket.chunk_size());
        let total = plan.total_size();
        let mut sampler = SpeedSampler::new(self.speed_interval);
        let mut uploaded = 0u64;

        for chunk in plan.chunks() {
            if cancel.is_cancelled() {
                info!(
                    "上传已取消: path={}, 已完成分片 {}/{}",
                    req.remote_path,
                    chunk.index,
                    plan.chunk_count()
                );
                return Err(UploadError::Cancelled);
            }

            let data = chunk.read_data(&req.local_path).await?;
            let builder = self
                .client
                .ticket_request(ticket)?
                .header(CONTENT_RANGE, chunk.content_range(total));

            let base = uploaded;
            CountedBody::from_bytes(data)
                .send(builder, Some(chunk.index), cancel, |sent| {
                    // 在途字节只用于测速
                    if let Some(speed) = sampler.sample(base + sent) {
                        progress.report(StateUpdate::Speed(speed));
                    }
                })
                .await?;

            uploaded += chunk.size();
            if let Some(p) = percent(uploaded, total) {
                progress.report(StateUpdate::Progress(p));
            }
            if let Some(speed) = sampler.sample(uploaded) {
                progress.report(StateUpdate::Speed(speed));
            }

            debug!(
                "分片 #{} 上传完成: {}/{} bytes",
                chunk.index, uploaded, total
            );
        }

        Ok(())
    }
}

#[async_trait]
impl UploadStrategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn upload(
        &self,
        req: &UploadRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        progress.report(StateUpdate::Status(UploadStatus::Uploading));

        let ticket = self.request_ticket(req, cancel).await?;

        info!(
            "开始直传: path={}, size={}, method={}, chunk_size={}",
            req.remote_path,
            req.size,
            ticket.method(),
            ticket.chunk_size()
        );

        if ticket.is_chunked() {
            self.upload_chunked(req, &ticket, progress, cancel).await
        } else {
            self.upload_single(req, &ticket, progress, cancel).await
        }
    }
}
