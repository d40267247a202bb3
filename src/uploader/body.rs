// 可计数的请求体
//
// 请求体以流的形式交给 reqwest，每当底层连接取走一段数据就通过通道报告字节数，
// 传输循环据此更新进度和测速。请求本身与取消信号、字节计数一起在同一个 select 中推进。

use crate::uploader::error::UploadError;
use crate::uploader::speed::SpeedSampler;
use crate::uploader::strategy::ProgressSink;
use crate::uploader::task::StateUpdate;
use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, RequestBuilder, Response};
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// 内存数据按此大小切片送出，保证进度通知的粒度
const PIECE_SIZE: usize = 64 * 1024;

/// 按字节计算百分比
pub fn percent(done: u64, total: u64) -> Option<f64> {
    if total == 0 {
        None
    } else {
        Some(done as f64 / total as f64 * 100.0)
    }
}

/// 按本请求已发送字节上报进度和速度
pub fn report_sent<'a>(
    progress: &'a dyn ProgressSink,
    total: u64,
    sampler: &'a mut SpeedSampler,
) -> impl FnMut(u64) + 'a {
    move |sent| {
        if let Some(p) = percent(sent, total) {
            progress.report(StateUpdate::Progress(p));
        }
        if let Some(speed) = sampler.sample(sent) {
            progress.report(StateUpdate::Speed(speed));
        }
    }
}

/// 可计数的请求体
pub struct CountedBody {
    body: Body,
    len: u64,
    sent_rx: mpsc::UnboundedReceiver<u64>,
}

impl CountedBody {
    /// 以流的方式读取整个文件
    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let (tx, sent_rx) = mpsc::unbounded_channel();

        let counted = ReaderStream::with_capacity(file, PIECE_SIZE).inspect(move |piece| {
            if let Ok(piece) = piece {
                let _ = tx.send(piece.len() as u64);
            }
        });

        Ok(Self {
            body: Body::wrap_stream(counted),
            len,
            sent_rx,
        })
    }

    /// 内存中的数据（分片）
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let data = Bytes::from(data);
        let len = data.len() as u64;
        let (tx, sent_rx) = mpsc::unbounded_channel();

        let pieces: Vec<Bytes> = (0..data.len())
            .step_by(PIECE_SIZE)
            .map(|start| data.slice(start..(start + PIECE_SIZE).min(data.len())))
            .collect();

        let counted = stream::iter(pieces).map(move |piece| {
            let _ = tx.send(piece.len() as u64);
            Ok::<Bytes, std::io::Error>(piece)
        });

        Self {
            body: Body::wrap_stream(counted),
            len,
            sent_rx,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// 拆分为请求体和计数通道
    pub fn into_parts(self) -> (Body, u64, mpsc::UnboundedReceiver<u64>) {
        (self.body, self.len, self.sent_rx)
    }

    /// 作为原始请求体发送
    ///
    /// # 参数
    /// * `builder` - 已设置好地址和请求头的请求
    /// * `chunk` - 分片索引（用于错误信息）
    /// * `cancel` - 取消信号
    /// * `on_sent` - 每次数据被取走时调用，参数为本请求累计已发送字节数
    pub async fn send(
        self,
        builder: RequestBuilder,
        chunk: Option<usize>,
        cancel: &CancellationToken,
        on_sent: impl FnMut(u64),
    ) -> Result<Response, UploadError> {
        let (body, len, sent_rx) = self.into_parts();
        let builder = builder.header(CONTENT_LENGTH, len).body(body);
        drive(builder, sent_rx, chunk, cancel, on_sent).await
    }
}

/// 推进请求直到完成
///
/// 非 2xx 响应转换为 HttpStatus 错误；取消时立即放弃请求
pub async fn drive(
    builder: RequestBuilder,
    mut sent_rx: mpsc::UnboundedReceiver<u64>,
    chunk: Option<usize>,
    cancel: &CancellationToken,
    mut on_sent: impl FnMut(u64),
) -> Result<Response, UploadError> {
    let request = builder.send();
    tokio::pin!(request);

    let mut sent = 0u64;
    let response = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            Some(n) = sent_rx.recv() => {
                sent += n;
                on_sent(sent);
            }
            result = &mut request => {
                break result.map_err(|source| UploadError::Transport { chunk, source })?;
            }
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Err(UploadError::HttpStatus {
            status: status.as_u16(),
            chunk,
        });
    }

    Ok(response)
}
