// 上传错误定义
//
// 所有错误都在单文件粒度处理：由管理器写入该文件的状态（Failed + message），
// 不会中断同批次的其他上传

use thiserror::Error;

/// 上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 后端不支持直传（get_direct_upload_info 返回 null），需要调用方换用其他策略
    #[error("Http Direct Upload not supported")]
    TicketUnavailable,

    /// 网络层错误（DNS、连接重置、超时等）
    #[error("{}", transport_message(.chunk, .source))]
    Transport {
        /// 失败的分片索引（从 0 开始），非分片模式为 None
        chunk: Option<usize>,
        #[source]
        source: reqwest::Error,
    },

    /// 请求完成但返回非 2xx 状态码
    #[error("{}", status_message(.status, .chunk))]
    HttpStatus {
        status: u16,
        /// 失败的分片索引（从 0 开始），非分片模式为 None
        chunk: Option<usize>,
    },

    /// 后端业务错误（响应 code != 200）
    #[error("{message} (code: {code})")]
    Api { code: i32, message: String },

    /// 后端响应无法解析
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// 派发前的输入校验失败
    #[error("validation failed: {0}")]
    Validation(String),

    /// 本地文件读取失败
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),

    /// 上传已取消
    #[error("upload cancelled")]
    Cancelled,

    /// 上传任务异常退出
    #[error("upload worker panicked: {0}")]
    WorkerPanicked(String),
}

fn transport_message(chunk: &Option<usize>, source: &reqwest::Error) -> String {
    match chunk {
        Some(index) => format!("Upload chunk {} failed: {}", index + 1, source),
        None => format!("Upload failed: {}", source),
    }
}

fn status_message(status: &u16, chunk: &Option<usize>) -> String {
    match chunk {
        Some(index) => format!("Upload chunk {} failed with status {}", index + 1, status),
        None => format!("Upload failed with status {}", status),
    }
}

impl UploadError {
    /// 直传不可用，调用方应换用其他策略重新提交
    pub fn is_direct_unsupported(&self) -> bool {
        matches!(self, UploadError::TicketUnavailable)
    }

    /// 失败的分片索引（仅分片上传）
    pub fn failed_chunk(&self) -> Option<usize> {
        match self {
            UploadError::Transport { chunk, .. } | UploadError::HttpStatus { chunk, .. } => *chunk,
            _ => None,
        }
    }

    /// HTTP 状态码（仅 HttpStatus）
    pub fn status_code(&self) -> Option<u16> {
        match self {
            UploadError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn transport(source: reqwest::Error) -> Self {
        UploadError::Transport {
            chunk: None,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message() {
        let err = UploadError::HttpStatus {
            status: 500,
            chunk: None,
        };
        assert_eq!(err.to_string(), "Upload failed with status 500");
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(err.failed_chunk(), None);

        // 消息中分片序号从 1 开始
        let err = UploadError::HttpStatus {
            status: 403,
            chunk: Some(2),
        };
        assert_eq!(err.to_string(), "Upload chunk 3 failed with status 403");
        assert_eq!(err.failed_chunk(), Some(2));
    }

    #[test]
    fn test_direct_unsupported() {
        assert!(UploadError::TicketUnavailable.is_direct_unsupported());
        assert!(!UploadError::Cancelled.is_direct_unsupported());
        assert_eq!(
            UploadError::TicketUnavailable.to_string(),
            "Http Direct Upload not supported"
        );
    }

    #[test]
    fn test_api_message() {
        let err = UploadError::Api {
            code: 403,
            message: "permission denied".to_string(),
        };
        assert_eq!(err.to_string(), "permission denied (code: 403)");
    }
}
