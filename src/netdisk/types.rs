// 后端文件系统 API 数据类型

use crate::uploader::UploadError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 后端成功码
pub const API_CODE_OK: i32 = 200;

/// 统一响应包装 `{code, message, data}`
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,

    #[serde(default)]
    pub message: String,

    /// 缺省时为 None
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 是否成功
    pub fn is_success(&self) -> bool {
        self.code == API_CODE_OK
    }

    /// 转换为结果，code != 200 时返回业务错误
    pub fn into_result(self) -> Result<Option<T>, UploadError> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(UploadError::Api {
                code: self.code,
                message: self.message,
            })
        }
    }
}

/// 直传票据请求体
#[derive(Debug, Clone, Serialize)]
pub struct DirectUploadInfoRequest<'a> {
    /// 目标目录
    pub path: &'a str,
    pub file_name: &'a str,
    pub file_size: u64,
    /// 固定为 "HttpDirect"
    pub tool: &'a str,
}

/// 直传票据
///
/// 每个文件单独申请，不缓存
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTicket {
    /// 存储端上传地址
    pub upload_url: String,

    /// HTTP 方法（缺省 PUT）
    #[serde(default)]
    pub method: Option<String>,

    /// 需要原样附带的请求头
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,

    /// 分片大小，0 或缺省表示不分片
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

impl UploadTicket {
    /// 实际使用的 HTTP 方法
    pub fn method(&self) -> &str {
        match self.method.as_deref() {
            Some(m) if !m.is_empty() => m,
            _ => "PUT",
        }
    }

    /// 实际使用的分片大小（0 表示不分片）
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size.unwrap_or(0)
    }

    /// 是否分片上传
    pub fn is_chunked(&self) -> bool {
        self.chunk_size() > 0
    }

    /// 附带的请求头
    pub fn headers(&self) -> impl Iterator<Item = (&String, &String)> {
        self.headers.iter().flatten()
    }
}

/// 后端任务信息（作为任务上传时返回）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// 任务状态码
    #[serde(default)]
    pub state: i32,

    /// 状态描述
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub progress: f64,

    #[serde(default)]
    pub error: String,
}

/// 上传接口返回数据（PUT /api/fs/put、/api/fs/form）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FsUploadResult {
    /// 加入任务队列时返回的任务
    #[serde(default)]
    pub task: Option<TaskInfo>,
}
