// 后端文件系统 API 客户端
//
// 覆盖上传相关的三个接口：
// - POST /api/fs/get_direct_upload_info  申请直传票据
// - PUT  /api/fs/put                     流式代理上传
// - PUT  /api/fs/form                    表单上传（可加入任务队列）
//
// 直传票据返回的存储地址不经过后端，也不附带 Authorization

use crate::config::ApiConfig;
use crate::netdisk::{ApiResponse, DirectUploadInfoRequest, FsUploadResult, UploadTicket};
use crate::uploader::rapid_upload::FileHashes;
use crate::uploader::UploadError;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 直传票据请求中的 tool 字段
pub const DIRECT_UPLOAD_TOOL: &str = "HttpDirect";

/// 流式/表单上传的请求元信息
#[derive(Debug, Clone, Default)]
pub struct PutMeta {
    /// 远端完整路径
    pub remote_path: String,
    pub size: u64,
    pub as_task: bool,
    pub overwrite: bool,
    /// 本地修改时间 (毫秒时间戳)
    pub last_modified: Option<i64>,
    /// 秒传哈希
    pub hashes: Option<FileHashes>,
}

/// 文件系统 API 客户端
#[derive(Debug, Clone)]
pub struct FsApiClient {
    /// HTTP客户端
    client: Client,
    /// 后端地址，如 "http://127.0.0.1:5244"
    base_url: String,
    /// 预先签发的令牌，原样放入 Authorization 头
    token: Option<String>,
}

impl FsApiClient {
    /// 根据配置创建客户端
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        // 大文件上传耗时不可预估，0 表示不限制总时长
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }

        let client = builder.build().context("Failed to create HTTP client")?;

        info!(
            "初始化 API 客户端: base_url={}, token={}",
            config.base_url,
            if config.token.is_some() {
                "已设置"
            } else {
                "未设置"
            }
        );

        Ok(Self::with_client(
            client,
            config.base_url.clone(),
            config.token.clone(),
        ))
    }

    /// 使用现有的 reqwest 客户端
    pub fn with_client(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 拼接 API 地址
    pub fn api_url(&self, endpoint: &str) -> String {
        format!("{}/api{}", self.base_url, endpoint)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, token),
            None => builder,
        }
    }

    /// 申请直传票据
    ///
    /// # 参数
    /// * `dir` - 远端目标目录
    /// * `file_name` - 文件名
    /// * `file_size` - 文件大小
    /// * `overwrite` - 是否覆盖同名文件
    ///
    /// # 返回
    /// 后端不支持直传时返回 None
    pub async fn get_direct_upload_info(
        &self,
        dir: &str,
        file_name: &str,
        file_size: u64,
        overwrite: bool,
    ) -> Result<Option<UploadTicket>, UploadError> {
        let url = self.api_url("/fs/get_direct_upload_info");
        let body = DirectUploadInfoRequest {
            path: dir,
            file_name,
            file_size,
            tool: DIRECT_UPLOAD_TOOL,
        };

        debug!(
            "申请直传票据: dir={}, file={}, size={}, overwrite={}",
            dir, file_name, file_size, overwrite
        );

        let response = self
            .authorized(self.client.post(&url))
            .header("Overwrite", overwrite.to_string())
            .json(&body)
            .send()
            .await
            .map_err(UploadError::transport)?;

        let ticket: Option<UploadTicket> = Self::parse_envelope(response).await?;
        match &ticket {
            Some(t) => debug!(
                "获取直传票据成功: method={}, chunk_size={}",
                t.method(),
                t.chunk_size()
            ),
            None => warn!("后端不支持直传: file={}", file_name),
        }
        Ok(ticket)
    }

    /// 构建发往票据地址的请求
    ///
    /// 只附带票据给出的请求头
    pub fn ticket_request(&self, ticket: &UploadTicket) -> Result<RequestBuilder, UploadError> {
        let method = Method::from_bytes(ticket.method().as_bytes()).map_err(|_| {
            UploadError::InvalidResponse(format!("invalid upload method: {}", ticket.method()))
        })?;

        let mut headers = HeaderMap::new();
        for (key, value) in ticket.headers() {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                UploadError::InvalidResponse(format!("invalid ticket header name: {}", key))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                UploadError::InvalidResponse(format!("invalid ticket header value for {}", key))
            })?;
            headers.insert(name, value);
        }

        Ok(self
            .client
            .request(method, ticket.upload_url.as_str())
            .headers(headers))
    }

    /// 构建流式上传请求（PUT /api/fs/put），请求体由调用方设置
    pub fn put_stream_request(&self, meta: &PutMeta) -> RequestBuilder {
        let builder = self
            .authorized(self.client.put(self.api_url("/fs/put")))
            .header(CONTENT_TYPE, "application/octet-stream");
        Self::with_put_headers(builder, meta)
    }

    /// 构建表单上传请求（PUT /api/fs/form），表单由调用方设置
    pub fn put_form_request(&self, meta: &PutMeta) -> RequestBuilder {
        let builder = self.authorized(self.client.put(self.api_url("/fs/form")));
        Self::with_put_headers(builder, meta)
    }

    fn with_put_headers(builder: RequestBuilder, meta: &PutMeta) -> RequestBuilder {
        let mut builder = builder
            .header("File-Path", urlencoding::encode(&meta.remote_path).into_owned())
            .header("As-Task", meta.as_task.to_string())
            .header("Overwrite", meta.overwrite.to_string());

        if let Some(modified) = meta.last_modified {
            builder = builder.header("Last-Modified", modified.to_string());
        }

        if let Some(hashes) = &meta.hashes {
            builder = builder
                .header("X-File-Md5", hashes.md5.as_str())
                .header("X-File-Sha1", hashes.sha1.as_str())
                .header("X-File-Sha256", hashes.sha256.as_str());
        }

        builder
    }

    /// 解析上传接口响应
    pub async fn parse_upload_response(response: Response) -> Result<FsUploadResult, UploadError> {
        let result: Option<FsUploadResult> = Self::parse_envelope(response).await?;
        Ok(result.unwrap_or_default())
    }

    /// 解析 `{code, message, data}` 响应
    ///
    /// HTTP 状态非 2xx 时返回 HttpStatus 错误
    pub async fn parse_envelope<T: DeserializeOwned>(
        response: Response,
    ) -> Result<Option<T>, UploadError> {
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::HttpStatus {
                status: status.as_u16(),
                chunk: None,
            });
        }

        let text = response.text().await.map_err(UploadError::transport)?;
        let envelope: ApiResponse<T> = serde_json::from_str(&text).map_err(|e| {
            UploadError::InvalidResponse(format!("{}: {}", e, truncate(&text, 200)))
        })?;

        envelope.into_result()
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
