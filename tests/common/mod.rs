// 集成测试用的模拟后端
//
// - POST /api/fs/get_direct_upload_info  返回预设的票据（可为 null）
// - PUT  /storage/upload                 模拟存储端，可指定第 N 次请求返回 500
// - PUT  /api/fs/put、/api/fs/form       File-Path 含 "bad" 时返回 500

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    routing::{post, put},
    Json, Router,
};
use fs_uploader::FsApiClient;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const TOKEN: &str = "test-token";

/// 后端收到的一次请求
#[derive(Debug, Clone)]
pub struct Recorded {
    pub route: &'static str,
    /// 小写的请求头
    pub headers: Vec<(String, String)>,
    pub body_len: usize,
    /// JSON 请求体（仅票据请求）
    pub json: Option<Value>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct MockState {
    ticket: Mutex<Value>,
    /// 第几次存储请求（从 0 开始）返回 500
    storage_fail_on: Mutex<Option<usize>>,
    storage_calls: Mutex<usize>,
    /// PUT 接口返回的任务 id
    task_id: Mutex<Option<String>>,
    requests: Mutex<Vec<Recorded>>,
}

impl MockState {
    fn record(&self, route: &'static str, headers: &HeaderMap, body_len: usize) {
        self.record_json(route, headers, body_len, None);
    }

    fn record_json(
        &self,
        route: &'static str,
        headers: &HeaderMap,
        body_len: usize,
        json: Option<Value>,
    ) {
        let headers = headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        self.requests.lock().unwrap().push(Recorded {
            route,
            headers,
            body_len,
            json,
        });
    }
}

pub struct MockBackend {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        *state.ticket.lock().unwrap() = Value::Null;

        let app = Router::new()
            .route("/api/fs/get_direct_upload_info", post(direct_upload_info))
            .route("/storage/upload", put(storage_upload))
            .route("/api/fs/put", put(fs_put))
            .route("/api/fs/form", put(fs_form))
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn client(&self) -> FsApiClient {
        FsApiClient::with_client(
            reqwest::Client::new(),
            self.base_url.clone(),
            Some(TOKEN.to_string()),
        )
    }

    /// 设置直传票据，chunk_size 为 0 表示不分片
    pub fn set_ticket(&self, chunk_size: u64, headers: Value) {
        *self.state.ticket.lock().unwrap() = json!({
            "upload_url": format!("{}/storage/upload", self.base_url),
            "method": "PUT",
            "headers": headers,
            "chunk_size": chunk_size,
        });
    }

    pub fn fail_storage_on(&self, call: usize) {
        *self.state.storage_fail_on.lock().unwrap() = Some(call);
    }

    pub fn set_task_id(&self, id: &str) {
        *self.state.task_id.lock().unwrap() = Some(id.to_string());
    }

    pub fn requests(&self, route: &str) -> Vec<Recorded> {
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.route == route)
            .cloned()
            .collect()
    }
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({ "code": 200, "message": "success", "data": data }))
}

async fn direct_upload_info(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let json = serde_json::from_slice(&body).ok();
    state.record_json("ticket", &headers, body.len(), json);
    let ticket = state.ticket.lock().unwrap().clone();
    envelope(ticket)
}

async fn storage_upload(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.record("storage", &headers, body.len());

    let mut calls = state.storage_calls.lock().unwrap();
    let current = *calls;
    *calls += 1;

    if *state.storage_fail_on.lock().unwrap() == Some(current) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

fn put_reply(state: &MockState, headers: &HeaderMap) -> Result<Json<Value>, StatusCode> {
    let file_path = headers
        .get("file-path")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if file_path.contains("bad") {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let data = match state.task_id.lock().unwrap().as_deref() {
        Some(id) => json!({ "task": { "id": id, "name": "upload", "state": 0 } }),
        None => Value::Null,
    };
    Ok(envelope(data))
}

async fn fs_put(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    state.record("put", &headers, body.len());
    put_reply(&state, &headers)
}

async fn fs_form(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    state.record("form", &headers, body.len());
    put_reply(&state, &headers)
}

/// 写入指定大小的测试文件（内容为递增字节）
pub fn write_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}
