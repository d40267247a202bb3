// fs-uploader
// 网盘前端的上传引擎：批量文件并发上传、分片直传、状态事件

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 后端 API 模块
pub mod netdisk;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use config::AppConfig;
pub use netdisk::{FsApiClient, UploadTicket};
pub use uploader::{
    BatchReport, StrategyKind, UploadBatch, UploadError, UploadEvent, UploadManager,
    UploadOptions, UploadState, UploadStatus, UploadTask,
};
