// 后端文件系统 API 模块

pub mod client;
pub mod types;

pub use client::{FsApiClient, PutMeta};
pub use types::*;
