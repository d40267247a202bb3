//! 文件夹扫描
//!
//! 递归扫描本地文件夹，为其中每个普通文件生成一个 [`UploadTask`]：
//! 任务路径为 "文件夹名/子目录/文件名"（统一使用 `/` 分隔），上传后在远端保留目录结构。

use crate::uploader::format_bytes;
use crate::uploader::task::UploadTask;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

/// 文件夹扫描配置
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// 是否跟随符号链接
    pub follow_symlinks: bool,
    /// 跳过隐藏文件（以.开头的文件和文件夹）
    pub skip_hidden: bool,
    /// 任务路径是否以被扫描的文件夹名开头
    pub include_root_name: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            skip_hidden: false,
            include_root_name: true,
        }
    }
}

/// 文件夹扫描器
#[derive(Default)]
pub struct FolderScanner {
    options: ScanOptions,
}

impl FolderScanner {
    /// 创建默认配置的扫描器
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建自定义配置的扫描器
    pub fn with_options(options: ScanOptions) -> Self {
        Self { options }
    }

    /// 递归扫描文件夹
    ///
    /// # 参数
    /// - `root_path`: 要扫描的文件夹路径
    ///
    /// # 返回
    /// - 所有文件对应的上传任务，按任务路径排序
    pub fn scan<P: AsRef<Path>>(&self, root_path: P) -> Result<Vec<UploadTask>> {
        let root_path = root_path.as_ref();

        if !root_path.exists() {
            anyhow::bail!("扫描路径不存在: {}", root_path.display());
        }

        if !root_path.is_dir() {
            anyhow::bail!("扫描路径不是文件夹: {}", root_path.display());
        }

        info!("开始扫描文件夹: {}", root_path.display());

        let prefix = if self.options.include_root_name {
            root_path
                .canonicalize()
                .ok()
                .as_deref()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().to_string())
        } else {
            None
        };

        let mut tasks = Vec::new();
        self.scan_recursive(root_path, root_path, prefix.as_deref(), &mut tasks)?;

        tasks.sort_by(|a, b| a.path.cmp(&b.path));

        info!(
            "文件夹扫描完成: {} 个文件，总大小 {}",
            tasks.len(),
            format_bytes(tasks.iter().map(|t| t.size).sum())
        );

        Ok(tasks)
    }

    /// 递归扫描实现
    fn scan_recursive(
        &self,
        root_path: &Path,
        current_path: &Path,
        prefix: Option<&str>,
        tasks: &mut Vec<UploadTask>,
    ) -> Result<()> {
        let entries = std::fs::read_dir(current_path)
            .with_context(|| format!("读取目录失败: {}", current_path.display()))?;

        for entry in entries {
            let entry =
                entry.with_context(|| format!("读取目录条目失败: {}", current_path.display()))?;

            let path = entry.path();

            if self.options.skip_hidden && entry.file_name().to_string_lossy().starts_with('.') {
                debug!("跳过隐藏文件: {}", path.display());
                continue;
            }

            let metadata = if self.options.follow_symlinks {
                std::fs::metadata(&path)
            } else {
                std::fs::symlink_metadata(&path)
            }
            .with_context(|| format!("读取文件元数据失败: {}", path.display()))?;

            if metadata.is_dir() {
                self.scan_recursive(root_path, &path, prefix, tasks)?;
            } else if metadata.is_file() {
                let relative = path.strip_prefix(root_path).with_context(|| {
                    format!(
                        "计算相对路径失败: {} (root: {})",
                        path.display(),
                        root_path.display()
                    )
                })?;

                let mut segments: Vec<String> = Vec::new();
                if let Some(prefix) = prefix {
                    segments.push(prefix.to_string());
                }
                segments.extend(
                    relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().to_string()),
                );
                let task_path = segments.join("/");

                debug!("扫描到文件: {} ({})", task_path, format_bytes(metadata.len()));

                tasks.push(UploadTask::new(task_path, path, metadata.len()));
            } else {
                debug!("跳过非常规文件: {}", path.display());
            }
        }

        Ok(())
    }
}
