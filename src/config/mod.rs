// 配置管理模块

use crate::uploader::{StrategyKind, UploadOptions, DEFAULT_CONCURRENCY, DEFAULT_SPEED_INTERVAL_MS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 后端 API 配置
    #[serde(default)]
    pub api: ApiConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 后端 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// 后端地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 预先签发的令牌（放入 Authorization 头）
    #[serde(default)]
    pub token: Option<String>,
    /// 单个请求总超时（秒），0 表示不限制
    #[serde(default)]
    pub timeout_secs: u64,
    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:5244".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// 最大同时上传文件数
    pub concurrency: usize,
    /// 默认上传方式
    pub strategy: StrategyKind,
    /// 覆盖同名文件
    pub overwrite: bool,
    /// 作为后台任务上传
    pub as_task: bool,
    /// 尝试秒传
    pub try_rapid: bool,
    /// 测速节流间隔（毫秒）
    pub speed_interval_ms: u64,
    /// 上传文件夹时是否跳过隐藏文件（以.开头的文件/文件夹）
    pub skip_hidden_files: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            strategy: StrategyKind::Direct,
            overwrite: false,
            as_task: false,
            try_rapid: false,
            speed_interval_ms: DEFAULT_SPEED_INTERVAL_MS,
            skip_hidden_files: false,
        }
    }
}

impl UploadConfig {
    /// 校验取值范围
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("upload.concurrency 必须大于 0");
        }
        if self.speed_interval_ms == 0 {
            anyhow::bail!("upload.speed_interval_ms 必须大于 0");
        }
        Ok(())
    }

    /// 批次上传选项
    pub fn options(&self) -> UploadOptions {
        UploadOptions {
            as_task: self.as_task,
            overwrite: self.overwrite,
            try_rapid: self.try_rapid,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config.upload.validate().context("配置文件中的上传参数无效")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.upload
            .validate()
            .context("保存配置失败：上传参数无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 只在文件不存在时写出默认配置，避免覆盖用户写错的文件
                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.upload.concurrency, 3);
        assert_eq!(config.upload.strategy, StrategyKind::Direct);
        assert_eq!(config.upload.speed_interval_ms, 500);
        assert_eq!(config.api.base_url, "http://127.0.0.1:5244");
        assert!(config.upload.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config/app.toml");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.api.token = Some("abc".to_string());
        config.upload.strategy = StrategyKind::Stream;
        config.upload.overwrite = true;
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.api.token.as_deref(), Some("abc"));
        assert_eq!(loaded.upload.strategy, StrategyKind::Stream);
        assert!(loaded.upload.options().overwrite);
    }

    #[tokio::test]
    async fn test_partial_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(
            &path,
            "[api]\nbase_url = \"http://nas:5244\"\n\n[upload]\nconcurrency = 5\n",
        )
        .unwrap();

        let loaded = AppConfig::load_from_file(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(loaded.api.base_url, "http://nas:5244");
        assert_eq!(loaded.api.connect_timeout_secs, 10);
        assert_eq!(loaded.upload.concurrency, 5);
        assert_eq!(loaded.upload.speed_interval_ms, 500);
        assert!(loaded.log.enabled);
    }

    #[tokio::test]
    async fn test_invalid_concurrency() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, "[upload]\nconcurrency = 0\n").unwrap();

        assert!(AppConfig::load_from_file(path.to_str().unwrap())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.toml");
        let path = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path).await;
        assert_eq!(config.upload.concurrency, 3);
        assert!(std::path::Path::new(path).exists());
    }
}
