use anyhow::{Context, Result};
use clap::Parser;
use fs_uploader::{
    config::{LogConfig, DEFAULT_CONFIG_PATH},
    logging,
    uploader::{format_bytes, FolderScanner, ScanOptions},
    AppConfig, FsApiClient, StrategyKind, UploadBatch, UploadEvent, UploadManager, UploadStatus,
    UploadTask,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 批量上传本地文件/文件夹到网盘
#[derive(Parser, Debug)]
#[clap(name = "fs-uploader", version, about = "Batch uploader for the netdisk file API")]
struct Cli {
    /// 要上传的本地文件或文件夹
    #[clap(required = true)]
    paths: Vec<PathBuf>,

    /// 远端目标目录
    #[clap(short, long, default_value = "/")]
    target: String,

    /// 上传方式：direct / stream / rapid / task
    #[clap(short, long)]
    strategy: Option<StrategyKind>,

    /// 最大同时上传文件数
    #[clap(short, long)]
    concurrency: Option<usize>,

    /// 覆盖同名文件
    #[clap(long)]
    overwrite: bool,

    /// 作为后台任务上传
    #[clap(long)]
    as_task: bool,

    /// 计算哈希并尝试秒传
    #[clap(long)]
    rapid: bool,

    /// 配置文件路径
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// 覆盖配置中的后端地址
    #[clap(long)]
    base_url: Option<String>,

    /// 覆盖配置中的令牌
    #[clap(long)]
    token: Option<String>,
}

/// 加载日志配置
///
/// 日志系统要先于完整配置初始化，这里只读取 [log] 段，失败时返回默认配置
async fn load_log_config(path: &str) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

/// 把命令行路径展开为上传任务（文件夹递归扫描）
async fn collect_tasks(paths: &[PathBuf], scanner: &FolderScanner) -> Result<Vec<UploadTask>> {
    let mut tasks = Vec::new();

    for path in paths {
        if path.is_dir() {
            let scanned = scanner
                .scan(path)
                .with_context(|| format!("扫描文件夹失败: {:?}", path))?;
            tasks.extend(scanned);
        } else {
            let task = UploadTask::from_file(path)
                .await
                .with_context(|| format!("读取文件失败: {:?}", path))?;
            tasks.push(task);
        }
    }

    Ok(tasks)
}

fn print_event(event: UploadEvent) -> bool {
    match event {
        UploadEvent::Finished {
            path,
            status,
            message,
        } => {
            match status {
                UploadStatus::Succeeded => info!("✓ {}", path),
                _ => warn!("✗ {}: {}", path, message),
            }
            true
        }
        event => {
            debug!("[{}] {:?}", event.event_type_name(), event.path());
            false
        }
    }
}

/// 打印状态事件，返回打印的终态事件数
///
/// `done` 触发后取完通道里剩余的事件再退出
async fn print_events(mut rx: broadcast::Receiver<UploadEvent>, done: CancellationToken) -> usize {
    let mut finished = 0;
    loop {
        tokio::select! {
            biased;
            event = rx.recv() => match event {
                Ok(event) => finished += usize::from(print_event(event)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("事件接收落后，跳过 {} 条", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = done.cancelled() => {
                loop {
                    match rx.try_recv() {
                        Ok(event) => finished += usize::from(print_event(event)),
                        Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
                break;
            }
        }
    }
    finished
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(base_url) = &cli.base_url {
        config.api.base_url = base_url.clone();
    }
    if let Some(token) = &cli.token {
        config.api.token = Some(token.clone());
    }
    if let Some(strategy) = cli.strategy {
        config.upload.strategy = strategy;
    }
    if let Some(concurrency) = cli.concurrency {
        config.upload.concurrency = concurrency;
    }
    config.upload.overwrite |= cli.overwrite;
    config.upload.as_task |= cli.as_task;
    config.upload.try_rapid |= cli.rapid;
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 先初始化日志系统（必须保持 _log_guard 存活）
    let log_config = load_log_config(&cli.config).await;
    let _log_guard = logging::init_logging(&log_config);

    info!("fs-uploader v{} 启动", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load_or_default(&cli.config).await;
    apply_overrides(&mut config, &cli);
    config.upload.validate()?;

    let client = FsApiClient::new(&config.api)?;
    let manager = Arc::new(UploadManager::with_config(client, &config.upload));

    let scanner = FolderScanner::with_options(ScanOptions {
        skip_hidden: config.upload.skip_hidden_files,
        ..Default::default()
    });
    let tasks = collect_tasks(&cli.paths, &scanner).await?;
    let total_size: u64 = tasks.iter().map(|t| t.size).sum();
    info!(
        "共 {} 个文件，{}，上传方式: {}，目标目录: {}",
        tasks.len(),
        format_bytes(total_size),
        config.upload.strategy,
        cli.target
    );

    let printer_done = CancellationToken::new();
    let printer = tokio::spawn(print_events(manager.subscribe(), printer_done.clone()));

    // Ctrl-C 取消当前批次
    let cancel_manager = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，取消上传...");
            cancel_manager.cancel();
        }
    });

    let batch = UploadBatch::new(cli.target.clone(), tasks)
        .with_strategy(config.upload.strategy)
        .with_concurrency(config.upload.concurrency)
        .with_options(config.upload.options());

    let report = manager.submit(batch).await?;

    // 终态事件在 submit 返回前都已发布，等打印任务取完
    printer_done.cancel();
    if let Err(e) = printer.await {
        debug!("事件打印任务异常结束: {}", e);
    }

    info!(
        "上传结束: 成功 {}，失败 {}，已上传 {}，耗时 {:.1}s",
        report.succeeded(),
        report.failed(),
        format_bytes(report.uploaded_bytes()),
        report.elapsed_ms as f64 / 1000.0
    );

    if report.all_succeeded() {
        Ok(())
    } else {
        for file in report.files.iter().filter(|f| f.status != UploadStatus::Succeeded) {
            error!("{}: {}", file.path, file.message);
        }
        anyhow::bail!("{} 个文件上传失败", report.failed())
    }
}
