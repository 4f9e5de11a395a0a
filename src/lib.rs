//! Photoindex - 照片库扫描与索引服务
//!
//! Loads settings, opens the index, scans every registered root once and
//! then keeps rescanning on the configured interval until interrupted.

use std::sync::Arc;

use anyhow::Context;
use photoindex_core::{
    services::{Capabilities, FfmpegVideoProber}, DataDirPathProvider, LoggingEventSink, PathProvider, PhotoindexCore,
    SettingsManager, SharedPathProvider, TriggerOutcome,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志系统：stdout + 按天滚动的日志文件
fn init_logging(paths: &dyn PathProvider) -> anyhow::Result<WorkerGuard> {
    let logs_dir = paths.logs_dir();
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("无法创建日志目录: {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&logs_dir, "photoindex.log"));

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .context("无法初始化日志系统")?;

    Ok(guard)
}

pub fn run() -> anyhow::Result<()> {
    let paths: SharedPathProvider = Arc::new(DataDirPathProvider::from_env());
    let _guard = init_logging(paths.as_ref())?;

    tracing::info!("Photoindex 启动中...");
    tracing::info!("数据目录: {:?}", paths.app_data_dir());

    let settings = SettingsManager::new(paths.as_ref())
        .and_then(|manager| manager.load())
        .context("无法加载设置")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("photoindex")
        .build()
        .context("无法创建异步运行时")?;

    runtime.block_on(serve(paths, settings))
}

async fn serve(
    paths: SharedPathProvider,
    settings: photoindex_core::AppSettings,
) -> anyhow::Result<()> {
    let mut capabilities = Capabilities::default();
    if let Some(prober) = FfmpegVideoProber::detect() {
        tracing::info!("视频探测已启用 (ffprobe/ffmpeg)");
        capabilities = capabilities.with_video_prober(Arc::new(prober));
    }
    let core = Arc::new(
        PhotoindexCore::new(paths, Arc::new(LoggingEventSink), settings, capabilities)
            .context("无法初始化索引")?,
    );
    tracing::info!("已注册 {} 个根目录", core.roots()?.len());

    core.start();

    let initial = {
        let core = Arc::clone(&core);
        tokio::spawn(async move {
            match core.scheduler().scan_all().await {
                Ok(outcomes) => {
                    for (root_id, outcome) in outcomes {
                        match outcome {
                            Ok(TriggerOutcome::Completed { result }) => tracing::info!(
                                "初始扫描完成 root {}: {:?}, {} 个失败",
                                root_id,
                                result.outcome,
                                result.failures.len()
                            ),
                            Ok(TriggerOutcome::AlreadyRunning { .. }) => {
                                tracing::debug!("Root {} was already scanning", root_id)
                            }
                            Err(e) => tracing::error!("初始扫描失败 root {}: {}", root_id, e),
                        }
                    }
                }
                Err(e) => tracing::error!("无法列出根目录: {}", e),
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("无法监听退出信号")?;
    tracing::info!("收到退出信号，正在停止...");

    core.shutdown().await;
    if let Err(e) = initial.await {
        tracing::warn!("Initial scan task ended abnormally: {}", e);
    }

    tracing::info!("Photoindex 已退出");
    Ok(())
}
