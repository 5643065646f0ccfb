use std::sync::Arc;

use anyhow::{Context, Result};
use capacity::coordinator::CoordinatorBuilder;
use capacity_core::config::{AppConfig, LogFormat};
use capacity_core::init_logging;
use capacity_dispatcher::ShellTaskHandler;
use capacity_observability::install_prometheus_exporter;
use clap::{Arg, ArgMatches, Command};
use tokio::signal;
use tracing::{error, info, warn};

/// Shell处理器在注册表中的任务类型
const SHELL_HANDLER: &str = "shell";

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("capacity")
        .version(env!("CARGO_PKG_VERSION"))
        .about("容量管理与负载分发服务")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时依次查找默认位置"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config = load_config(&matches)?;
    init_logging(&config.logging)?;

    info!("启动容量管理服务");
    info!(
        queues = config.queues.len(),
        min_workers = config.scaling.min_workers,
        max_workers = config.scaling.max_workers,
        primary = %config.router.primary.id,
        replicas = config.router.replicas.len(),
        "配置加载完成"
    );

    if let Some(addr) = config.observability.prometheus_addr()? {
        install_prometheus_exporter(addr)?;
    }

    let mut builder = CoordinatorBuilder::new(config.clone());
    if config.queues.iter().any(|q| q.handler == SHELL_HANDLER) {
        builder = builder.with_handler(SHELL_HANDLER, Arc::new(ShellTaskHandler::new()));
    }
    let coordinator = Arc::new(builder.build().context("组装协调器失败")?);
    coordinator.start().await.context("启动协调器失败")?;

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        _ = coordinator.wait_for_shutdown() => {
            warn!("协调器内部触发关闭");
        }
    }

    let aborted = coordinator.shutdown().await;
    if aborted > 0 {
        warn!(aborted, "部分Worker未能在超时内退出，已强制中止");
    }

    info!("容量管理服务已退出");
    Ok(())
}

/// 加载配置并应用命令行覆盖
fn load_config(matches: &ArgMatches) -> Result<AppConfig> {
    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<默认路径>")))?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.logging.format = format
            .parse::<LogFormat>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(config)
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
