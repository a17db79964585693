//! 服务运行时

use infra_config::{Config, ConfigError};
use infra_telemetry::Logger;
use tracing::{info, warn};

/// 服务运行时配置
pub struct RuntimeConfig {
    pub config_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_dir: "config".to_string(),
        }
    }
}

/// 初始化服务运行时，返回按遥测配置构建的日志器
pub fn init_runtime(config: &Config) -> Result<Logger, ConfigError> {
    let telemetry = config.telemetry()?;
    let logger = Logger::from_config(&telemetry);

    logger.in_scope(|| {
        info!(
            app_name = %config.application_name().unwrap_or_default(),
            app_env = %config.environment(),
            "Runtime initialized"
        )
    });
    Ok(logger)
}

/// 等待关闭信号：Ctrl+C、SIGTERM、SIGQUIT
///
/// 某个信号无法监听时只记录警告，其余信号照常生效。
pub async fn shutdown_signal(logger: &Logger) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            logger.in_scope(|| warn!(error = %err, "Failed to install Ctrl+C handler"));
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(logger, tokio::signal::unix::SignalKind::terminate());
    #[cfg(unix)]
    let quit = unix_signal(logger, tokio::signal::unix::SignalKind::quit());

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = quit => {},
    }

    logger.in_scope(|| info!("Shutdown signal received"));
}

#[cfg(unix)]
async fn unix_signal(logger: &Logger, kind: tokio::signal::unix::SignalKind) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut signal) => {
            signal.recv().await;
        }
        Err(err) => {
            logger.in_scope(|| warn!(error = %err, "Failed to install signal handler"));
            std::future::pending::<()>().await;
        }
    }
}
