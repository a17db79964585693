//! Graceful Shutdown

use std::future::Future;

use infra_telemetry::Logger;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shutdown 控制器
///
/// 可以在进程内主动触发关闭，触发后所有等待者立即返回，之后的等待也不会阻塞。
#[derive(Clone)]
pub struct ShutdownController {
    token: CancellationToken,
    logger: Logger,
}

impl ShutdownController {
    pub fn new(logger: Logger) -> Self {
        Self {
            token: CancellationToken::new(),
            logger,
        }
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            self.logger.in_scope(|| info!("Triggering shutdown"));
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待关闭信号
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        self.token.clone().cancelled_owned()
    }

    /// 收到进程信号或主动触发时返回，先到者为准
    pub async fn wait_or_signal(&self) {
        tokio::select! {
            _ = self.wait() => {},
            _ = crate::shutdown_signal(&self.logger) => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let controller = ShutdownController::new(Logger::disabled());
        let waiter = tokio::spawn(controller.wait());

        controller.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(controller.is_shutdown());
    }

    #[tokio::test]
    async fn test_wait_after_shutdown_returns_immediately() {
        let controller = ShutdownController::new(Logger::disabled());
        controller.shutdown();
        controller.shutdown();
        tokio::time::timeout(Duration::from_millis(100), controller.wait())
            .await
            .unwrap();
    }
}
