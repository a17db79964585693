//! 生命周期控制
//!
//! 状态：`Idle → Starting → Running → Stopping → Stopped`，
//! 启动或停止失败进入终态 `Failed`。每次启动、停止都只尝试一次，
//! 超时和显式失败同样视为该操作失败，由上层决定是否退出进程。

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use infra_telemetry::Logger;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::client::RpcClient;
use crate::error::{LifecycleError, ServiceError};
use crate::service::Service;

/// 等待启动信号的默认上限
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);
/// 等待停止信号的默认上限
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimeouts {
    pub start: Duration,
    pub stop: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            start: DEFAULT_START_TIMEOUT,
            stop: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// RPC 服务的生命周期控制器
pub struct RpcServer {
    service: Arc<Service>,
    logger: Logger,
    state: Mutex<LifecycleState>,
    timeouts: LifecycleTimeouts,
}

impl RpcServer {
    pub fn new(service: Service, logger: Logger) -> Self {
        Self::with_timeouts(service, logger, LifecycleTimeouts::default())
    }

    pub fn with_timeouts(service: Service, logger: Logger, timeouts: LifecycleTimeouts) -> Self {
        Self {
            service: Arc::new(service),
            logger,
            state: Mutex::new(LifecycleState::Idle),
            timeouts,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn client(&self) -> RpcClient {
        self.service.client()
    }

    fn transition(
        &self,
        operation: &'static str,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(LifecycleError::InvalidState {
                operation,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn settle(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// 启动服务并等待启动信号
    ///
    /// 运行循环在独立任务中执行；启动信号、运行失败、等待超时三者中
    /// 先到者决定结果，其余的被丢弃。
    pub async fn start(&self) -> Result<(), LifecycleError> {
        self.transition("start", LifecycleState::Idle, LifecycleState::Starting)?;
        let started = self.service.signals().started.arm();
        let (fail_tx, fail_rx) = oneshot::channel::<ServiceError>();

        let service = self.service.clone();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            if let Err(err) = service.run().await {
                logger.in_scope(|| {
                    error!(error = %err, "rpc service run loop exited with error")
                });
                let _ = fail_tx.send(err);
            }
        });

        let budget = self.timeouts.start;
        let outcome = tokio::select! {
            signal = started => signal.map_err(|_| LifecycleError::SignalDropped("start")),
            Ok(err) = fail_rx => Err(LifecycleError::Run(err)),
            _ = tokio::time::sleep(budget) => Err(LifecycleError::StartTimeout(budget)),
        };

        match &outcome {
            Ok(()) => {
                self.settle(LifecycleState::Running);
                self.logger.in_scope(|| {
                    info!(service = %self.service.name(), "rpc service server started")
                });
            }
            Err(err) => {
                self.settle(LifecycleState::Failed);
                if err.is_timeout() {
                    // 运行循环可能仍卡在启动阶段，请求其自行退出
                    self.service.shutdown_handle().cancel();
                }
                self.logger.in_scope(|| {
                    error!(
                        service = %self.service.name(),
                        error = %err,
                        "rpc service server failed to start"
                    )
                });
            }
        }
        outcome
    }

    /// 触发关闭并等待停止信号
    ///
    /// 在途请求的等待发生在服务的停止钩子内，这里只等待钩子完成。
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        self.transition("stop", LifecycleState::Running, LifecycleState::Stopping)?;
        let stopped = self.service.signals().stopped.arm();
        self.service.shutdown_handle().cancel();

        let budget = self.timeouts.stop;
        let outcome = match tokio::time::timeout(budget, stopped).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(LifecycleError::SignalDropped("stop")),
            Err(_) => Err(LifecycleError::StopTimeout(budget)),
        };

        match &outcome {
            Ok(()) => {
                self.settle(LifecycleState::Stopped);
                self.logger.in_scope(|| {
                    info!(service = %self.service.name(), "rpc service server stopped")
                });
            }
            Err(err) => {
                self.settle(LifecycleState::Failed);
                self.logger.in_scope(|| {
                    warn!(
                        service = %self.service.name(),
                        error = %err,
                        "rpc service server failed to stop"
                    )
                });
            }
        }
        outcome
    }
}

impl fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("service", &self.service)
            .field("state", &self.state())
            .field("timeouts", &self.timeouts)
            .finish()
    }
}
