//! telemetry - 可观测性库
//!
//! 日志器是显式构造的 `Logger` 句柄，由调用方传给每个组件；
//! 组件只在 `in_scope` / `scope` 范围内把它作为默认 dispatcher 使用。

use std::fmt;
use std::future::Future;

use infra_config::TelemetryConfig;
use tracing::Dispatch;
use tracing::dispatcher::SetGlobalDefaultError;
use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing::subscriber::NoSubscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 日志器句柄，克隆开销很小
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

impl Logger {
    /// 按遥测配置构建日志器
    pub fn from_config(config: &TelemetryConfig) -> Self {
        if config.json {
            Self::json(&config.log_level)
        } else {
            Self::plain(&config.log_level)
        }
    }

    /// 文本格式日志器
    pub fn plain(log_level: &str) -> Self {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter(log_level))
            .with(tracing_subscriber::fmt::layer());
        Self::from_dispatch(Dispatch::new(subscriber))
    }

    /// JSON 格式日志器（生产环境）
    pub fn json(log_level: &str) -> Self {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter(log_level))
            .with(tracing_subscriber::fmt::layer().json());
        Self::from_dispatch(Dispatch::new(subscriber))
    }

    /// 写入指定 writer 的文本日志器，不读取 `RUST_LOG`
    pub fn with_writer<W>(log_level: &str, writer: W) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new(log_level))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            );
        Self::from_dispatch(Dispatch::new(subscriber))
    }

    /// 丢弃所有事件的日志器
    pub fn disabled() -> Self {
        Self::from_dispatch(Dispatch::new(NoSubscriber::default()))
    }

    pub fn from_dispatch(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// 以本日志器为默认 dispatcher 执行同步闭包
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    /// 将本日志器绑定到 future 的每次 poll
    pub fn scope<F: Future>(&self, future: F) -> WithDispatch<F> {
        future.with_subscriber(self.dispatch.clone())
    }

    /// 安装为进程级默认 dispatcher
    ///
    /// 仅供二进制入口使用，让第三方库的日志也走同一个输出。
    pub fn install_global(&self) -> Result<(), SetGlobalDefaultError> {
        tracing::dispatcher::set_global_default(self.dispatch.clone())
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}
