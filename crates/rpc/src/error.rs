//! RPC 错误类型
//!
//! 每类操作一个错误枚举：选项解析、服务组装、运行循环、生命周期控制

use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::LifecycleState;
use crate::registry::RegistryError;
use crate::transport::TransportError;

/// 选项解析错误，不可重试
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("rpc service's name is required")]
    MissingName,

    #[error("rpc service's registry is required")]
    MissingRegistry,

    #[error("invalid rpc service config options: {0}")]
    Unmarshal(#[from] infra_config::ConfigError),
}

/// 服务组装错误
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("no registry backend for scheme '{0}'")]
    UnsupportedRegistry(String),

    #[error("failed to build registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("invalid command line flags: {0}")]
    Flags(#[from] clap::Error),
}

/// 运行循环错误
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("rpc service is already running")]
    AlreadyRunning,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("lifecycle hook failed: {0}")]
    Hook(String),
}

/// 生命周期控制错误
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("timeout({0:?}) waiting for rpc service server to start")]
    StartTimeout(Duration),

    #[error("timeout({0:?}) waiting for rpc service server to stop")]
    StopTimeout(Duration),

    #[error("failed to boot rpc service server: {0}")]
    Run(#[source] ServiceError),

    #[error("cannot {operation} rpc service server in state {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("{0} signal dropped before completion")]
    SignalDropped(&'static str),
}

impl LifecycleError {
    /// 是否为等待超时
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::StartTimeout(_) | Self::StopTimeout(_))
    }
}
