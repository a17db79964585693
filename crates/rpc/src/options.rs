//! 服务选项解析
//!
//! 从 `rpc` 配置子树合并出带默认值、经过校验的 `ServiceOptions`

use std::collections::HashMap;
use std::time::Duration;

use infra_config::Config;
use infra_telemetry::Logger;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::flags::FrameworkFlags;
use crate::registry::RegistryBinding;

/// RPC 配置键
pub const CONF_RPC: &str = "rpc";

pub const DEFAULT_REGISTER_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_REGISTER_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(6);
/// 在途等待上限，须小于默认停止等待时间
pub const MAX_DRAIN_TIMEOUT: Duration = Duration::from_secs(7);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRIES: usize = 3;
/// 重试次数上限（不含）
pub const MAX_RETRIES: i64 = 8;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawServiceOptions {
    name: String,
    registry: String,
    address: String,
    metadata: HashMap<String, String>,
    server: Option<RawServerOptions>,
    client: Option<RawClientOptions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawServerOptions {
    register_ttl_secs: u64,
    register_interval_secs: u64,
    drain_timeout_secs: u64,
    log_error: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawClientOptions {
    request_timeout_secs: u64,
    dial_timeout_secs: u64,
    retries: i64,
    load_balance: String,
    log_error: bool,
}

/// 负载均衡策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadBalance {
    #[default]
    Random,
    RoundRobin,
}

impl LoadBalance {
    /// 按名称解析，无法识别时返回 None
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "" | "random" => Some(Self::Random),
            "roundrobin" | "round_robin" => Some(Self::RoundRobin),
            _ => None,
        }
    }
}

/// 服务端选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// 注册过期时间
    pub register_ttl: Duration,
    /// 注册刷新间隔，不超过 TTL 的一半
    pub register_interval: Duration,
    /// 关闭时等待在途请求的最长时间
    pub drain_timeout: Duration,
    /// 处理失败时记录错误日志
    pub log_error: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            register_ttl: DEFAULT_REGISTER_TTL,
            register_interval: effective_register_interval(
                DEFAULT_REGISTER_INTERVAL,
                DEFAULT_REGISTER_TTL,
            ),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            log_error: false,
        }
    }
}

impl ServerOptions {
    fn from_raw(raw: RawServerOptions) -> Self {
        let register_ttl = positive_secs(raw.register_ttl_secs).unwrap_or(DEFAULT_REGISTER_TTL);
        let register_interval =
            positive_secs(raw.register_interval_secs).unwrap_or(DEFAULT_REGISTER_INTERVAL);
        Self {
            register_ttl,
            register_interval: effective_register_interval(register_interval, register_ttl),
            drain_timeout: positive_secs(raw.drain_timeout_secs)
                .unwrap_or(DEFAULT_DRAIN_TIMEOUT)
                .min(MAX_DRAIN_TIMEOUT),
            log_error: raw.log_error,
        }
    }
}

/// 客户端选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub dial_timeout: Duration,
    /// 连接类故障的最大重试次数（不含首次调用）
    pub retries: usize,
    pub load_balance: LoadBalance,
    /// 调用失败时记录错误日志
    pub log_error: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            retries: DEFAULT_RETRIES,
            load_balance: LoadBalance::Random,
            log_error: false,
        }
    }
}

/// 服务选项
///
/// 进程启动时构造一次，组装后不再修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    pub name: String,
    /// 注册中心地址，可带 `etcd://` 前缀
    pub registry: String,
    /// 服务监听地址，为空时由传输层分配
    pub address: String,
    /// 注册时广播的静态元数据
    pub metadata: HashMap<String, String>,
    pub server: ServerOptions,
    pub client: ClientOptions,
}

impl ServiceOptions {
    pub fn new(name: impl Into<String>, registry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: registry.into(),
            address: String::new(),
            metadata: HashMap::new(),
            server: ServerOptions::default(),
            client: ClientOptions::default(),
        }
    }

    /// 从配置解析服务选项
    ///
    /// 服务名优先取 `rpc.name`，否则取应用名
    pub fn resolve(config: &Config, logger: &Logger) -> Result<Self, ConfigError> {
        let raw: RawServiceOptions = if config.is_set(CONF_RPC) {
            config.unmarshal_key(CONF_RPC)?
        } else {
            RawServiceOptions::default()
        };

        let name = if raw.name.is_empty() {
            config.application_name().unwrap_or_default()
        } else {
            raw.name
        };
        if name.is_empty() {
            return Err(ConfigError::MissingName);
        }
        if raw.registry.is_empty() {
            return Err(ConfigError::MissingRegistry);
        }

        let raw_server = raw.server.unwrap_or_default();
        if raw_server.drain_timeout_secs > MAX_DRAIN_TIMEOUT.as_secs() {
            logger.in_scope(|| {
                warn!(
                    configured = raw_server.drain_timeout_secs,
                    max = ?MAX_DRAIN_TIMEOUT,
                    "drain timeout exceeds the stop budget, clamping"
                )
            });
        }

        let raw_client = raw.client.unwrap_or_default();
        let load_balance = LoadBalance::from_name(&raw_client.load_balance).unwrap_or_else(|| {
            logger.in_scope(|| {
                warn!(
                    strategy = %raw_client.load_balance,
                    "unknown load balance strategy, falling back to random"
                )
            });
            LoadBalance::Random
        });
        let client = ClientOptions {
            request_timeout: positive_secs(raw_client.request_timeout_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            dial_timeout: positive_secs(raw_client.dial_timeout_secs)
                .unwrap_or(DEFAULT_DIAL_TIMEOUT),
            retries: effective_retries(raw_client.retries),
            load_balance,
            log_error: raw_client.log_error,
        };

        let options = Self {
            name,
            registry: raw.registry,
            address: raw.address,
            metadata: raw.metadata,
            server: ServerOptions::from_raw(raw_server),
            client,
        };

        logger.in_scope(|| {
            info!(
                service = %options.name,
                registry = %options.registry,
                "build rpc service from registry"
            )
        });
        Ok(options)
    }

    /// 注册中心绑定，仅识别带协议前缀的地址
    pub fn registry_binding(&self) -> Option<RegistryBinding> {
        RegistryBinding::parse(&self.registry)
    }

    /// 用命令行参数覆盖选项，刷新间隔重新按 TTL 约束
    pub fn apply_flags(&mut self, flags: &FrameworkFlags) {
        if let Some(name) = flags.server_name.as_ref().filter(|n| !n.is_empty()) {
            self.name = name.clone();
        }
        if let Some(address) = &flags.server_address {
            self.address = address.clone();
        }
        if let Some(ttl) = flags.register_ttl.filter(|d| !d.is_zero()) {
            self.server.register_ttl = ttl;
        }
        if let Some(interval) = flags.register_interval.filter(|d| !d.is_zero()) {
            self.server.register_interval = interval;
        }
        self.server.register_interval =
            effective_register_interval(self.server.register_interval, self.server.register_ttl);
    }
}

/// 有效刷新间隔：`min(interval, ttl / 2)`
pub fn effective_register_interval(interval: Duration, ttl: Duration) -> Duration {
    interval.min(ttl / 2)
}

/// 有效重试次数：`[1, 8)` 之外回落到默认值 3
pub fn effective_retries(configured: i64) -> usize {
    if (1..MAX_RETRIES).contains(&configured) {
        configured as usize
    } else {
        DEFAULT_RETRIES
    }
}

fn positive_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
