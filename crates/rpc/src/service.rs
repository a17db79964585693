//! 服务组装与运行循环
//!
//! `assemble` 只做配置，不做任何网络 I/O；`Service::run` 负责监听、注册、
//! 续约、注销，并在启动完成和停止完成时执行生命周期钩子。

use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Command;
use futures::FutureExt;
use futures::future::BoxFuture;
use infra_common::{InFlightCounter, OneShotSignal};
use infra_telemetry::Logger;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{Client, RpcClient};
use crate::error::{AssemblyError, ServiceError};
use crate::flags::{framework_command, mirror_flags, parse_flags};
use crate::interceptor::{self, Chain, Chained, ExtendChain, Handler};
use crate::options::ServiceOptions;
use crate::registry::{MemoryRegistry, Node, Registry, RegistryFactory, ServiceRecord};
use crate::router::Router;
use crate::transport::{MemoryTransport, Transport};

/// 生命周期钩子
pub type LifecycleHook =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), ServiceError>> + Send + Sync>;

/// 处理器注册函数
pub type HandlerRegister = Arc<dyn Fn(&mut Router) + Send + Sync>;

/// 启动 / 停止完成信号
///
/// 由服务的钩子写入，由生命周期控制器在每个周期装配并读取。
#[derive(Default)]
pub struct LifecycleSignals {
    pub started: OneShotSignal,
    pub stopped: OneShotSignal,
}

/// RPC 模块配置器
///
/// 应用通过它扩展拦截器链、注册处理器、替换注册中心与传输层。
#[derive(Clone, Default)]
pub struct RpcModuleConfigurer {
    pub client_interceptors: Option<ExtendChain>,
    pub node_interceptors: Option<ExtendChain>,
    pub handler_interceptors: Option<ExtendChain>,
    pub handler_register: Option<HandlerRegister>,
    pub after_start: Vec<LifecycleHook>,
    /// 未绑定注册中心前缀时使用，缺省为进程内注册中心
    pub registry: Option<Arc<dyn Registry>>,
    /// 由注册中心绑定构造注册中心
    pub registry_factory: Option<RegistryFactory>,
    pub transport: Option<Arc<dyn Transport>>,
    /// 应用的命令行定义，其参数会镜像进框架命令
    pub app_command: Option<Command>,
    /// 待解析的命令行，为 None 时不解析框架参数
    pub args: Option<Vec<OsString>>,
}

impl RpcModuleConfigurer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_interceptors(
        mut self,
        extend: impl Fn(Chain) -> Chain + Send + Sync + 'static,
    ) -> Self {
        self.client_interceptors = Some(Arc::new(extend));
        self
    }

    pub fn with_node_interceptors(
        mut self,
        extend: impl Fn(Chain) -> Chain + Send + Sync + 'static,
    ) -> Self {
        self.node_interceptors = Some(Arc::new(extend));
        self
    }

    pub fn with_handler_interceptors(
        mut self,
        extend: impl Fn(Chain) -> Chain + Send + Sync + 'static,
    ) -> Self {
        self.handler_interceptors = Some(Arc::new(extend));
        self
    }

    pub fn with_handlers(mut self, register: impl Fn(&mut Router) + Send + Sync + 'static) -> Self {
        self.handler_register = Some(Arc::new(register));
        self
    }

    /// 追加启动完成后执行的钩子，先于启动信号执行
    pub fn with_after_start(mut self, hook: LifecycleHook) -> Self {
        self.after_start.push(hook);
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_registry_factory(mut self, factory: RegistryFactory) -> Self {
        self.registry_factory = Some(factory);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_app_command(mut self, command: Command) -> Self {
        self.app_command = Some(command);
        self
    }

    pub fn with_args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }
}

/// 组装好的 RPC 服务
pub struct Service {
    options: ServiceOptions,
    logger: Logger,
    node_id: String,
    registry: Arc<dyn Registry>,
    transport: Arc<dyn Transport>,
    client: RpcClient,
    handler: Arc<Chained>,
    inflight: InFlightCounter,
    /// 已被监听器接收、尚未应答的请求
    accepted: InFlightCounter,
    signals: Arc<LifecycleSignals>,
    shutdown: CancellationToken,
    after_start: Vec<LifecycleHook>,
    after_stop: Vec<LifecycleHook>,
    running: AtomicBool,
}

/// 组装服务
///
/// 依次安装：命令行覆盖、客户端及其链、注册中心绑定、取消句柄、
/// 处理链、启动 / 停止钩子、传输层。
pub fn assemble(
    mut options: ServiceOptions,
    logger: &Logger,
    configurer: &RpcModuleConfigurer,
) -> Result<Service, AssemblyError> {
    if let Some(args) = &configurer.args {
        let mut command = framework_command(&options.name);
        if let Some(app) = &configurer.app_command {
            command = mirror_flags(command, app);
        }
        let flags = parse_flags(command, args.iter().cloned())?;
        options.apply_flags(&flags);
    }

    let registry: Arc<dyn Registry> = match options.registry_binding() {
        Some(binding) => match &configurer.registry_factory {
            Some(factory) => {
                logger.in_scope(|| {
                    info!(scheme = binding.scheme(), peers = ?binding.peers(), "bind rpc registry")
                });
                factory(&binding)?
            }
            None => {
                return Err(AssemblyError::UnsupportedRegistry(
                    binding.scheme().to_string(),
                ));
            }
        },
        None => configurer
            .registry
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryRegistry::new())),
    };
    let transport: Arc<dyn Transport> = configurer
        .transport
        .clone()
        .unwrap_or_else(|| Arc::new(MemoryTransport::new()));

    let client = RpcClient::new(
        interceptor::client_chain(
            &options.client,
            registry.clone(),
            logger,
            configurer.client_interceptors.as_ref(),
        ),
        Client::new(
            &options.client,
            registry.clone(),
            transport.clone(),
            interceptor::node_chain(configurer.node_interceptors.as_ref()),
        ),
    );

    let shutdown = CancellationToken::new();

    let inflight = InFlightCounter::new();
    let accepted = InFlightCounter::new();
    let mut router = Router::new();
    if let Some(register) = &configurer.handler_register {
        register(&mut router);
    }
    let handler = Arc::new(Chained::new(
        interceptor::handler_chain(
            &options.server,
            inflight.clone(),
            logger,
            configurer.handler_interceptors.as_ref(),
        ),
        Arc::new(router),
    ));

    let signals = Arc::new(LifecycleSignals::default());
    let mut after_start = configurer.after_start.clone();
    after_start.push(signal_started(signals.clone()));
    let after_stop = vec![drain_then_signal_stopped(
        &options,
        accepted.clone(),
        logger.clone(),
        signals.clone(),
    )];

    let node_id = format!("{}-{}", options.name, uuid::Uuid::new_v4());

    Ok(Service {
        options,
        logger: logger.clone(),
        node_id,
        registry,
        transport,
        client,
        handler,
        inflight,
        accepted,
        signals,
        shutdown,
        after_start,
        after_stop,
        running: AtomicBool::new(false),
    })
}

fn signal_started(signals: Arc<LifecycleSignals>) -> LifecycleHook {
    Arc::new(move || {
        let signals = signals.clone();
        async move {
            signals.started.fire();
            Ok::<_, ServiceError>(())
        }
        .boxed()
    })
}

/// 有界等待已接收的请求全部应答，无论是否等到都写入停止信号
fn drain_then_signal_stopped(
    options: &ServiceOptions,
    accepted: InFlightCounter,
    logger: Logger,
    signals: Arc<LifecycleSignals>,
) -> LifecycleHook {
    let drain_timeout = options.server.drain_timeout;
    Arc::new(move || {
        let accepted = accepted.clone();
        let logger = logger.clone();
        let signals = signals.clone();
        async move {
            if !accepted.wait_timeout(drain_timeout).await {
                logger.in_scope(|| {
                    warn!(
                        in_flight = accepted.count(),
                        timeout = ?drain_timeout,
                        "timeout waiting for in-flight rpc requests"
                    )
                });
            }
            signals.stopped.fire();
            Ok::<_, ServiceError>(())
        }
        .boxed()
    })
}

impl Service {
    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn client(&self) -> RpcClient {
        self.client.clone()
    }

    pub fn registry(&self) -> Arc<dyn Registry> {
        self.registry.clone()
    }

    /// 服务端处理入口（含处理链）
    pub fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }

    pub fn inflight(&self) -> &InFlightCounter {
        &self.inflight
    }

    pub fn signals(&self) -> &LifecycleSignals {
        &self.signals
    }

    /// 取消句柄，取消后运行循环开始关闭
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn client_chain_names(&self) -> Vec<&'static str> {
        self.client.chain_names()
    }

    pub fn handler_chain_names(&self) -> Vec<&'static str> {
        self.handler.chain_names()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 运行服务直到取消句柄被触发
    pub async fn run(&self) -> Result<(), ServiceError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ServiceError::AlreadyRunning);
        }
        let result = self.logger.scope(self.run_cycle()).await;
        self.running.store(false, Ordering::Release);
        result
    }

    async fn run_cycle(&self) -> Result<(), ServiceError> {
        let listener = self.transport.listen(&self.options.address).await?;
        let record = ServiceRecord {
            name: self.options.name.clone(),
            node: Node {
                id: self.node_id.clone(),
                address: listener.address().to_string(),
                metadata: self.options.metadata.clone(),
            },
        };
        info!(
            service = %record.name,
            address = %record.node.address,
            "rpc server listening"
        );

        let accept = CancellationToken::new();
        let handler: Arc<dyn Handler> = self.handler.clone();
        let serving = tokio::spawn(self.logger.scope(listener.serve(
            handler,
            self.accepted.clone(),
            accept.clone(),
        )));

        let ttl = self.options.server.register_ttl;
        let started = async {
            self.registry.register(&record, ttl).await?;
            info!(service = %record.name, node = %record.node.id, "registered rpc service node");
            for hook in &self.after_start {
                hook().await?;
            }
            Ok::<_, ServiceError>(())
        };
        if let Err(err) = started.await {
            self.deregister(&record).await;
            accept.cancel();
            let _ = serving.await;
            return Err(err);
        }

        let interval = self.options.server.register_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.registry.register(&record, ttl).await {
                        warn!(
                            service = %record.name,
                            error = %err,
                            "failed to refresh rpc service registration"
                        );
                    }
                }
            }
        }

        info!(service = %record.name, "stopping rpc server");
        self.deregister(&record).await;
        accept.cancel();
        if let Err(err) = serving.await {
            warn!(error = %err, "rpc listener task ended abnormally");
        }

        let mut result = Ok(());
        for hook in &self.after_stop {
            if let Err(err) = hook().await {
                warn!(error = %err, "after stop hook failed");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    async fn deregister(&self, record: &ServiceRecord) {
        match self.registry.deregister(record).await {
            Ok(()) => info!(
                service = %record.name,
                node = %record.node.id,
                "deregistered rpc service node"
            ),
            Err(err) => warn!(
                service = %record.name,
                error = %err,
                "failed to deregister rpc service node"
            ),
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.options.name)
            .field("node_id", &self.node_id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
