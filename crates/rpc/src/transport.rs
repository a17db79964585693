//! 传输层
//!
//! 只定义收发请求的接缝和一个进程内实现，不涉及线协议编解码。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use infra_common::InFlightCounter;
use infra_errors::RemoteError;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::instrument::WithSubscriber;

use crate::interceptor::Handler;
use crate::message::{Request, Response};

/// 传输层默认应答超时
pub const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(20);

const MEMORY_SCHEME: &str = "memory:";
const LISTENER_BACKLOG: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection error: {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("unexpected EOF")]
    Closed,

    #[error("transport timeout after {0:?}")]
    Timeout(Duration),

    #[error("address {0} already in use")]
    AddressInUse(String),
}

/// 服务端应答：处理结果或结构化错误
pub type Reply = Result<Response, RemoteError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// 发出请求后等待应答的上限
    pub timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TRANSPORT_TIMEOUT,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// 在地址上监听，空地址或 `:0` 由实现分配
    async fn listen(&self, address: &str) -> Result<Box<dyn Listener>, TransportError>;

    /// 发送请求并等待应答
    async fn send(
        &self,
        address: &str,
        request: Request,
        dial_timeout: Duration,
    ) -> Result<Reply, TransportError>;
}

#[async_trait]
pub trait Listener: Send {
    /// 实际绑定的地址
    fn address(&self) -> &str;

    /// 持续分发请求直到 `shutdown` 被取消
    ///
    /// 取消后不再接收新请求；已分发的处理继续执行，排队未处理的请求以 EOF 结束。
    /// 每个请求从被接收起计入 `accepted`，直到应答发出。处理在调用方的日志器下执行。
    async fn serve(
        self: Box<Self>,
        handler: Arc<dyn Handler>,
        accepted: InFlightCounter,
        shutdown: CancellationToken,
    );
}

struct Exchange {
    request: Request,
    reply: oneshot::Sender<Reply>,
}

type Routes = Mutex<HashMap<String, mpsc::Sender<Exchange>>>;

/// 进程内传输
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
    options: TransportOptions,
}

#[derive(Default)]
struct MemoryInner {
    routes: Routes,
    next_port: AtomicU64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: TransportOptions) -> Self {
        Self {
            inner: Arc::default(),
            options,
        }
    }

    pub fn options(&self) -> TransportOptions {
        self.options
    }

    fn allocate(&self, address: &str) -> String {
        if address.is_empty() || address.ends_with(":0") {
            let port = self.inner.next_port.fetch_add(1, Ordering::Relaxed) + 1;
            format!("{MEMORY_SCHEME}{port}")
        } else {
            address.to_string()
        }
    }

    fn route(&self, address: &str) -> Option<mpsc::Sender<Exchange>> {
        self.inner
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self, address: &str) -> Result<Box<dyn Listener>, TransportError> {
        let address = self.allocate(address);
        let (tx, rx) = mpsc::channel(LISTENER_BACKLOG);
        {
            let mut routes = self
                .inner
                .routes
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if routes.get(&address).is_some_and(|route| !route.is_closed()) {
                return Err(TransportError::AddressInUse(address));
            }
            routes.insert(address.clone(), tx.clone());
        }

        Ok(Box::new(MemoryListener {
            address,
            rx,
            tx,
            inner: self.inner.clone(),
        }))
    }

    async fn send(
        &self,
        address: &str,
        request: Request,
        dial_timeout: Duration,
    ) -> Result<Reply, TransportError> {
        let connect_error = |reason: &str| TransportError::Connect {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let route = self.route(address).ok_or_else(|| connect_error("connection refused"))?;
        let permit = match tokio::time::timeout(dial_timeout, route.reserve()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(connect_error("connection refused")),
            Err(_) => return Err(connect_error("dial timeout")),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        permit.send(Exchange {
            request,
            reply: reply_tx,
        });

        match tokio::time::timeout(self.options.timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout(self.options.timeout)),
        }
    }
}

struct MemoryListener {
    address: String,
    rx: mpsc::Receiver<Exchange>,
    tx: mpsc::Sender<Exchange>,
    inner: Arc<MemoryInner>,
}

#[async_trait]
impl Listener for MemoryListener {
    fn address(&self) -> &str {
        &self.address
    }

    async fn serve(
        self: Box<Self>,
        handler: Arc<dyn Handler>,
        accepted: InFlightCounter,
        shutdown: CancellationToken,
    ) {
        let mut this = self;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                exchange = this.rx.recv() => {
                    let Some(Exchange { request, reply }) = exchange else {
                        break;
                    };
                    let handler = handler.clone();
                    let guard = accepted.enter();
                    tokio::spawn(
                        async move {
                            let _ = reply.send(handler.call(request).await);
                            drop(guard);
                        }
                        .with_current_subscriber(),
                    );
                }
            }
        }
        this.rx.close();
        debug!(address = %this.address, "memory listener stopped accepting");
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        let mut routes = self
            .inner
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if routes
            .get(&self.address)
            .is_some_and(|route| route.same_channel(&self.tx))
        {
            routes.remove(&self.address);
        }
    }
}
