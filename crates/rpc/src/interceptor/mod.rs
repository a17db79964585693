//! 拦截器链
//!
//! 链是有序的 `Interceptor` 列表，排在前面的拦截器先看到请求、后看到结果。
//! 客户端调用和服务端处理共用同一套抽象，链的终点都是一个 `Handler`。

mod client;
mod logerr;
mod server;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use infra_common::InFlightCounter;
use infra_errors::RemoteError;
use infra_telemetry::Logger;

use crate::message::{Request, Response};
use crate::options::{ClientOptions, LoadBalance, ServerOptions};
use crate::registry::Registry;

pub use client::{REMOTE_ADDR_KEY, RecordNodeInterceptor, RetryInterceptor, RoundRobinInterceptor};
pub use logerr::LogErrorInterceptor;
pub use server::InFlightInterceptor;

/// 请求处理器：服务端业务处理或客户端的实际发送
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: Request) -> Result<Response, RemoteError>;
}

/// 拦截器
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// 拦截器名称，用于日志和调试
    fn name(&self) -> &'static str;

    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response, RemoteError>;
}

/// 有序拦截器链
pub type Chain = Vec<Arc<dyn Interceptor>>;

/// 调用方提供的链扩展函数，可以追加、重排或移除拦截器
pub type ExtendChain = Arc<dyn Fn(Chain) -> Chain + Send + Sync>;

/// 链中剩余的部分
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Interceptor>], handler: &'a dyn Handler) -> Self {
        Self { chain, handler }
    }

    /// 把请求交给下一个拦截器，链走完后交给终点处理器
    pub async fn run(self, request: Request) -> Result<Response, RemoteError> {
        match self.chain.split_first() {
            Some((first, rest)) => first.intercept(request, Next::new(rest, self.handler)).await,
            None => self.handler.call(request).await,
        }
    }
}

/// 装好拦截器链的处理器
pub struct Chained {
    chain: Chain,
    handler: Arc<dyn Handler>,
}

impl Chained {
    pub fn new(chain: Chain, handler: Arc<dyn Handler>) -> Self {
        Self { chain, handler }
    }

    pub fn chain_names(&self) -> Vec<&'static str> {
        names(&self.chain)
    }
}

#[async_trait]
impl Handler for Chained {
    async fn call(&self, request: Request) -> Result<Response, RemoteError> {
        Next::new(&self.chain, self.handler.as_ref()).run(request).await
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, RemoteError>> + Send,
{
    async fn call(&self, request: Request) -> Result<Response, RemoteError> {
        (self.0)(request).await
    }
}

/// 用异步闭包构造处理器
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, RemoteError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

pub fn names(chain: &[Arc<dyn Interceptor>]) -> Vec<&'static str> {
    chain.iter().map(|interceptor| interceptor.name()).collect()
}

fn extend(chain: Chain, extension: Option<&ExtendChain>) -> Chain {
    match extension {
        Some(extend) => extend(chain),
        None => chain,
    }
}

/// 客户端调用链
///
/// 依次为：连接故障重试、轮询负载均衡（按配置）、失败日志（按配置）、调用方扩展。
pub fn client_chain(
    options: &ClientOptions,
    registry: Arc<dyn Registry>,
    logger: &Logger,
    extension: Option<&ExtendChain>,
) -> Chain {
    let mut chain: Chain = vec![Arc::new(RetryInterceptor::new(
        options.retries,
        logger.clone(),
    ))];
    if options.load_balance == LoadBalance::RoundRobin {
        chain.push(Arc::new(RoundRobinInterceptor::new(registry)));
    }
    if options.log_error {
        chain.push(Arc::new(LogErrorInterceptor::client(logger.clone())));
    }
    extend(chain, extension)
}

/// 节点级调用链，在选定节点之后、发送之前执行
pub fn node_chain(extension: Option<&ExtendChain>) -> Chain {
    let chain: Chain = vec![Arc::new(RecordNodeInterceptor)];
    extend(chain, extension)
}

/// 服务端处理链
///
/// 依次为：在途计数、失败日志（按配置）、调用方扩展。
pub fn handler_chain(
    options: &ServerOptions,
    inflight: InFlightCounter,
    logger: &Logger,
    extension: Option<&ExtendChain>,
) -> Chain {
    let mut chain: Chain = vec![Arc::new(InFlightInterceptor::new(inflight))];
    if options.log_error {
        chain.push(Arc::new(LogErrorInterceptor::server(logger.clone())));
    }
    extend(chain, extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use serde_json::json;
    use std::sync::Mutex;

    /// 记录经过顺序的拦截器
    struct Trace {
        label: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor for Trace {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response, RemoteError> {
            self.seen.lock().unwrap().push(format!("{}:before", self.label));
            let result = next.run(request).await;
            self.seen.lock().unwrap().push(format!("{}:after", self.label));
            result
        }
    }

    fn registry() -> Arc<dyn Registry> {
        Arc::new(MemoryRegistry::new())
    }

    #[tokio::test]
    async fn test_chain_wraps_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain: Chain = vec![
            Arc::new(Trace { label: "outer", seen: seen.clone() }),
            Arc::new(Trace { label: "inner", seen: seen.clone() }),
        ];
        let terminal = {
            let seen = seen.clone();
            handler_fn(move |request: Request| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push("handler".to_string());
                    Ok(Response::new(request.body))
                }
            })
        };

        let chained = Chained::new(chain, terminal);
        let response = chained
            .call(Request::new("echo", "Echo.Call", json!(1)))
            .await
            .unwrap();

        assert_eq!(response.body, json!(1));
        assert_eq!(
            *seen.lock().unwrap(),
            ["outer:before", "inner:before", "handler", "inner:after", "outer:after"]
        );
    }

    #[test]
    fn test_client_chain_minimal() {
        let chain = client_chain(&ClientOptions::default(), registry(), &Logger::disabled(), None);
        assert_eq!(names(&chain), ["retry"]);
    }

    #[test]
    fn test_client_chain_full() {
        let options = ClientOptions {
            load_balance: LoadBalance::RoundRobin,
            log_error: true,
            ..ClientOptions::default()
        };
        let chain = client_chain(&options, registry(), &Logger::disabled(), None);
        assert_eq!(names(&chain), ["retry", "round_robin", "log_error"]);
    }

    #[test]
    fn test_client_chain_extension_can_reorder() {
        let options = ClientOptions {
            log_error: true,
            ..ClientOptions::default()
        };
        let extension: ExtendChain = Arc::new(|mut chain: Chain| {
            chain.reverse();
            chain
        });
        let chain = client_chain(&options, registry(), &Logger::disabled(), Some(&extension));
        assert_eq!(names(&chain), ["log_error", "retry"]);
    }

    #[test]
    fn test_handler_chain() {
        let logger = Logger::disabled();
        let chain = handler_chain(&ServerOptions::default(), InFlightCounter::new(), &logger, None);
        assert_eq!(names(&chain), ["in_flight"]);

        let options = ServerOptions {
            log_error: true,
            ..ServerOptions::default()
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let extension: ExtendChain = Arc::new(move |mut chain: Chain| {
            chain.push(Arc::new(Trace { label: "audit", seen: seen.clone() }));
            chain
        });
        let chain = handler_chain(&options, InFlightCounter::new(), &logger, Some(&extension));
        assert_eq!(names(&chain), ["in_flight", "log_error", "audit"]);
    }

    #[test]
    fn test_node_chain() {
        assert_eq!(names(&node_chain(None)), ["record_node"]);

        let extension: ExtendChain = Arc::new(|_chain: Chain| Chain::new());
        assert!(node_chain(Some(&extension)).is_empty());
    }
}
