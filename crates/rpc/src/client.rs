//! RPC 客户端
//!
//! 调用路径：客户端链 → 选择节点 → 节点链 → 传输层发送

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use infra_errors::{CLIENT_ERROR_ID, RemoteError, TRANSPORT_ERROR_ID};
use rand::seq::SliceRandom;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::interceptor::{Chain, Chained, Handler, Next};
use crate::message::{Endpoint, Request, Response};
use crate::metrics::RequestTimer;
use crate::options::ClientOptions;
use crate::registry::{Node, Registry, RegistryError};
use crate::transport::{Transport, TransportError};

/// 查询服务节点，失败时转换为客户端错误
pub(crate) async fn lookup_nodes(
    registry: &dyn Registry,
    service: &str,
) -> Result<Vec<Node>, RemoteError> {
    let nodes = registry.lookup(service).await.map_err(|err| match err {
        RegistryError::NotFound(_) => {
            RemoteError::internal(CLIENT_ERROR_ID, format!("service {service}: not found"))
        }
        other => RemoteError::internal(CLIENT_ERROR_ID, format!("service {service}: {other}")),
    })?;
    if nodes.is_empty() {
        return Err(RemoteError::internal(
            CLIENT_ERROR_ID,
            format!("service {service}: not found"),
        ));
    }
    Ok(nodes)
}

/// 传输层错误到远程错误记录的映射
pub fn transport_error(err: TransportError) -> RemoteError {
    match err {
        TransportError::Closed => RemoteError::internal(TRANSPORT_ERROR_ID, err.to_string()),
        TransportError::Timeout(_) => {
            RemoteError::timeout(CLIENT_ERROR_ID, "context deadline exceeded")
        }
        TransportError::Connect { .. } | TransportError::AddressInUse(_) => {
            RemoteError::internal(CLIENT_ERROR_ID, err.to_string())
        }
    }
}

/// 链的终点：向选定节点发送请求
struct TransportCall {
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    dial_timeout: Duration,
}

#[async_trait]
impl Handler for TransportCall {
    async fn call(&self, request: Request) -> Result<Response, RemoteError> {
        let Some(address) = request.node.as_ref().map(|node| node.address.clone()) else {
            return Err(RemoteError::internal(
                CLIENT_ERROR_ID,
                format!("service {}: no node selected", request.service),
            ));
        };

        let send = self.transport.send(&address, request, self.dial_timeout);
        match tokio::time::timeout(self.request_timeout, send).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => Err(transport_error(err)),
            Err(_) => Err(RemoteError::timeout(
                CLIENT_ERROR_ID,
                "context deadline exceeded",
            )),
        }
    }
}

/// 客户端终点：选择节点后执行节点链
pub struct Client {
    registry: Arc<dyn Registry>,
    node_chain: Chain,
    terminal: TransportCall,
}

impl Client {
    pub fn new(
        options: &ClientOptions,
        registry: Arc<dyn Registry>,
        transport: Arc<dyn Transport>,
        node_chain: Chain,
    ) -> Self {
        Self {
            registry,
            node_chain,
            terminal: TransportCall {
                transport,
                request_timeout: options.request_timeout,
                dial_timeout: options.dial_timeout,
            },
        }
    }

    async fn select(&self, service: &str) -> Result<Node, RemoteError> {
        let nodes = lookup_nodes(self.registry.as_ref(), service).await?;
        nodes
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| {
                RemoteError::internal(CLIENT_ERROR_ID, format!("service {service}: not found"))
            })
    }
}

#[async_trait]
impl Handler for Client {
    async fn call(&self, mut request: Request) -> Result<Response, RemoteError> {
        if request.node.is_none() {
            request.node = Some(self.select(&request.service).await?);
        }
        Next::new(&self.node_chain, &self.terminal).run(request).await
    }
}

/// 装好客户端链的 RPC 客户端，克隆开销很小
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Chained>,
}

impl RpcClient {
    pub fn new(chain: Chain, client: Client) -> Self {
        Self {
            inner: Arc::new(Chained::new(chain, Arc::new(client))),
        }
    }

    /// 发起调用
    pub async fn call(&self, request: Request) -> Result<Response, RemoteError> {
        let timer = RequestTimer::client(request.service.clone(), request.endpoint.clone());
        let result = self.inner.call(request).await;
        timer.finish(&result);
        result
    }

    /// 以 JSON 消息体发起调用并解码响应
    pub async fn call_json<Req, Resp>(
        &self,
        service: &str,
        endpoint: impl Into<Endpoint>,
        body: &Req,
    ) -> Result<Resp, RemoteError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let request = Request::json(service, endpoint, body)?;
        self.call(request).await?.decode()
    }

    pub fn chain_names(&self) -> Vec<&'static str> {
        self.inner.chain_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{REMOTE_ADDR_KEY, handler_fn, node_chain};
    use crate::registry::{MemoryRegistry, ServiceRecord};
    use crate::transport::{Listener, MemoryTransport};
    use infra_common::InFlightCounter;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    async fn serve(
        transport: &MemoryTransport,
        handler: Arc<dyn Handler>,
    ) -> (String, CancellationToken) {
        let listener: Box<dyn Listener> = transport.listen("").await.unwrap();
        let address = listener.address().to_string();
        let shutdown = CancellationToken::new();
        tokio::spawn(listener.serve(handler, InFlightCounter::new(), shutdown.clone()));
        (address, shutdown)
    }

    fn client(
        registry: MemoryRegistry,
        transport: MemoryTransport,
        options: &ClientOptions,
    ) -> RpcClient {
        let registry: Arc<dyn Registry> = Arc::new(registry);
        RpcClient::new(
            Chain::new(),
            Client::new(options, registry, Arc::new(transport), node_chain(None)),
        )
    }

    #[tokio::test]
    async fn test_call_registered_service() {
        let registry = MemoryRegistry::new();
        let transport = MemoryTransport::new();
        let (address, shutdown) = serve(
            &transport,
            handler_fn(|request: Request| async move { Ok(Response::new(request.body)) }),
        )
        .await;
        let record = ServiceRecord {
            name: "echo".into(),
            node: Node::new("echo-1", address.clone()),
        };
        registry.register(&record, Duration::from_secs(30)).await.unwrap();

        let client = client(registry, transport, &ClientOptions::default());
        let response = client
            .call(Request::new("echo", "Echo.Call", json!({"msg": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.body, json!({"msg": "hi"}));
        assert_eq!(response.metadata.get(REMOTE_ADDR_KEY), Some(&address));

        let echoed: serde_json::Value = client
            .call_json("echo", "Echo.Call", &json!([1, 2]))
            .await
            .unwrap();
        assert_eq!(echoed, json!([1, 2]));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let client = client(MemoryRegistry::new(), MemoryTransport::new(), &ClientOptions::default());
        let err = client
            .call(Request::new("missing", "Missing.Call", json!(null)))
            .await
            .unwrap_err();
        assert_eq!(err.code, 500);
        assert!(err.detail.contains("not found"));
    }

    #[tokio::test]
    async fn test_dead_node_is_connection_error() {
        let client = client(MemoryRegistry::new(), MemoryTransport::new(), &ClientOptions::default());
        let request =
            Request::new("echo", "Echo.Call", json!(null)).with_node(Node::new("gone", "memory:404"));
        let err = client
            .call(request)
            .await
            .unwrap_err();
        assert_eq!(err.code, 500);
        assert_eq!(err.id, CLIENT_ERROR_ID);
        assert!(err.detail.starts_with("connection error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let transport = MemoryTransport::new();
        let (address, shutdown) = serve(
            &transport,
            handler_fn(|_request: Request| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Response::default())
            }),
        )
        .await;

        let options = ClientOptions {
            request_timeout: Duration::from_secs(1),
            ..ClientOptions::default()
        };
        let client = client(MemoryRegistry::new(), transport, &options);
        let request =
            Request::new("slow", "Slow.Call", json!(null)).with_node(Node::new("slow-1", address));
        let err = client
            .call(request)
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::timeout(CLIENT_ERROR_ID, "context deadline exceeded"));
        shutdown.cancel();
    }

    #[test]
    fn test_transport_error_mapping() {
        let eof = transport_error(TransportError::Closed);
        assert_eq!(eof.id, TRANSPORT_ERROR_ID);
        assert_eq!(eof.code, 500);
        assert_eq!(eof.detail, "unexpected EOF");

        let timeout = transport_error(TransportError::Timeout(Duration::from_secs(20)));
        assert!(timeout.is_timeout());
    }
}
