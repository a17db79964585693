use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use infra_common::with_conditional_retry;
use infra_errors::RemoteError;
use infra_telemetry::Logger;

use super::{Interceptor, Next};
use crate::client::lookup_nodes;
use crate::message::{Request, Response};
use crate::metrics;
use crate::registry::Registry;
use crate::retry::is_retryable;

/// 记录实际路由节点地址的元数据键
pub const REMOTE_ADDR_KEY: &str = "Call-Remote-Addr";

/// 连接故障重试
///
/// 总尝试次数为 `1 + retries`，只重试判定为连接类故障的错误，不做退避。
pub struct RetryInterceptor {
    retries: usize,
    logger: Logger,
}

impl RetryInterceptor {
    pub fn new(retries: usize, logger: Logger) -> Self {
        Self { retries, logger }
    }

    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.retries)
            .unwrap_or(u32::MAX)
            .saturating_add(1)
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response, RemoteError> {
        let operation = format!("rpc call {}/{}", request.service, request.endpoint);
        let request = &request;
        self.logger
            .scope(with_conditional_retry(
                self.max_attempts(),
                &operation,
                || next.run(request.clone()),
                |err: &RemoteError| {
                    let retry = is_retryable(err);
                    if retry {
                        metrics::record_client_retry(&request.service, &request.endpoint);
                    }
                    retry
                },
            ))
            .await
    }
}

/// 轮询负载均衡
///
/// 请求未指定节点时，按服务名轮流选取注册中心中的节点。
pub struct RoundRobinInterceptor {
    registry: Arc<dyn Registry>,
    cursors: Mutex<HashMap<String, usize>>,
}

impl RoundRobinInterceptor {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    fn next_index(&self, service: &str, len: usize) -> usize {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = cursors.entry(service.to_string()).or_insert(0);
        let index = *cursor % len;
        *cursor = cursor.wrapping_add(1);
        index
    }
}

#[async_trait]
impl Interceptor for RoundRobinInterceptor {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    async fn intercept(&self, mut request: Request, next: Next<'_>) -> Result<Response, RemoteError> {
        if request.node.is_none() {
            let mut nodes = lookup_nodes(self.registry.as_ref(), &request.service).await?;
            nodes.sort_by(|a, b| a.id.cmp(&b.id));
            let index = self.next_index(&request.service, nodes.len());
            request.node = Some(nodes.swap_remove(index));
        }
        next.run(request).await
    }
}

/// 节点地址记录
///
/// 把选定节点的地址写入请求和响应的元数据。
pub struct RecordNodeInterceptor;

#[async_trait]
impl Interceptor for RecordNodeInterceptor {
    fn name(&self) -> &'static str {
        "record_node"
    }

    async fn intercept(&self, mut request: Request, next: Next<'_>) -> Result<Response, RemoteError> {
        let address = request.node.as_ref().map(|node| node.address.clone());
        if let Some(address) = &address {
            request
                .metadata
                .insert(REMOTE_ADDR_KEY.to_string(), address.clone());
        }

        let mut response = next.run(request).await?;
        if let Some(address) = address {
            response.metadata.insert(REMOTE_ADDR_KEY.to_string(), address);
        }
        Ok(response)
    }
}
