//! 服务端路由
//!
//! 按端点中的处理器名分发请求

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use infra_errors::{RemoteError, SERVER_ERROR_ID};

use crate::interceptor::Handler;
use crate::message::{Endpoint, Request, Response};

#[derive(Clone, Default)]
pub struct Router {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同名处理器被替换
    pub fn handle(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Handler for Router {
    async fn call(&self, request: Request) -> Result<Response, RemoteError> {
        let handler = match &request.endpoint {
            Endpoint::Method { handler, .. } => handler,
            Endpoint::Unknown => {
                return Err(RemoteError::bad_request(
                    SERVER_ERROR_ID,
                    format!("service {}: malformed endpoint", request.service),
                ));
            }
        };
        let Some(target) = self.handlers.get(handler).cloned() else {
            return Err(RemoteError::not_found(
                SERVER_ERROR_ID,
                format!("unknown service {}.{}", request.service, request.endpoint),
            ));
        };
        target.call(request).await
    }
}
