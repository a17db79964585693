use async_trait::async_trait;
use infra_errors::RemoteError;
use infra_telemetry::Logger;
use tracing::error;

use super::{Interceptor, Next};
use crate::message::{Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Server,
}

/// 失败日志拦截器
///
/// 调用或处理失败时记录服务、处理器、方法和错误，错误原样返回。
pub struct LogErrorInterceptor {
    logger: Logger,
    side: Side,
}

impl LogErrorInterceptor {
    pub fn client(logger: Logger) -> Self {
        Self {
            logger,
            side: Side::Client,
        }
    }

    pub fn server(logger: Logger) -> Self {
        Self {
            logger,
            side: Side::Server,
        }
    }
}

#[async_trait]
impl Interceptor for LogErrorInterceptor {
    fn name(&self) -> &'static str {
        "log_error"
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response, RemoteError> {
        let service = request.service.clone();
        let endpoint = request.endpoint.clone();

        let result = next.run(request).await;
        if let Err(err) = &result {
            let handler = endpoint.handler_label();
            let method = endpoint.method_label();
            self.logger.in_scope(|| match self.side {
                Side::Client => {
                    error!(%service, handler, method, error = %err, "call rpc service failed")
                }
                Side::Server => {
                    error!(%service, handler, method, error = %err, "handle rpc request failed")
                }
            });
        }
        result
    }
}
