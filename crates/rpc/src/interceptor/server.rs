use async_trait::async_trait;
use infra_common::InFlightCounter;
use infra_errors::RemoteError;

use super::{Interceptor, Next};
use crate::message::{Request, Response};
use crate::metrics::{self, RequestTimer};

/// 在途请求计数
///
/// 处理开始前计数加一，处理结束（包括失败和取消）后减一。
pub struct InFlightInterceptor {
    counter: InFlightCounter,
}

impl InFlightInterceptor {
    pub fn new(counter: InFlightCounter) -> Self {
        Self { counter }
    }
}

#[async_trait]
impl Interceptor for InFlightInterceptor {
    fn name(&self) -> &'static str {
        "in_flight"
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Result<Response, RemoteError> {
        let guard = self.counter.enter();
        let service = request.service.clone();
        metrics::set_in_flight(&service, self.counter.count());
        let timer = RequestTimer::server(service.clone(), request.endpoint.clone());

        let result = next.run(request).await;

        timer.finish(&result);
        drop(guard);
        metrics::set_in_flight(&service, self.counter.count());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{Chained, Handler, handler_fn};
    use infra_errors::SERVER_ERROR_ID;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_counts_while_handling() {
        let counter = InFlightCounter::new();
        let release = Arc::new(Notify::new());
        let handler = {
            let release = release.clone();
            handler_fn(move |_request: Request| {
                let release = release.clone();
                async move {
                    release.notified().await;
                    Ok(Response::default())
                }
            })
        };
        let chained = Arc::new(Chained::new(
            vec![Arc::new(InFlightInterceptor::new(counter.clone()))],
            handler,
        ));

        let call = {
            let chained = chained.clone();
            tokio::spawn(async move {
                chained
                    .call(Request::new("orders", "Orders.Get", json!({})))
                    .await
            })
        };
        while counter.count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(counter.count(), 1);
        assert!(!counter.wait_timeout(Duration::from_millis(20)).await);

        release.notify_one();
        call.await.unwrap().unwrap();
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn test_failed_handler_releases_count() {
        let counter = InFlightCounter::new();
        let chained = Chained::new(
            vec![Arc::new(InFlightInterceptor::new(counter.clone()))],
            handler_fn(|_request: Request| async move {
                Err(RemoteError::internal(SERVER_ERROR_ID, "boom"))
            }),
        );

        assert!(
            chained
                .call(Request::new("orders", "Orders.Get", json!({})))
                .await
                .is_err()
        );
        assert_eq!(counter.count(), 0);
    }
}
