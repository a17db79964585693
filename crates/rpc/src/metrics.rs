//! RPC Metrics
//!
//! 通过 `metrics` 门面记录，未安装 recorder 时为空操作

use std::time::Instant;

use infra_errors::RemoteError;
use metrics::{counter, gauge, histogram};

use crate::message::{Endpoint, Response};

/// 记录客户端调用
pub fn record_client_call(service: &str, endpoint: &Endpoint, outcome: &str, duration_ms: f64) {
    let labels = labels(service, endpoint, outcome);
    counter!("rpc_client_calls_total", &labels).increment(1);
    histogram!("rpc_client_call_duration_ms", &labels).record(duration_ms);
}

/// 记录客户端重试
pub fn record_client_retry(service: &str, endpoint: &Endpoint) {
    let labels = [
        ("service", service.to_string()),
        ("handler", endpoint.handler_label().to_string()),
        ("method", endpoint.method_label().to_string()),
    ];
    counter!("rpc_client_retries_total", &labels).increment(1);
}

/// 记录服务端处理
pub fn record_server_request(service: &str, endpoint: &Endpoint, outcome: &str, duration_ms: f64) {
    let labels = labels(service, endpoint, outcome);
    counter!("rpc_server_requests_total", &labels).increment(1);
    histogram!("rpc_server_request_duration_ms", &labels).record(duration_ms);
}

/// 设置在途请求数
pub fn set_in_flight(service: &str, count: usize) {
    let labels = [("service", service.to_string())];
    gauge!("rpc_server_in_flight", &labels).set(count as f64);
}

fn labels(service: &str, endpoint: &Endpoint, outcome: &str) -> [(&'static str, String); 4] {
    [
        ("service", service.to_string()),
        ("handler", endpoint.handler_label().to_string()),
        ("method", endpoint.method_label().to_string()),
        ("outcome", outcome.to_string()),
    ]
}

/// 结果标签：成功为 `ok`，失败为错误码
pub fn outcome(result: &Result<Response, RemoteError>) -> String {
    match result {
        Ok(_) => "ok".to_string(),
        Err(err) => err.code.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Client,
    Server,
}

/// 请求计时器
pub struct RequestTimer {
    start: Instant,
    service: String,
    endpoint: Endpoint,
    side: Side,
}

impl RequestTimer {
    pub fn client(service: impl Into<String>, endpoint: Endpoint) -> Self {
        Self::new(service, endpoint, Side::Client)
    }

    pub fn server(service: impl Into<String>, endpoint: Endpoint) -> Self {
        Self::new(service, endpoint, Side::Server)
    }

    fn new(service: impl Into<String>, endpoint: Endpoint, side: Side) -> Self {
        Self {
            start: Instant::now(),
            service: service.into(),
            endpoint,
            side,
        }
    }

    pub fn finish(self, result: &Result<Response, RemoteError>) {
        let duration = self.start.elapsed().as_secs_f64() * 1000.0;
        let outcome = outcome(result);
        match self.side {
            Side::Client => record_client_call(&self.service, &self.endpoint, &outcome, duration),
            Side::Server => record_server_request(&self.service, &self.endpoint, &outcome, duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infra_errors::CLIENT_ERROR_ID;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome(&Ok(Response::default())), "ok");
        assert_eq!(
            outcome(&Err(RemoteError::timeout(CLIENT_ERROR_ID, "context deadline exceeded"))),
            "408"
        );
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let timer = RequestTimer::server("orders", Endpoint::new("Orders", "Create"));
        timer.finish(&Ok(Response::default()));
        record_client_retry("orders", &Endpoint::Unknown);
        set_in_flight("orders", 0);
    }
}
