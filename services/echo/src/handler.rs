//! Echo 处理器

use std::sync::Arc;

use infra_errors::SERVER_ERROR_ID;
use infra_rpc::{Endpoint, Handler, RemoteError, Request, Response, handler_fn};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const HANDLER_NAME: &str = "Echo";

#[derive(Debug, Deserialize)]
pub struct SayRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SayResponse {
    pub reply: String,
}

/// 构造 Echo 处理器
///
/// - `Echo.Say`：在消息前加上问候语
/// - `Echo.Ping`：原样返回消息体
pub fn echo_handler(greeting: String) -> Arc<dyn Handler> {
    let greeting = Arc::new(greeting);
    handler_fn(move |request: Request| {
        let greeting = greeting.clone();
        async move {
            debug!(endpoint = %request.endpoint, "handle echo request");
            match &request.endpoint {
                Endpoint::Method { method, .. } if method == "Say" => {
                    let say: SayRequest = request.decode()?;
                    Response::json(&SayResponse {
                        reply: format!("{greeting}, {}", say.message),
                    })
                }
                Endpoint::Method { method, .. } if method == "Ping" => {
                    Ok(Response::new(request.body))
                }
                other => Err(RemoteError::bad_request(
                    SERVER_ERROR_ID,
                    format!("unknown method {other}"),
                )),
            }
        }
    })
}
