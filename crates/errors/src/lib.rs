//! infra-errors - 远程调用错误记录
//!
//! RPC 客户端与服务端共享的结构化错误 `{id, code, detail, status}`，
//! 序列化格式与 go-micro 的错误记录一致，混合部署时两端可以互相解析。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 客户端错误标识
pub const CLIENT_ERROR_ID: &str = "go.micro.client";

/// 客户端传输层错误标识
pub const TRANSPORT_ERROR_ID: &str = "go.micro.client.transport";

/// 服务端错误标识
pub const SERVER_ERROR_ID: &str = "go.micro.server";

/// 结构化的远程调用错误，显示形式即 JSON 记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{}", self.to_json())]
pub struct RemoteError {
    pub id: String,
    pub code: u16,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub status: String,
}

impl RemoteError {
    pub fn new(id: impl Into<String>, code: u16, detail: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code,
            detail: detail.into(),
            status: status_text(code).to_string(),
        }
    }

    pub fn bad_request(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(id, 400, detail)
    }

    pub fn not_found(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(id, 404, detail)
    }

    pub fn timeout(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(id, 408, detail)
    }

    pub fn internal(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(id, 500, detail)
    }

    pub fn unavailable(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(id, 503, detail)
    }

    /// 从错误字符串解析结构化记录，非 JSON 记录返回 None
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// 从任意错误中提取结构化记录
    ///
    /// 优先直接向下转型，否则尝试解析错误的字符串形式。
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Option<Self> {
        if let Some(remote) = err.downcast_ref::<RemoteError>() {
            return Some(remote.clone());
        }
        Self::parse(&err.to_string())
    }

    /// 转换为 JSON 表示
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "id": self.id,
            "code": self.code,
            "detail": self.detail,
            "status": self.status,
        })
        .to_string()
    }

    /// 是否为超时类错误
    pub fn is_timeout(&self) -> bool {
        self.code == 408
    }
}

/// HTTP 状态码对应的状态描述
pub fn status_text(code: u16) -> &'static str {
    match code {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        409 => "Conflict",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_parseable_json() {
        let err = RemoteError::internal(CLIENT_ERROR_ID, "connection error: dial tcp refused");
        let parsed = RemoteError::parse(&err.to_string()).unwrap();
        assert_eq!(parsed, err);
        assert_eq!(parsed.status, "Internal Server Error");
    }

    #[test]
    fn test_detail_with_quotes_stays_parseable() {
        let err = RemoteError::bad_request(
            SERVER_ERROR_ID,
            r#"invalid request body: expected "sku" at line 1\n"#,
        );
        assert_eq!(RemoteError::parse(&err.to_string()), Some(err));
    }

    #[test]
    fn test_parse_go_micro_record() {
        let raw = r#"{"id":"go.micro.client","code":408,"detail":"context deadline exceeded","status":"Request Timeout"}"#;
        let parsed = RemoteError::parse(raw).unwrap();
        assert_eq!(parsed.code, 408);
        assert!(parsed.is_timeout());
        assert_eq!(parsed.id, CLIENT_ERROR_ID);
    }

    #[test]
    fn test_parse_rejects_plain_text() {
        assert!(RemoteError::parse("connection refused").is_none());
        assert!(RemoteError::parse(r#"{"detail":"no code"}"#).is_none());
    }

    #[test]
    fn test_from_error_prefers_downcast() {
        let err = RemoteError::not_found(SERVER_ERROR_ID, "handler Echo not found");
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(err.clone());
        assert_eq!(RemoteError::from_error(boxed.as_ref()), Some(err));
    }

    #[test]
    fn test_from_error_parses_foreign_error() {
        let io = std::io::Error::other(
            r#"{"id":"go.micro.client.transport","code":500,"detail":"unexpected EOF"}"#,
        );
        let parsed = RemoteError::from_error(&io).unwrap();
        assert_eq!(parsed.id, TRANSPORT_ERROR_ID);
        assert_eq!(parsed.status, "");
    }
}
