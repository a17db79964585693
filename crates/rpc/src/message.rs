//! 请求/响应模型
//!
//! `Endpoint` 在框架边界由 `"<Handler>.<Method>"` 解析一次，之后只传递结构化的两段描述。

use std::collections::HashMap;
use std::fmt;

use infra_errors::{CLIENT_ERROR_ID, RemoteError, SERVER_ERROR_ID};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::registry::Node;

/// 调用元数据
pub type Metadata = HashMap<String, String>;

/// 无法解析端点时使用的标签
pub const UNKNOWN_LABEL: &str = "unknown";

/// 请求端点
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Method { handler: String, method: String },
    Unknown,
}

impl Endpoint {
    pub fn new(handler: impl Into<String>, method: impl Into<String>) -> Self {
        Self::Method {
            handler: handler.into(),
            method: method.into(),
        }
    }

    /// 解析 `"<Handler>.<Method>"`，不是恰好两段非空片段时返回 `Unknown`
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(handler), Some(method), None) if !handler.is_empty() && !method.is_empty() => {
                Self::new(handler, method)
            }
            _ => Self::Unknown,
        }
    }

    pub fn handler_label(&self) -> &str {
        match self {
            Self::Method { handler, .. } => handler,
            Self::Unknown => UNKNOWN_LABEL,
        }
    }

    pub fn method_label(&self) -> &str {
        match self {
            Self::Method { method, .. } => method,
            Self::Unknown => UNKNOWN_LABEL,
        }
    }
}

impl From<&str> for Endpoint {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method { handler, method } => write!(f, "{handler}.{method}"),
            Self::Unknown => f.write_str(UNKNOWN_LABEL),
        }
    }
}

/// RPC 请求
#[derive(Debug, Clone)]
pub struct Request {
    pub service: String,
    pub endpoint: Endpoint,
    pub body: Value,
    pub metadata: Metadata,
    /// 客户端选中的目标节点，未选择时为 None
    pub node: Option<Node>,
}

impl Request {
    pub fn new(service: impl Into<String>, endpoint: impl Into<Endpoint>, body: Value) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            body,
            metadata: Metadata::new(),
            node: None,
        }
    }

    /// 以可序列化的消息体构建请求
    pub fn json<T: Serialize>(
        service: impl Into<String>,
        endpoint: impl Into<Endpoint>,
        body: &T,
    ) -> Result<Self, RemoteError> {
        let body = serde_json::to_value(body).map_err(|e| {
            RemoteError::bad_request(CLIENT_ERROR_ID, format!("failed to encode request: {e}"))
        })?;
        Ok(Self::new(service, endpoint, body))
    }

    /// 解码消息体
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            RemoteError::bad_request(SERVER_ERROR_ID, format!("invalid request body: {e}"))
        })
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 直接指定目标节点，跳过负载均衡选择
    pub fn with_node(mut self, node: Node) -> Self {
        self.node = Some(node);
        self
    }
}

/// RPC 响应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub body: Value,
    pub metadata: Metadata,
}

impl Response {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            metadata: Metadata::new(),
        }
    }

    pub fn json<T: Serialize>(body: &T) -> Result<Self, RemoteError> {
        let body = serde_json::to_value(body).map_err(|e| {
            RemoteError::internal(SERVER_ERROR_ID, format!("failed to encode response: {e}"))
        })?;
        Ok(Self::new(body))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            RemoteError::internal(CLIENT_ERROR_ID, format!("invalid response body: {e}"))
        })
    }
}
