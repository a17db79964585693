//! infra-rpc - RPC 服务生命周期与容错层
//!
//! - 选项解析：`ServiceOptions::resolve`
//! - 拦截器链：`interceptor::{client_chain, node_chain, handler_chain}`
//! - 重试判定：`retry::should_retry`
//! - 服务组装：`service::assemble`
//! - 生命周期：`RpcServer::{start, stop}`

pub mod client;
pub mod error;
pub mod flags;
pub mod interceptor;
pub mod lifecycle;
pub mod message;
pub mod metrics;
pub mod options;
pub mod registry;
pub mod retry;
pub mod router;
pub mod service;
pub mod transport;

pub use client::RpcClient;
pub use error::{AssemblyError, ConfigError, LifecycleError, ServiceError};
pub use flags::FrameworkFlags;
pub use interceptor::{Chain, ExtendChain, Handler, Interceptor, Next, handler_fn};
pub use lifecycle::{LifecycleState, LifecycleTimeouts, RpcServer};
pub use message::{Endpoint, Metadata, Request, Response};
pub use options::{ClientOptions, LoadBalance, ServerOptions, ServiceOptions};
pub use registry::{MemoryRegistry, Node, Registry, RegistryBinding, RegistryError, RegistryFactory};
pub use retry::should_retry;
pub use router::Router;
pub use service::{RpcModuleConfigurer, Service, assemble};
pub use transport::{MemoryTransport, Transport, TransportError, TransportOptions};

pub use infra_errors::RemoteError;
