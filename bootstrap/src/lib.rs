//! infra-bootstrap - 统一服务启动骨架
//!
//! 所有服务复用的启动逻辑

mod app;
mod runtime;
mod shutdown;
mod starter;

pub use app::*;
pub use runtime::*;
pub use shutdown::*;
pub use starter::*;
