//! common - 通用同步与重试工具库

pub mod retry;
pub mod sync;

pub use retry::*;
pub use sync::*;
