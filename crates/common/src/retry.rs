//! 通用条件重试模块
//!
//! 只有 `should_retry` 判定为可重试的错误才会重试，重试之间不做退避

use std::future::Future;

use tracing::{info, warn};

/// 带条件重试的异步操作执行器
///
/// # 参数
/// - `max_attempts`: 最大尝试次数（含首次），至少为 1
/// - `operation_name`: 操作名称（用于日志）
/// - `operation`: 要执行的异步操作
/// - `should_retry`: 判断错误是否可重试
///
/// # 返回
/// 操作成功时返回 Ok(T)，否则返回最后一次的错误
pub async fn with_conditional_retry<F, Fut, T, E, P>(
    max_attempts: u32,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Operation failed, no more retries"
                    );
                    return Err(e);
                }
                if !should_retry(&e) {
                    return Err(e);
                }
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Operation failed, retrying"
                );
            }
        }
    }
}
