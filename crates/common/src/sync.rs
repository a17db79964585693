//! 同步工具
//!
//! - `InFlightCounter`: 带超时等待的在途计数器（类似 WaitGroup）
//! - `OneShotSignal`: 每个生命周期周期重新装配的一次性完成信号

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, oneshot};

/// 在途请求计数器
///
/// 处理开始时 `enter()`，守卫释放时计数减一；关闭时通过 `wait_timeout`
/// 等待计数归零。
#[derive(Clone, Default)]
pub struct InFlightCounter {
    inner: Arc<CounterInner>,
}

#[derive(Default)]
struct CounterInner {
    count: AtomicUsize,
    idle: Notify,
}

/// 在途守卫，Drop 时计数减一
pub struct InFlightGuard {
    inner: Arc<CounterInner>,
}

impl InFlightCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个进入处理的请求
    pub fn enter(&self) -> InFlightGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            inner: self.inner.clone(),
        }
    }

    /// 当前在途数量
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// 等待计数归零
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // 先注册再检查，避免错过归零通知
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// 有界等待计数归零
    ///
    /// 返回 true 表示已归零，false 表示等待超时。
    /// 超时后不会强制结束任何在途处理。
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// 一次性完成信号
///
/// 等待方每个周期调用 `arm()` 拿到新的接收端，写入方至多 `fire()` 一次；
/// 未装配时 `fire()` 不产生任何效果，旧周期的接收端不会被复用。
#[derive(Default)]
pub struct OneShotSignal {
    slot: Mutex<Option<oneshot::Sender<()>>>,
}

impl OneShotSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 装配新的周期，返回接收端
    ///
    /// 上一个周期未触发的发送端被丢弃，其接收端会收到关闭错误。
    pub fn arm(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// 触发信号，返回是否有等待方收到
    pub fn fire(&self) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// 当前是否已装配且尚未触发
    pub fn is_armed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
