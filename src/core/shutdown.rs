//! 优雅关闭
//!
//! 三个服务（API / 转发代理 / SSE 中继）共用：监听 Ctrl+C 与 SIGTERM，
//! 通过 CancellationToken 通知 `axum::serve(..).with_graceful_shutdown(..)` 停止接收新连接，
//! 同时让仍在推送的 SSE 流尽快结束。

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM（容器 / Cloud Run 停止实例）
    Signal,
}

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 关闭 token（交给长连接任务，用于提前结束）
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；重复调用无副作用
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.token.is_cancelled() {
            return;
        }
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    /// 等待关闭信号（可直接作为 with_graceful_shutdown 的参数）
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_cancels_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(manager.is_shutdown());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_reason_broadcast_once() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        manager.shutdown(ShutdownReason::Signal);
        manager.shutdown(ShutdownReason::UserInitiated);
        assert_eq!(rx.recv().await.unwrap(), ShutdownReason::Signal);
        assert!(rx.try_recv().is_err());
        manager.wait_for_shutdown().await;
    }
}
