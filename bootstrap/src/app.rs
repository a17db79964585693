//! 应用组件编排
//!
//! 组件按注册顺序启动；任一组件启动失败立即返回。
//! 关闭时按同样顺序停止所有已启动组件，停止失败只记录日志。

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use infra_rpc::RpcServer;
use infra_telemetry::Logger;
use tracing::{error, info};

use crate::ShutdownController;

/// 带生命周期的应用组件
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl Component for RpcServer {
    fn name(&self) -> &str {
        self.service().name()
    }

    async fn start(&self) -> anyhow::Result<()> {
        RpcServer::start(self).await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        RpcServer::stop(self).await?;
        Ok(())
    }
}

/// 应用：一组按序启停的组件
pub struct Application {
    components: Vec<Arc<dyn Component>>,
    logger: Logger,
}

impl Application {
    pub fn new(logger: Logger) -> Self {
        Self {
            components: Vec::new(),
            logger,
        }
    }

    pub fn with_component(mut self, component: Arc<dyn Component>) -> Self {
        self.components.push(component);
        self
    }

    pub fn component_names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    /// 依次启动组件，失败时先停止已启动的组件
    pub async fn start(&self) -> anyhow::Result<()> {
        for (index, component) in self.components.iter().enumerate() {
            let name = component.name().to_string();
            if let Err(err) = component.start().await {
                self.stop_components(&self.components[..index]).await;
                return Err(err).with_context(|| format!("failed to start component {name}"));
            }
            self.logger
                .in_scope(|| info!(component = %name, "Component started"));
        }
        Ok(())
    }

    /// 依次停止全部组件
    pub async fn stop(&self) {
        self.stop_components(&self.components).await;
    }

    async fn stop_components(&self, components: &[Arc<dyn Component>]) {
        for component in components {
            match component.stop().await {
                Ok(()) => self
                    .logger
                    .in_scope(|| info!(component = %component.name(), "Component stopped")),
                Err(err) => self.logger.in_scope(|| {
                    error!(
                        component = %component.name(),
                        error = %format!("{err:#}"),
                        "Failed to stop component"
                    )
                }),
            }
        }
    }

    /// 启动全部组件，等待关闭触发后停止
    pub async fn run(&self, shutdown: &ShutdownController) -> anyhow::Result<()> {
        self.start().await?;
        shutdown.wait_or_signal().await;
        self.stop().await;
        Ok(())
    }
}
