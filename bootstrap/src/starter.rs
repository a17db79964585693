//! 服务启动器
//!
//! 提供统一的 RPC 服务启动模式

use std::sync::Arc;

use anyhow::Context;
use infra_config::Config;
use infra_rpc::{RpcModuleConfigurer, RpcServer, ServiceOptions, assemble};
use infra_telemetry::Logger;
use tracing::info;

use crate::app::Application;
use crate::runtime::init_runtime;
use crate::shutdown::ShutdownController;

/// 按配置组装 RPC 服务
pub fn build_rpc_server(
    config: &Config,
    logger: &Logger,
    configurer: &RpcModuleConfigurer,
) -> anyhow::Result<RpcServer> {
    let options =
        ServiceOptions::resolve(config, logger).context("failed to resolve rpc options")?;
    let service =
        assemble(options, logger, configurer).context("failed to assemble rpc service")?;
    Ok(RpcServer::new(service, logger.clone()))
}

/// 运行 RPC 服务
///
/// 这是所有微服务的统一入口点。它负责：
/// 1. 加载配置
/// 2. 初始化运行时（日志）
/// 3. 解析选项并组装服务
/// 4. 启动服务并等待关闭信号
/// 5. 停止服务
///
/// # 示例
///
/// ```ignore
/// use infra_bootstrap::run_rpc;
/// use infra_rpc::RpcModuleConfigurer;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     run_rpc("config", RpcModuleConfigurer::new()).await
/// }
/// ```
pub async fn run_rpc(config_dir: &str, configurer: RpcModuleConfigurer) -> anyhow::Result<()> {
    let config = Config::load(config_dir).context("failed to load config")?;
    let logger = init_runtime(&config).context("failed to init runtime")?;
    let shutdown = ShutdownController::new(logger.clone());
    run_rpc_with(&config, &logger, &configurer, &shutdown).await
}

/// 以给定配置和关闭控制器运行 RPC 服务
pub async fn run_rpc_with(
    config: &Config,
    logger: &Logger,
    configurer: &RpcModuleConfigurer,
    shutdown: &ShutdownController,
) -> anyhow::Result<()> {
    let server = build_rpc_server(config, logger, configurer)?;
    let name = server.service().name().to_string();
    logger.in_scope(|| info!(service = %name, "Starting rpc service"));

    Application::new(logger.clone())
        .with_component(Arc::new(server))
        .run(shutdown)
        .await
        .context("failed to start rpc server")?;

    logger.in_scope(|| info!(service = %name, "Service stopped"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use infra_rpc::ServiceError;
    use std::future::Future;
    use std::pin::Pin;

    fn config() -> Config {
        Config::from_toml(
            r#"
            [application]
            name = "echo"

            [rpc]
            registry = "memory"
            "#,
        )
    }

    #[test]
    fn test_build_rpc_server() {
        let server =
            build_rpc_server(&config(), &Logger::disabled(), &RpcModuleConfigurer::new()).unwrap();
        assert_eq!(server.service().name(), "echo");
    }

    #[test]
    fn test_build_rejects_missing_registry() {
        let config = Config::from_toml("[application]\nname = \"echo\"");
        let err = build_rpc_server(&config, &Logger::disabled(), &RpcModuleConfigurer::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to resolve rpc options");
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let logger = Logger::disabled();
        let shutdown = ShutdownController::new(logger.clone());
        shutdown.shutdown();
        run_rpc_with(&config(), &logger, &RpcModuleConfigurer::new(), &shutdown)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_failure_has_context() {
        let hook: infra_rpc::service::LifecycleHook = Arc::new(|| {
            let failed: Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send>> =
                Box::pin(async { Err(ServiceError::Hook("cache warmup failed".into())) });
            failed
        });
        let configurer = RpcModuleConfigurer::new().with_after_start(hook);
        let shutdown = ShutdownController::new(Logger::disabled());
        let err = run_rpc_with(&config(), &Logger::disabled(), &configurer, &shutdown)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to start rpc server");
        assert!(format!("{err:#}").contains("cache warmup failed"));
    }
}
