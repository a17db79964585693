//! Echo Service - 演示服务入口
//!
//! 使用 infra-bootstrap 统一启动模式

mod handler;

use clap::{CommandFactory, FromArgMatches, Parser};
use infra_bootstrap::run_rpc;
use infra_rpc::RpcModuleConfigurer;
use infra_rpc::flags::{framework_command, mirror_flags};

use handler::{HANDLER_NAME, echo_handler};

/// Echo rpc service
#[derive(Parser, Debug)]
#[command(name = "echo")]
struct EchoArgs {
    /// Directory holding default.toml and {env}.toml
    #[arg(long, default_value = "config")]
    config_dir: String,

    /// Greeting prepended to every reply
    #[arg(long, default_value = "hello")]
    greeting: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 框架参数由组装阶段解析，这里只需接受它们
    let matches = mirror_flags(EchoArgs::command(), &framework_command("echo")).get_matches();
    let args = EchoArgs::from_arg_matches(&matches)?;

    let greeting = args.greeting.clone();
    let configurer = RpcModuleConfigurer::new()
        .with_app_command(EchoArgs::command())
        .with_args(std::env::args_os())
        .with_handlers(move |router| {
            router.handle(HANDLER_NAME, echo_handler(greeting.clone()));
        });

    run_rpc(&args.config_dir, configurer).await
}
