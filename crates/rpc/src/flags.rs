//! 命令行参数适配
//!
//! 框架自己的参数解析器会看到完整的命令行。应用注册的每个具名参数都会
//! 以可选字符串参数的形式镜像进框架的命令定义，避免解析时被当作未知参数拒绝。

use std::ffi::OsString;
use std::num::ParseIntError;
use std::time::Duration;

use clap::{Arg, ArgAction, Command, CommandFactory, FromArgMatches, Parser};

const APP_ARGS_ID: &str = "__app_args";

/// 框架参数
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct FrameworkFlags {
    /// Name of the server
    #[arg(long = "server_name", env = "MICRO_SERVER_NAME")]
    pub server_name: Option<String>,

    /// Bind address for the server
    #[arg(long = "server_address", env = "MICRO_SERVER_ADDRESS")]
    pub server_address: Option<String>,

    /// Register TTL in seconds
    #[arg(long = "register_ttl", env = "MICRO_REGISTER_TTL", value_parser = parse_secs)]
    pub register_ttl: Option<Duration>,

    /// Register interval in seconds
    #[arg(
        long = "register_interval",
        env = "MICRO_REGISTER_INTERVAL",
        value_parser = parse_secs
    )]
    pub register_interval: Option<Duration>,
}

fn parse_secs(raw: &str) -> Result<Duration, ParseIntError> {
    raw.parse().map(Duration::from_secs)
}

/// 框架命令定义
pub fn framework_command(name: &str) -> Command {
    FrameworkFlags::command().name(name.to_string())
}

/// 把应用命令的具名参数镜像进框架命令
///
/// 已存在的 id、长参数或短参数不会重复添加；应用有位置参数或子命令时，
/// 额外接收剩余的所有参数。
pub fn mirror_flags(framework: Command, app: &Command) -> Command {
    let mut command = framework;
    let mut takes_rest = app.has_subcommands();

    for arg in app.get_arguments() {
        if arg.is_positional() {
            takes_rest = true;
            continue;
        }
        let id = arg.get_id().as_str();
        if matches!(id, "help" | "version") {
            continue;
        }
        let (long, short) = (arg.get_long(), arg.get_short());
        if long.is_none() && short.is_none() {
            continue;
        }
        let duplicated = command.get_arguments().any(|existing| {
            existing.get_id() == arg.get_id()
                || (long.is_some() && existing.get_long() == long)
                || (short.is_some() && existing.get_short() == short)
        });
        if duplicated {
            continue;
        }

        let mut mirrored = Arg::new(id.to_string())
            .action(ArgAction::Append)
            .num_args(0..=1)
            .required(false);
        if let Some(long) = long {
            mirrored = mirrored.long(long.to_string());
        }
        if let Some(short) = short {
            mirrored = mirrored.short(short);
        }
        command = command.arg(mirrored);
    }

    if takes_rest {
        command = command.arg(
            Arg::new(APP_ARGS_ID)
                .num_args(0..)
                .action(ArgAction::Append)
                .allow_hyphen_values(true)
                .trailing_var_arg(true),
        );
    }
    command
}

/// 解析命令行，只提取框架参数
pub fn parse_flags<I, T>(command: Command, args: I) -> Result<FrameworkFlags, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command.try_get_matches_from(args)?;
    FrameworkFlags::from_arg_matches(&matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> Command {
        Command::new("orders")
            .arg(Arg::new("config").long("config").short('c'))
            .arg(Arg::new("verbose").long("verbose").action(ArgAction::SetTrue))
            .arg(Arg::new("alias").long("server_name"))
    }

    #[test]
    fn test_parse_framework_flags() {
        let flags = parse_flags(
            framework_command("orders"),
            [
                "orders",
                "--server_name",
                "orders-canary",
                "--register_ttl=20",
                "--register_interval",
                "5",
            ],
        )
        .unwrap();

        assert_eq!(flags.server_name.as_deref(), Some("orders-canary"));
        assert_eq!(flags.register_ttl, Some(Duration::from_secs(20)));
        assert_eq!(flags.register_interval, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_unknown_flag_rejected_without_mirroring() {
        let err = parse_flags(framework_command("orders"), ["orders", "--config", "a.toml"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_mirrored_application_flags_accepted() {
        let command = mirror_flags(framework_command("orders"), &app());
        let flags = parse_flags(
            command,
            [
                "orders",
                "--config",
                "a.toml",
                "-c",
                "b.toml",
                "--verbose",
                "--server_address",
                "memory:9000",
            ],
        )
        .unwrap();

        assert_eq!(flags.server_address.as_deref(), Some("memory:9000"));
        assert_eq!(flags.server_name, None);
    }

    #[test]
    fn test_mirroring_skips_existing_flags() {
        let command = mirror_flags(framework_command("orders"), &app());
        let longs: Vec<_> = command
            .get_arguments()
            .filter_map(|arg| arg.get_long())
            .filter(|long| *long == "server_name")
            .collect();
        assert_eq!(longs.len(), 1);
    }

    #[test]
    fn test_positional_arguments_pass_through() {
        let app = Command::new("orders").arg(Arg::new("input"));
        let command = mirror_flags(framework_command("orders"), &app);
        let flags = parse_flags(command, ["orders", "--register_ttl", "12", "input.json"]).unwrap();
        assert_eq!(flags.register_ttl, Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_invalid_duration() {
        let err = parse_flags(framework_command("orders"), ["orders", "--register_ttl", "soon"]);
        assert!(err.is_err());
    }
}
