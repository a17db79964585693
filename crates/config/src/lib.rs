//! infra-config - 配置加载库
//!
//! 合并顺序（后者覆盖前者）：`default.toml` → `{env}.toml` → `APP_` 前缀环境变量

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// 应用名称配置键
pub const CONF_APP_NAME: &str = "application.name";
/// 运行环境配置键
pub const CONF_ENV: &str = "env";
/// 遥测配置键
pub const CONF_TELEMETRY: &str = "telemetry";

pub const ENV_DEV: &str = "dev";
pub const ENV_TEST: &str = "test";
pub const ENV_PROD: &str = "prod";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid config at '{key}': {source}")]
    Invalid {
        key: String,
        #[source]
        source: figment::Error,
    },
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

/// 配置提供者
///
/// 对外只暴露按键读取和按键反序列化两类操作
#[derive(Debug, Clone)]
pub struct Config {
    figment: Figment,
}

impl Config {
    /// 从配置目录和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| ENV_DEV.to_string());

        let figment = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("APP_").split("__"));

        // 提前暴露文件语法错误
        figment.extract::<figment::value::Dict>()?;

        Ok(Self { figment })
    }

    /// 从 TOML 文本构建配置
    pub fn from_toml(content: &str) -> Self {
        Self::from_figment(Figment::from(Toml::string(content)))
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    /// 键是否存在
    pub fn is_set(&self, key: &str) -> bool {
        self.figment.find_value(key).is_ok()
    }

    /// 读取字符串，缺失或类型不符时返回 None
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.figment.extract_inner::<String>(key).ok()
    }

    /// 读取布尔值，缺失或类型不符时返回 false
    pub fn get_bool(&self, key: &str) -> bool {
        self.figment.extract_inner::<bool>(key).unwrap_or(false)
    }

    /// 将子树反序列化为目标类型
    pub fn unmarshal_key<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        self.figment
            .extract_inner(key)
            .map_err(|source| ConfigError::Invalid {
                key: key.to_string(),
                source,
            })
    }

    /// 应用名称
    pub fn application_name(&self) -> Option<String> {
        self.get_string(CONF_APP_NAME).filter(|name| !name.is_empty())
    }

    /// 运行环境
    pub fn environment(&self) -> String {
        self.get_string(CONF_ENV)
            .unwrap_or_else(|| ENV_DEV.to_string())
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment() == ENV_PROD
    }

    /// 遥测配置，未配置时使用默认值
    pub fn telemetry(&self) -> Result<TelemetryConfig, ConfigError> {
        if !self.is_set(CONF_TELEMETRY) {
            return Ok(TelemetryConfig::default());
        }
        self.unmarshal_key(CONF_TELEMETRY)
    }
}
