//! 配置管理模块
//!
//! 该模块负责加载 Operator 的配置。配置依次来自内置默认值、可选的 YAML/JSON 配置文件
//! 以及 `ROBOFLEET_` 前缀的环境变量，最后由命令行参数覆盖。

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operator 配置结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// 集群域名，非默认租户的域名由它派生
    pub domain: String,
    /// 集群默认的 Istio 网关（namespace/name）
    pub default_gateway: String,
    /// 是否为每个租户创建独立的 DNS 记录、证书与网关
    pub tenant_specific_gateways: bool,
    /// 日志输出格式
    pub log_format: LogFormat,
    /// 准入 Webhook 配置
    pub webhook: WebhookConfig,
    /// 指标服务器配置
    pub metrics: MetricsConfig,
    /// 重新协调间隔配置
    pub requeue: RequeueConfig,
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 人类可读的文本
    Text,
    /// 结构化 JSON
    Json,
}

/// 准入 Webhook 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// 监听端口
    pub port: u16,
    /// 存放 tls.crt 与 tls.key 的目录
    pub cert_dir: PathBuf,
}

/// 指标服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 监听地址
    pub listen_address: String,
    /// 监听端口
    pub port: u16,
}

/// 重新协调间隔配置（秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequeueConfig {
    /// 尚未收敛时的复查间隔
    pub fast_seconds: u64,
    /// 收敛后的稳态轮询间隔
    pub slow_seconds: u64,
    /// 单次协调的截止时间
    pub pass_timeout_seconds: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            default_gateway: String::new(),
            tenant_specific_gateways: false,
            log_format: LogFormat::Text,
            webhook: WebhookConfig::default(),
            metrics: MetricsConfig::default(),
            requeue: RequeueConfig::default(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            port: 9876,
            cert_dir: PathBuf::from("/tls"),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            fast_seconds: 3,
            slow_seconds: 180,
            pass_timeout_seconds: 60,
        }
    }
}

impl RequeueConfig {
    /// 快速复查间隔
    pub fn fast(&self) -> Duration {
        Duration::from_secs(self.fast_seconds)
    }

    /// 稳态轮询间隔
    pub fn slow(&self) -> Duration {
        Duration::from_secs(self.slow_seconds)
    }

    /// 单次协调超时
    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_seconds)
    }
}

impl OperatorConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(anyhow!("必须通过 --domain 指定集群域名"));
        }
        if self.requeue.fast_seconds == 0 || self.requeue.slow_seconds == 0 {
            return Err(anyhow!("重新协调间隔必须大于 0"));
        }
        if self.requeue.pass_timeout_seconds == 0 {
            return Err(anyhow!("协调超时必须大于 0"));
        }
        Ok(())
    }
}

/// 配置管理器
pub struct ConfigManager {
    /// 配置文件路径
    config_path: Option<PathBuf>,
    /// 当前配置
    config: OperatorConfig,
}

impl ConfigManager {
    /// 从可选的配置文件与环境变量加载配置
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(config_path)
            .with_context(|| format!("无法加载配置: {:?}", config_path))?;

        Ok(Self {
            config_path: config_path.map(Path::to_path_buf),
            config,
        })
    }

    /// 加载配置
    fn load_config(config_path: Option<&Path>) -> Result<OperatorConfig> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            let config_file = path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;

            // 确定配置文件格式
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
            };
            builder = builder.add_source(File::with_name(config_file).format(format));
        }

        // ROBOFLEET_DOMAIN、ROBOFLEET_WEBHOOK__PORT 等
        builder = builder.add_source(
            Environment::with_prefix("ROBOFLEET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("构建配置失败")?;
        let operator_config = config
            .try_deserialize::<OperatorConfig>()
            .context("配置格式错误")?;

        Ok(operator_config)
    }

    /// 配置文件路径
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 获取完整配置
    pub fn get_config(&self) -> &OperatorConfig {
        &self.config
    }

    /// 用命令行参数覆盖配置
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        let config = &mut self.config;
        if let Some(domain) = overrides.domain {
            config.domain = domain;
        }
        if let Some(default_gateway) = overrides.default_gateway {
            config.default_gateway = default_gateway;
        }
        if let Some(enabled) = overrides.tenant_specific_gateways {
            config.tenant_specific_gateways = enabled;
        }
        if let Some(log_format) = overrides.log_format {
            config.log_format = log_format;
        }
        if let Some(port) = overrides.webhook_port {
            config.webhook.port = port;
        }
        if let Some(cert_dir) = overrides.cert_dir {
            config.webhook.cert_dir = cert_dir;
        }
        if let Some(port) = overrides.metrics_port {
            config.metrics.port = port;
        }
        if let Some(seconds) = overrides.requeue_fast_seconds {
            config.requeue.fast_seconds = seconds;
        }
        if let Some(seconds) = overrides.requeue_slow_seconds {
            config.requeue.slow_seconds = seconds;
        }
        if let Some(seconds) = overrides.pass_timeout_seconds {
            config.requeue.pass_timeout_seconds = seconds;
        }
    }

    /// 校验并取出最终配置
    pub fn into_validated(self) -> Result<OperatorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// 命令行覆盖项，未给出的字段保持配置文件或环境变量中的值
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub domain: Option<String>,
    pub default_gateway: Option<String>,
    pub tenant_specific_gateways: Option<bool>,
    pub log_format: Option<LogFormat>,
    pub webhook_port: Option<u16>,
    pub cert_dir: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub requeue_fast_seconds: Option<u64>,
    pub requeue_slow_seconds: Option<u64>,
    pub pass_timeout_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.webhook.port, 9876);
        assert_eq!(config.webhook.cert_dir, PathBuf::from("/tls"));
        assert_eq!(config.metrics.port, 9090);
        assert_eq!(config.requeue.fast(), Duration::from_secs(3));
        assert_eq!(config.requeue.slow(), Duration::from_secs(180));
        assert!(!config.tenant_specific_gateways);
    }

    #[test]
    fn test_empty_domain_is_rejected() {
        let config = OperatorConfig::default();
        assert!(config.validate().is_err());

        let config = OperatorConfig {
            domain: "example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml_file_with_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "domain: file.example.com\ntenant_specific_gateways: true\nrequeue:\n  slow_seconds: 600"
        )
        .unwrap();

        let mut manager = ConfigManager::new(Some(file.path())).unwrap();
        assert_eq!(manager.get_config().domain, "file.example.com");
        assert!(manager.get_config().tenant_specific_gateways);
        assert_eq!(manager.get_config().requeue.slow_seconds, 600);
        // 文件中未给出的字段取默认值
        assert_eq!(manager.get_config().requeue.fast_seconds, 3);

        manager.apply_overrides(ConfigOverrides {
            domain: Some("cli.example.com".to_string()),
            webhook_port: Some(8443),
            ..Default::default()
        });
        let config = manager.into_validated().unwrap();
        assert_eq!(config.domain, "cli.example.com");
        assert_eq!(config.webhook.port, 8443);
    }

    #[test]
    fn test_unsupported_extension() {
        let path = PathBuf::from("/tmp/robofleet.toml");
        assert!(ConfigManager::new(Some(&path)).is_err());
    }
}
