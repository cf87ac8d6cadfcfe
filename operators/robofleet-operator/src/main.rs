//! robofleet-operator 可执行文件
//!
//! 加载配置、初始化日志，然后运行租户 Operator 直到收到退出信号。

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use robofleet_operator::config::{ConfigManager, ConfigOverrides, LogFormat};
use robofleet_operator::crd::Tenant;
use robofleet_operator::TenantOperator;

#[derive(Parser, Debug)]
#[command(name = "robofleet-operator", about = "管理 RoboFleet 租户的 Kubernetes Operator")]
struct Args {
    /// 配置文件路径（YAML 或 JSON）
    #[arg(long, env = "ROBOFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// 集群域名
    #[arg(long)]
    domain: Option<String>,

    /// 未启用租户独立网关时使用的默认网关（命名空间/名称）
    #[arg(long)]
    default_gateway: Option<String>,

    /// 为每个租户创建独立的域名、证书与网关
    #[arg(long)]
    tenant_specific_gateways: Option<bool>,

    /// 准入校验 HTTPS 端口
    #[arg(long)]
    webhook_port: Option<u16>,

    /// 存放 tls.crt 与 tls.key 的目录
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// 指标与健康检查端口
    #[arg(long)]
    metrics_port: Option<u16>,

    /// 日志格式
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// 尚未收敛时的复查间隔（秒）
    #[arg(long)]
    requeue_fast_seconds: Option<u64>,

    /// 收敛后的轮询间隔（秒）
    #[arg(long)]
    requeue_slow_seconds: Option<u64>,

    /// 单次协调的截止时间（秒）
    #[arg(long)]
    pass_timeout_seconds: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 输出 Tenant CRD 的 YAML
    Crdgen,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            domain: self.domain.clone(),
            default_gateway: self.default_gateway.clone(),
            tenant_specific_gateways: self.tenant_specific_gateways,
            log_format: self.log_format,
            webhook_port: self.webhook_port,
            cert_dir: self.cert_dir.clone(),
            metrics_port: self.metrics_port,
            requeue_fast_seconds: self.requeue_fast_seconds,
            requeue_slow_seconds: self.requeue_slow_seconds,
            pass_timeout_seconds: self.pass_timeout_seconds,
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kube=warn,hyper=warn,warp=warn".into());

    match format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(env_filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::Crdgen) = args.command {
        print!("{}", serde_yaml::to_string(&Tenant::crd()).context("无法序列化 CRD")?);
        return Ok(());
    }

    let mut manager = ConfigManager::new(args.config.as_deref())?;
    manager.apply_overrides(args.overrides());
    let config = manager.into_validated()?;

    init_tracing(config.log_format);

    let operator = Arc::new(TenantOperator::new(config).await?);
    let signal_operator = operator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到退出信号");
            signal_operator.stop();
        }
    });

    operator.start().await
}
