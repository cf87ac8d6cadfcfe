//! RoboFleet Operator - 管理 RoboFleet 租户的 Kubernetes Operator
//!
//! 该模块实现了 RoboFleet 的租户 Operator：为每个租户维护命名空间、服务账号、权限、
//! 镜像拉取密钥、域名、证书、网关与机器人安装配置，并通过准入校验保证默认租户与其他租户互斥。

pub mod conditions;
pub mod config;
pub mod context;
pub mod controller;
pub mod crd;
pub mod ensure;
pub mod event_handler;
pub mod metrics;
pub mod reconcile;
pub mod store;
pub mod webhook;

use anyhow::{Context, Result};
use kube::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::OperatorConfig;
use crate::metrics::Metrics;
use crate::store::{KubeStore, TenantSource};

/// Operator 主结构体
pub struct TenantOperator {
    /// Kubernetes 客户端
    client: Client,
    /// Operator 配置
    config: OperatorConfig,
    /// 指标
    metrics: Arc<Metrics>,
    /// 停止信号
    shutdown: CancellationToken,
}

impl TenantOperator {
    /// 创建新的 Operator 实例
    pub async fn new(config: OperatorConfig) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("无法创建 Kubernetes 客户端")?;
        let metrics = Arc::new(Metrics::new().context("无法注册指标")?);

        Ok(Self {
            client,
            config,
            metrics,
            shutdown: CancellationToken::new(),
        })
    }

    /// 运行控制器、准入校验服务器与指标服务器，任一退出时停止全部
    pub async fn start(&self) -> Result<()> {
        let metrics_addr: SocketAddr = format!(
            "{}:{}",
            self.config.metrics.listen_address, self.config.metrics.port
        )
        .parse()
        .context("指标服务器监听地址无效")?;

        let controller = controller::Controller::new(
            self.client.clone(),
            self.config.clone(),
            self.metrics.clone(),
        );
        let tenant_source: Arc<dyn TenantSource> = Arc::new(KubeStore::new(self.client.clone()));

        info!(
            "RoboFleet Operator 启动，集群域名 {}，租户独立网关 {}",
            self.config.domain, self.config.tenant_specific_gateways
        );

        let result = tokio::select! {
            result = controller.run(self.shutdown.clone()) => result.context("租户控制器异常退出"),
            result = webhook::run(
                tenant_source,
                &self.config.webhook,
                self.config.tenant_specific_gateways,
                self.shutdown.clone(),
            ) => result.context("准入校验服务器异常退出"),
            result = metrics::serve(self.metrics.clone(), metrics_addr, self.shutdown.clone()) => result,
        };

        if let Err(e) = &result {
            error!("{:#}", e);
        }
        self.shutdown.cancel();
        info!("RoboFleet Operator 已停止");
        result
    }

    /// 停止 Operator
    pub fn stop(&self) {
        info!("正在停止 RoboFleet Operator");
        self.shutdown.cancel();
    }
}
