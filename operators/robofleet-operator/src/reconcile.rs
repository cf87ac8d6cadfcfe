//! 租户协调模块
//!
//! 该模块实现租户生命周期的核心协调逻辑：管理 finalizer、按依赖顺序编排各个确保器、
//! 汇总部分失败，并决定下一次复查的节奏。单次协调只在结束时写一次状态。

use kube::ResourceExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use robofleet_common::naming::tenant_main_namespace;
use robofleet_common::{Error, Result, ResultExt};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::conditions::{all_conditions_true, set_condition};
use crate::config::OperatorConfig;
use crate::context::PassContext;
use crate::crd::{AppRollout, ChartAssignment, ConditionStatus, Tenant, TenantConditionType, TenantStatus};
use crate::ensure::{
    certificate::ensure_certificate,
    collect::{collect_namespaces, collect_robots},
    dns::ensure_dns,
    gateway::ensure_gateway,
    namespace::ensure_namespaces,
    permissions::ensure_permissions,
    pull_secret::ensure_pull_secret,
    robot_setup::ensure_robot_setup,
    service_account::ensure_service_accounts,
};
use crate::metrics::Metrics;
use crate::store::ObjectStore;

/// 租户控制器的 finalizer
pub const FINALIZER: &str = "tenant-controller.robofleet.io";

/// 单次协调的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// 已收敛，按稳态间隔轮询
    Converged,
    /// 尚未收敛，按快速间隔复查
    Pending(String),
    /// 租户不存在
    Absent,
    /// 清理完成，finalizer 已移除
    Deleted,
}

impl ReconcileOutcome {
    /// 指标标签
    pub fn as_label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Converged => "converged",
            ReconcileOutcome::Pending(_) => "pending",
            ReconcileOutcome::Absent => "absent",
            ReconcileOutcome::Deleted => "deleted",
        }
    }
}

/// 一次协调中确保步骤的失败汇总
#[derive(Default)]
struct Failures {
    /// 最近一次不可恢复的错误
    last_error: Option<Error>,
    /// 最近一次可恢复的领域状态
    last_recoverable: Option<Error>,
}

/// 协调器结构体
pub struct Reconciler<S> {
    /// 对象存储
    store: Arc<S>,
    /// Operator 配置
    config: OperatorConfig,
    /// 随机域名使用的随机数源
    rng: Mutex<StdRng>,
    /// 指标
    metrics: Arc<Metrics>,
}

impl<S: ObjectStore> Reconciler<S> {
    /// 创建新的协调器
    pub fn new(store: Arc<S>, config: OperatorConfig, metrics: Arc<Metrics>) -> Self {
        Self::with_rng(store, config, metrics, StdRng::from_entropy())
    }

    /// 使用指定随机数源创建协调器
    pub fn with_rng(store: Arc<S>, config: OperatorConfig, metrics: Arc<Metrics>, rng: StdRng) -> Self {
        Self {
            store,
            config,
            rng: Mutex::new(rng),
            metrics,
        }
    }

    /// Operator 配置
    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// 指标
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// 协调指定名称的租户
    pub async fn reconcile(&self, name: &str, cancel: CancellationToken) -> Result<ReconcileOutcome> {
        let deadline = Instant::now() + self.config.requeue.pass_timeout();
        let cx = PassContext::new(&*self.store, &self.config, &self.rng, cancel, deadline);

        let result = self.reconcile_pass(&cx, name).await;
        match &result {
            Ok(outcome) => self.metrics.reconciled(outcome.as_label()),
            Err(_) => self.metrics.reconciled("error"),
        }
        result
    }

    async fn reconcile_pass(&self, cx: &PassContext<'_, S>, name: &str) -> Result<ReconcileOutcome> {
        let Some(mut tenant) = cx.get::<Tenant>(None, name).await.for_tenant("读取租户", name)? else {
            info!("租户 {} 已不存在，跳过协调", name);
            return Ok(ReconcileOutcome::Absent);
        };

        if tenant.metadata.deletion_timestamp.is_some() {
            info!("清理租户 {}", name);
            return self.finalize(cx, tenant).await;
        }

        if !tenant.finalizers().iter().any(|f| f == FINALIZER) {
            info!("为租户 {} 添加 finalizer", name);
            tenant.finalizers_mut().push(FINALIZER.to_string());
            tenant = cx.update(&tenant).await.for_tenant("添加 finalizer", name)?;
        }

        debug!("协调租户 {}", name);

        if let Err(err) = ensure_namespaces(cx, &mut tenant).await {
            self.metrics.ensure_failed("namespace");
            self.write_status(cx, &tenant).await.ok();
            if err.is_recoverable() {
                warn!("租户 {} 的命名空间正在删除: {}", name, err);
                return Ok(ReconcileOutcome::Pending(err.to_string()));
            }
            return Err(err).for_tenant("确保命名空间", name);
        }

        if let Err(err) = collect_namespaces(cx, &mut tenant).await {
            self.write_status(cx, &tenant).await.ok();
            return Err(err).for_tenant("收集命名空间", name);
        }
        if let Err(err) = collect_robots(cx, &mut tenant).await {
            self.write_status(cx, &tenant).await.ok();
            return Err(err).for_tenant("统计机器人", name);
        }

        let mut failures = Failures::default();

        let result = ensure_service_accounts(cx, &mut tenant).await;
        self.note(&mut failures, name, "service_account", "确保服务账号", result);

        let result = ensure_permissions(cx, &mut tenant).await;
        self.note(&mut failures, name, "permissions", "确保权限", result);

        let result = ensure_pull_secret(cx, &mut tenant).await;
        self.note(&mut failures, name, "pull_secret", "确保镜像拉取密钥", result);

        if self.config.tenant_specific_gateways {
            self.ensure_ingress(cx, &mut tenant, &mut failures).await;
        } else {
            let status = tenant.status.get_or_insert_with(TenantStatus::default);
            status.tenant_domain = None;
            status.gateway = Some(self.config.default_gateway.clone()).filter(|g| !g.is_empty());
        }

        let result = ensure_robot_setup(cx, &mut tenant).await;
        self.note(&mut failures, name, "robot_setup", "确保机器人安装配置", result);

        let status_result = self.write_status(cx, &tenant).await;

        if let Some(err) = failures.last_error {
            return Err(err);
        }
        status_result.for_tenant("更新租户状态", name)?;

        if let Some(err) = failures.last_recoverable {
            return Ok(ReconcileOutcome::Pending(err.to_string()));
        }
        if !all_conditions_true(&tenant) {
            return Ok(ReconcileOutcome::Pending(pending_conditions(&tenant)));
        }
        debug!("租户 {} 已收敛", name);
        Ok(ReconcileOutcome::Converged)
    }

    /// DNS 记录、证书与网关依次依赖，前一步失败时后续步骤标记为受阻
    async fn ensure_ingress(&self, cx: &PassContext<'_, S>, tenant: &mut Tenant, failures: &mut Failures) {
        let name = tenant.name_any();

        let result = ensure_dns(cx, tenant).await;
        let dns_failed = self.note(failures, &name, "dns", "确保 DNS 记录", result);

        let certificate_failed = if dns_failed {
            set_condition(
                tenant,
                TenantConditionType::Certificate,
                ConditionStatus::False,
                "租户尚未创建 DNS 记录",
            );
            true
        } else {
            let result = ensure_certificate(cx, tenant).await;
            self.note(failures, &name, "certificate", "确保 TLS 证书", result)
        };

        if dns_failed || certificate_failed {
            set_condition(
                tenant,
                TenantConditionType::Gateway,
                ConditionStatus::False,
                "租户尚未创建 DNS 记录和/或 TLS 证书",
            );
        } else {
            let result = ensure_gateway(cx, tenant).await;
            self.note(failures, &name, "gateway", "确保 Istio 网关", result);
        }
    }

    /// 记录确保步骤的失败，返回该步骤是否失败
    fn note(&self, failures: &mut Failures, name: &str, step: &str, operation: &str, result: Result<()>) -> bool {
        let Err(err) = result.for_tenant(operation, name) else {
            return false;
        };
        self.metrics.ensure_failed(step);
        if err.is_recoverable() {
            warn!("{}", err);
            failures.last_recoverable = Some(err);
        } else {
            error!("{}", err);
            failures.last_error = Some(err);
        }
        true
    }

    /// 删除租户前清理依赖的应用发布，全部消失后移除 finalizer
    async fn finalize(&self, cx: &PassContext<'_, S>, mut tenant: Tenant) -> Result<ReconcileOutcome> {
        let name = tenant.name_any();
        let main = tenant_main_namespace(&name);

        let rollouts = cx
            .list::<AppRollout>(Some(&main))
            .await
            .for_tenant("列出应用发布", &name)?;
        if !rollouts.is_empty() {
            info!("删除租户 {} 的 {} 个应用发布", name, rollouts.len());
            cx.delete_all_of::<AppRollout>(&main)
                .await
                .for_tenant("删除应用发布", &name)?;
            return Ok(ReconcileOutcome::Pending(format!(
                "正在删除 {} 个应用发布",
                rollouts.len()
            )));
        }

        let assignments = cx
            .list::<ChartAssignment>(Some(&main))
            .await
            .for_tenant("列出图表分配", &name)?;
        if !assignments.is_empty() {
            info!("等待租户 {} 的 {} 个图表分配被删除", name, assignments.len());
            return Ok(ReconcileOutcome::Pending(format!(
                "等待 {} 个图表分配被删除",
                assignments.len()
            )));
        }

        if tenant.finalizers().iter().any(|f| f == FINALIZER) {
            info!("移除租户 {} 的 finalizer", name);
            tenant.finalizers_mut().retain(|f| f != FINALIZER);
            cx.update(&tenant).await.for_tenant("移除 finalizer", &name)?;
        }
        info!("租户 {} 已删除", name);
        Ok(ReconcileOutcome::Deleted)
    }

    /// 写入租户状态，失败只记录日志并交给调用方决定
    async fn write_status(&self, cx: &PassContext<'_, S>, tenant: &Tenant) -> Result<()> {
        match cx.update_status(tenant).await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!("更新租户 {} 的状态失败: {}", tenant.name_any(), err);
                Err(err)
            }
        }
    }
}

/// 尚为 False 的条件列表，用于说明复查原因
fn pending_conditions(tenant: &Tenant) -> String {
    tenant
        .status
        .as_ref()
        .map(|s| {
            s.conditions
                .iter()
                .filter(|c| c.status == ConditionStatus::False)
                .map(|c| c.type_.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}
