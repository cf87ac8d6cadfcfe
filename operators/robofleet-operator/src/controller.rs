//! 控制器模块
//!
//! 该模块把协调器接入 kube runtime 的控制器：监听租户及其依赖对象，通过事件路由把变化映射回租户，
//! 并把协调结果转换为复查动作。

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller as KubeController},
        reflector::{ObjectRef, Store},
        watcher,
    },
    ResourceExt,
};
use rand::Rng;
use robofleet_common::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::{Certificate, DnsEntry, Gateway, Robot, Tenant};
use crate::event_handler::{route, RoutedObject};
use crate::metrics::Metrics;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::store::KubeStore;

/// 控制器共享的上下文
struct ControllerContext {
    /// 协调器
    reconciler: Reconciler<KubeStore>,
    /// 控制器的租户缓存
    tenants: Store<Tenant>,
    /// 停止信号
    shutdown: CancellationToken,
}

/// 控制器结构体
pub struct Controller {
    /// Kubernetes 客户端
    client: Client,
    /// Operator 配置
    config: OperatorConfig,
    /// 指标
    metrics: Arc<Metrics>,
}

impl Controller {
    /// 创建新的控制器
    pub fn new(client: Client, config: OperatorConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            config,
            metrics,
        }
    }

    /// 运行租户控制器，直到停止信号触发
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let client = self.client.clone();
        let tenants: Api<Tenant> = Api::all(client.clone());

        let controller = KubeController::new(tenants, watcher::Config::default());
        let store = controller.store();

        let mut controller = controller
            .watches(
                Api::<Namespace>::all(client.clone()),
                watcher::Config::default(),
                mapper(&store, RoutedObject::namespace),
            )
            .watches(
                Api::<ServiceAccount>::all(client.clone()),
                watcher::Config::default(),
                mapper(&store, RoutedObject::owned::<ServiceAccount>),
            )
            .watches(
                Api::<RoleBinding>::all(client.clone()),
                watcher::Config::default(),
                mapper(&store, RoutedObject::owned::<RoleBinding>),
            )
            .watches(
                Api::<Secret>::all(client.clone()),
                watcher::Config::default(),
                mapper(&store, RoutedObject::secret),
            )
            .watches(
                Api::<ConfigMap>::all(client.clone()),
                watcher::Config::default(),
                mapper(&store, RoutedObject::config_map),
            )
            .watches(
                Api::<Robot>::all(client.clone()),
                watcher::Config::default(),
                mapper(&store, RoutedObject::robot),
            );

        if self.config.tenant_specific_gateways {
            info!("启用租户独立网关，监听 DNS 记录、证书与网关");
            controller = controller
                .watches(
                    Api::<DnsEntry>::all(client.clone()),
                    watcher::Config::default(),
                    mapper(&store, RoutedObject::owned::<DnsEntry>),
                )
                .watches(
                    Api::<Certificate>::all(client.clone()),
                    watcher::Config::default(),
                    mapper(&store, RoutedObject::owned::<Certificate>),
                )
                .watches(
                    Api::<Gateway>::all(client.clone()),
                    watcher::Config::default(),
                    mapper(&store, RoutedObject::owned::<Gateway>),
                );
        }

        let context = Arc::new(ControllerContext {
            reconciler: Reconciler::new(
                Arc::new(KubeStore::new(client)),
                self.config.clone(),
                self.metrics.clone(),
            ),
            tenants: store,
            shutdown: shutdown.clone(),
        });

        info!("启动租户控制器");
        self.metrics.set_ready(true);

        controller
            .graceful_shutdown_on(async move { shutdown.cancelled().await })
            .run(reconcile, error_policy, context)
            .for_each(|result| async move {
                match result {
                    Ok((object, action)) => debug!("协调完成: {} {:?}", object.name, action),
                    Err(e) => warn!("控制器错误: {}", e),
                }
            })
            .await;

        self.metrics.set_ready(false);
        info!("租户控制器已停止");
        Ok(())
    }
}

/// 构造把被监听对象映射为租户引用的函数
fn mapper<K: 'static>(
    store: &Store<Tenant>,
    view: fn(&K) -> RoutedObject,
) -> impl Fn(K) -> Vec<ObjectRef<Tenant>> + Send + Sync + 'static {
    let store = store.clone();
    move |object| {
        let tenants = tenant_names(&store);
        route(&view(&object), &tenants)
            .iter()
            .map(|name| ObjectRef::new(name))
            .collect()
    }
}

/// 缓存中的全部租户名
fn tenant_names(store: &Store<Tenant>) -> Vec<String> {
    store.state().iter().map(|tenant| tenant.name_any()).collect()
}

async fn reconcile(tenant: Arc<Tenant>, context: Arc<ControllerContext>) -> Result<Action, Error> {
    let name = tenant.name_any();
    context.reconciler.metrics().set_tenants(context.tenants.state().len());

    let outcome = context
        .reconciler
        .reconcile(&name, context.shutdown.child_token())
        .await?;
    Ok(action_for(&outcome, &context.reconciler.config().requeue))
}

/// 把协调结果转换为复查动作
fn action_for(outcome: &ReconcileOutcome, requeue: &crate::config::RequeueConfig) -> Action {
    match outcome {
        ReconcileOutcome::Converged => Action::requeue(requeue.slow()),
        ReconcileOutcome::Pending(reason) => {
            debug!("租户尚未收敛: {}", reason);
            Action::requeue(requeue.fast())
        }
        ReconcileOutcome::Absent | ReconcileOutcome::Deleted => Action::await_change(),
    }
}

fn error_policy(tenant: Arc<Tenant>, error: &Error, context: Arc<ControllerContext>) -> Action {
    let requeue = &context.reconciler.config().requeue;
    if !error.is_retryable() {
        error!("租户 {} 协调失败，需要修改声明后才能恢复: {}", tenant.name_any(), error);
        return Action::requeue(requeue.slow());
    }
    error!("租户 {} 协调失败: {}", tenant.name_any(), error);
    Action::requeue(with_jitter(requeue.fast()))
}

/// 在复查间隔上增加最多一倍的随机抖动
fn with_jitter(interval: Duration) -> Duration {
    let millis = interval.as_millis() as u64;
    let jitter = rand::thread_rng().gen_range(0..=millis);
    interval + Duration::from_millis(jitter)
}
