//! 资源确保器
//!
//! 每个确保器负责一类依赖资源：读取按租户名推导出的对象，不存在则创建，存在则合并期望字段后更新，
//! 同时设置指向租户的控制器属主引用，最后把结果记录为对应的条件。
//! 确保器之间互不调用，由协调器按依赖顺序编排。

pub mod certificate;
pub mod collect;
pub mod dns;
pub mod gateway;
pub mod namespace;
pub mod permissions;
pub mod pull_secret;
pub mod robot_setup;
pub mod service_account;

use kube::{Resource, ResourceExt};
use robofleet_common::{Error, Result};
use tracing::debug;

use crate::conditions::set_condition;
use crate::context::PassContext;
use crate::crd::{ConditionStatus, Tenant, TenantConditionType};
use crate::store::{ObjectStore, StoreObject};

/// 标记命名空间归属的标签，以及配置快照上的租户注解
pub const TENANT_LABEL: &str = "robofleet.io/tenant";

/// 确保器对外部就绪信号的观察结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// 条件状态
    pub status: ConditionStatus,
    /// 条件说明
    pub message: String,
}

impl Observation {
    pub fn ready(message: impl Into<String>) -> Self {
        Self {
            status: ConditionStatus::True,
            message: message.into(),
        }
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            status: ConditionStatus::False,
            message: message.into(),
        }
    }
}

/// 把确保结果记录为条件：成功时采用观察结果，失败时置为 False 并返回错误
pub(crate) fn record(
    tenant: &mut Tenant,
    condition_type: TenantConditionType,
    result: Result<Observation>,
) -> Result<()> {
    match result {
        Ok(observation) => {
            set_condition(tenant, condition_type, observation.status, observation.message);
            Ok(())
        }
        Err(err) => {
            set_condition(tenant, condition_type, ConditionStatus::False, err.to_string());
            Err(err)
        }
    }
}

/// 把租户设置为对象的控制器属主
///
/// 对象已被另一个控制器对象持有时返回 [`Error::OwnerConflict`]。
pub(crate) fn set_controller_owner<K: Resource>(object: &mut K, tenant: &Tenant) -> Result<()> {
    let owner = tenant
        .controller_owner_ref(&())
        .ok_or_else(|| Error::Validation(format!("租户 {} 缺少 uid", tenant.name_any())))?;

    let references = object.meta_mut().owner_references.get_or_insert_with(Vec::new);
    if let Some(existing) = references
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(Error::OwnerConflict(format!(
            "已由 {} {} 持有",
            existing.kind, existing.name
        )));
    }
    match references.iter_mut().find(|r| r.uid == owner.uid) {
        Some(slot) => *slot = owner,
        None => references.push(owner),
    }
    Ok(())
}

/// 读取对象，不存在则由 `new` 构造，经 `mutate` 合并期望字段后创建或更新
///
/// 更新前后内容一致时不写入。`owner` 为 `None` 时不设置属主引用。
pub(crate) async fn upsert<S, K, N, M>(
    cx: &PassContext<'_, S>,
    owner: Option<&Tenant>,
    namespace: Option<&str>,
    name: &str,
    new: N,
    mutate: M,
) -> Result<K>
where
    S: ObjectStore,
    K: StoreObject,
    N: FnOnce() -> K,
    M: FnOnce(&mut K) -> Result<()>,
{
    let existing = cx.get::<K>(namespace, name).await?;
    let before = existing.as_ref().map(serde_json::to_value).transpose()?;

    let mut object = existing.unwrap_or_else(|| {
        let mut object = new();
        let meta = object.meta_mut();
        meta.name = Some(name.to_string());
        meta.namespace = namespace.map(str::to_string);
        object
    });
    mutate(&mut object)?;
    if let Some(tenant) = owner {
        set_controller_owner(&mut object, tenant)?;
    }

    match before {
        None => {
            debug!("创建 {} {:?}/{}", K::kind(&()), namespace, name);
            cx.create(&object).await
        }
        Some(before) if before == serde_json::to_value(&object)? => Ok(object),
        Some(_) => {
            debug!("更新 {} {:?}/{}", K::kind(&()), namespace, name);
            cx.update(&object).await
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 确保器测试共用的夹具

    use super::*;
    use crate::config::OperatorConfig;
    use crate::crd::TenantSpec;
    use crate::store::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    pub(crate) struct Fixture {
        pub store: MemoryStore,
        pub config: OperatorConfig,
        pub rng: Mutex<StdRng>,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                store: MemoryStore::new(),
                config: OperatorConfig {
                    domain: "example.com".to_string(),
                    tenant_specific_gateways: true,
                    ..Default::default()
                },
                rng: Mutex::new(StdRng::seed_from_u64(42)),
            }
        }

        pub fn cx(&self) -> PassContext<'_, MemoryStore> {
            PassContext::new(
                &self.store,
                &self.config,
                &self.rng,
                CancellationToken::new(),
                Instant::now() + Duration::from_secs(60),
            )
        }
    }

    /// 带 uid 的租户
    pub(crate) fn tenant(name: &str) -> Tenant {
        let mut tenant = Tenant::new(name, TenantSpec::default());
        tenant.metadata.uid = Some(format!("uid-{name}"));
        tenant
    }
}
