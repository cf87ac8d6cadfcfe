//! 租户命名空间

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use robofleet_common::naming::{robot_config_namespace, tenant_main_namespace, DEFAULT_TENANT_NAME};
use robofleet_common::{Error, Result};
use tracing::debug;

use super::{record, upsert, Observation, TENANT_LABEL};
use crate::context::PassContext;
use crate::crd::{Tenant, TenantConditionType};
use crate::store::ObjectStore;

/// 确保租户的主命名空间与机器人配置命名空间存在
///
/// 默认租户使用集群基础命名空间，不创建任何对象。同名命名空间正在删除时返回
/// [`Error::NamespaceInDeletion`]，由协调器安排快速复查。
pub async fn ensure_namespaces<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &mut Tenant) -> Result<()> {
    let result = ensure(cx, tenant).await;
    record(tenant, TenantConditionType::Namespace, result)
}

async fn ensure<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &Tenant) -> Result<Observation> {
    let name = tenant.name_any();
    if name == DEFAULT_TENANT_NAME {
        return Ok(Observation::ready("默认租户使用 default 命名空间"));
    }

    let main = tenant_main_namespace(&name);
    let robot_config = robot_config_namespace(&main);
    for namespace in [&main, &robot_config] {
        upsert::<_, Namespace, _, _>(cx, Some(tenant), None, namespace, Namespace::default, |ns| {
            if ns.metadata.deletion_timestamp.is_some() {
                return Err(Error::NamespaceInDeletion(namespace.clone()));
            }
            ns.labels_mut().insert(TENANT_LABEL.to_string(), name.clone());
            Ok(())
        })
        .await?;
    }
    debug!("租户 {} 的命名空间 {} 与 {} 已就绪", name, main, robot_config);

    Ok(Observation::ready("租户命名空间已创建"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{find_condition, in_condition};
    use crate::ensure::testing::{tenant, Fixture};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    #[tokio::test]
    async fn test_creates_both_namespaces_with_owner() {
        let fixture = Fixture::new();
        let mut abc = tenant("abc");

        ensure_namespaces(&fixture.cx(), &mut abc).await.unwrap();

        assert!(in_condition(&abc, TenantConditionType::Namespace));
        for name in ["t-abc", "t-abc-robot-config"] {
            let ns: Namespace = fixture.store.get(None, name).await.unwrap().unwrap();
            assert_eq!(ns.labels().get(TENANT_LABEL).map(String::as_str), Some("abc"));
            assert_eq!(ns.owner_references()[0].uid, "uid-abc");
        }
    }

    #[tokio::test]
    async fn test_default_tenant_creates_nothing() {
        let fixture = Fixture::new();
        let mut default = tenant(DEFAULT_TENANT_NAME);

        ensure_namespaces(&fixture.cx(), &mut default).await.unwrap();

        assert!(in_condition(&default, TenantConditionType::Namespace));
        assert!(fixture.store.is_empty());
    }

    #[tokio::test]
    async fn test_namespace_in_deletion_is_recoverable() {
        let fixture = Fixture::new();
        let mut terminating = Namespace::default();
        terminating.metadata.name = Some("t-abc".to_string());
        terminating.metadata.finalizers = Some(vec!["kubernetes".to_string()]);
        terminating.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        fixture.store.seed(&terminating).unwrap();

        let mut abc = tenant("abc");
        let err = ensure_namespaces(&fixture.cx(), &mut abc).await.unwrap_err();

        assert!(matches!(err, Error::NamespaceInDeletion(_)));
        assert!(err.is_recoverable());
        let condition = find_condition(&abc, TenantConditionType::Namespace).unwrap();
        assert!(condition.message.contains("t-abc"));
    }
}
