//! 服务账号的 RBAC 绑定
//!
//! 三个 RoleBinding 都引用集群级 ClusterRole，主体是机器人配置命名空间中的服务账号。

use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::ResourceExt;
use robofleet_common::naming::{
    robot_config_namespace, tenant_main_namespace, ROBOT_SERVICE_ACCOUNT, ROBOT_SETUP_SERVICE_ACCOUNT,
};
use robofleet_common::Result;

use super::{record, upsert, Observation};
use crate::context::PassContext;
use crate::crd::{Tenant, TenantConditionType};
use crate::store::ObjectStore;

const CR_SYNCER_ROLE_BINDING: &str = "robofleet:cr-syncer:robot-service";
const ROBOT_SETUP_ROLE_BINDING: &str = "robofleet:robot-setup-service";

/// 期望的 RoleBinding
#[derive(Debug, Clone, PartialEq, Eq)]
struct DesiredBinding {
    namespace: String,
    name: &'static str,
    cluster_role: &'static str,
    service_account: &'static str,
}

fn desired_bindings(tenant_name: &str) -> Vec<DesiredBinding> {
    let main = tenant_main_namespace(tenant_name);
    let robot_config = robot_config_namespace(&main);
    vec![
        DesiredBinding {
            namespace: main.clone(),
            name: CR_SYNCER_ROLE_BINDING,
            cluster_role: "robofleet:cr-syncer",
            service_account: ROBOT_SERVICE_ACCOUNT,
        },
        DesiredBinding {
            namespace: robot_config,
            name: ROBOT_SETUP_ROLE_BINDING,
            cluster_role: "robofleet:robot-setup:robot-config",
            service_account: ROBOT_SETUP_SERVICE_ACCOUNT,
        },
        DesiredBinding {
            namespace: main,
            name: ROBOT_SETUP_ROLE_BINDING,
            cluster_role: "robofleet:robot-setup:robots",
            service_account: ROBOT_SETUP_SERVICE_ACCOUNT,
        },
    ]
}

/// 确保服务账号的 RoleBinding
pub async fn ensure_permissions<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &mut Tenant) -> Result<()> {
    let result = ensure(cx, tenant).await;
    record(tenant, TenantConditionType::Permissions, result)
}

async fn ensure<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &Tenant) -> Result<Observation> {
    let tenant_name = tenant.name_any();
    let subject_namespace = robot_config_namespace(&tenant_main_namespace(&tenant_name));

    for binding in desired_bindings(&tenant_name) {
        upsert::<_, RoleBinding, _, _>(
            cx,
            Some(tenant),
            Some(&binding.namespace),
            binding.name,
            RoleBinding::default,
            |rb| {
                rb.role_ref = RoleRef {
                    api_group: "rbac.authorization.k8s.io".to_string(),
                    kind: "ClusterRole".to_string(),
                    name: binding.cluster_role.to_string(),
                };
                rb.subjects = Some(vec![Subject {
                    kind: "ServiceAccount".to_string(),
                    name: binding.service_account.to_string(),
                    namespace: Some(subject_namespace.clone()),
                    ..Default::default()
                }]);
                Ok(())
            },
        )
        .await?;
    }

    Ok(Observation::ready("租户权限已设置"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::in_condition;
    use crate::ensure::testing::{tenant, Fixture};

    #[tokio::test]
    async fn test_role_bindings() {
        let fixture = Fixture::new();
        let mut abc = tenant("abc");

        ensure_permissions(&fixture.cx(), &mut abc).await.unwrap();
        // 第二次执行不会失败
        ensure_permissions(&fixture.cx(), &mut abc).await.unwrap();

        assert!(in_condition(&abc, TenantConditionType::Permissions));
        let robots: RoleBinding = fixture
            .store
            .get(Some("t-abc"), ROBOT_SETUP_ROLE_BINDING)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(robots.role_ref.name, "robofleet:robot-setup:robots");
        let subject = &robots.subjects.as_ref().unwrap()[0];
        assert_eq!(subject.name, "robot-service-setup");
        assert_eq!(subject.namespace.as_deref(), Some("t-abc-robot-config"));

        let all: Vec<RoleBinding> = fixture.store.list(None).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_default_tenant_bindings() {
        let bindings = desired_bindings("default");
        assert_eq!(bindings[0].namespace, "default");
        assert_eq!(bindings[1].namespace, "robot-config");
    }
}
