//! 机器人服务账号

use k8s_openapi::api::core::v1::ServiceAccount;
use kube::ResourceExt;
use robofleet_common::naming::{
    robot_config_namespace, tenant_main_namespace, ROBOT_SERVICE_ACCOUNT, ROBOT_SETUP_SERVICE_ACCOUNT,
};
use robofleet_common::Result;

use super::{record, upsert, Observation};
use crate::context::PassContext;
use crate::crd::{Tenant, TenantConditionType};
use crate::store::ObjectStore;

/// 确保机器人配置命名空间中的 robot-service 与 robot-service-setup 服务账号存在
pub async fn ensure_service_accounts<S: ObjectStore>(
    cx: &PassContext<'_, S>,
    tenant: &mut Tenant,
) -> Result<()> {
    let result = ensure(cx, tenant).await;
    record(tenant, TenantConditionType::ServiceAccount, result)
}

async fn ensure<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &Tenant) -> Result<Observation> {
    let namespace = robot_config_namespace(&tenant_main_namespace(&tenant.name_any()));
    for name in [ROBOT_SERVICE_ACCOUNT, ROBOT_SETUP_SERVICE_ACCOUNT] {
        upsert::<_, ServiceAccount, _, _>(cx, Some(tenant), Some(&namespace), name, ServiceAccount::default, |_| {
            Ok(())
        })
        .await?;
    }
    Ok(Observation::ready("租户服务账号已创建"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::in_condition;
    use crate::ensure::testing::{tenant, Fixture};
    use crate::store::Verb;

    #[tokio::test]
    async fn test_creates_service_accounts_in_robot_config() {
        let fixture = Fixture::new();
        let mut abc = tenant("abc");

        ensure_service_accounts(&fixture.cx(), &mut abc).await.unwrap();

        assert!(in_condition(&abc, TenantConditionType::ServiceAccount));
        let accounts: Vec<ServiceAccount> = fixture.store.list(Some("t-abc-robot-config")).await.unwrap();
        let mut names: Vec<_> = accounts.iter().map(|sa| sa.name_any()).collect();
        names.sort();
        assert_eq!(names, vec!["robot-service", "robot-service-setup"]);
    }

    #[tokio::test]
    async fn test_write_failure_sets_false_condition() {
        let fixture = Fixture::new();
        fixture.store.inject_fault("ServiceAccount", Verb::Create, "拒绝访问");
        let mut abc = tenant("abc");

        assert!(ensure_service_accounts(&fixture.cx(), &mut abc).await.is_err());
        assert!(!in_condition(&abc, TenantConditionType::ServiceAccount));
    }
}
