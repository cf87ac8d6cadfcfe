//! 统计租户的命名空间、机器人与机器人集群
//!
//! 只读聚合，唯一的写入是为归属于租户的命名空间补上租户标签。

use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::ResourceExt;
use robofleet_common::naming::{
    namespace_owner, robot_config_namespace, tenant_main_namespace, ROBOT_SERVICE_ACCOUNT,
    ROBOT_TOKEN_PREFIX,
};
use robofleet_common::Result;
use tracing::debug;

use super::TENANT_LABEL;
use crate::context::PassContext;
use crate::crd::{Robot, Tenant, TenantStatus};
use crate::store::ObjectStore;

/// 服务账号令牌密钥上标记所属服务账号的注解
const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

/// 收集归属于租户的命名空间
///
/// 名称互为前缀的租户之间，命名空间只归属于匹配最具体的那个租户。
pub async fn collect_namespaces<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &mut Tenant) -> Result<()> {
    let name = tenant.name_any();
    let mut known: Vec<String> = cx
        .list::<Tenant>(None)
        .await?
        .iter()
        .map(ResourceExt::name_any)
        .collect();
    if !known.contains(&name) {
        known.push(name.clone());
    }

    let mut tenant_namespaces = Vec::new();
    for mut namespace in cx.list::<Namespace>(None).await? {
        let namespace_name = namespace.name_any();
        if namespace_owner(&namespace_name, known.iter().map(String::as_str)) != Some(name.as_str()) {
            continue;
        }
        if namespace.labels().get(TENANT_LABEL) != Some(&name) {
            debug!("为命名空间 {} 添加租户标签 {}", namespace_name, name);
            namespace.labels_mut().insert(TENANT_LABEL.to_string(), name.clone());
            cx.update(&namespace).await?;
        }
        tenant_namespaces.push(namespace_name);
    }

    tenant_namespaces.sort();
    tenant
        .status
        .get_or_insert_with(TenantStatus::default)
        .tenant_namespaces = tenant_namespaces;
    Ok(())
}

/// 统计租户的机器人与已注册的机器人集群
pub async fn collect_robots<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &mut Tenant) -> Result<()> {
    let main = tenant_main_namespace(&tenant.name_any());
    let robots = cx.list::<Robot>(Some(&main)).await?.len();

    let robot_config = robot_config_namespace(&main);
    let robot_clusters = cx
        .list::<Secret>(Some(&robot_config))
        .await?
        .iter()
        .filter(|secret| is_robot_cluster_token(secret))
        .count();

    let status = tenant.status.get_or_insert_with(TenantStatus::default);
    status.robots = robots as i64;
    status.robot_clusters = robot_clusters as i64;
    Ok(())
}

/// 每个机器人集群在机器人配置命名空间中持有一个 robot-service 的令牌密钥
fn is_robot_cluster_token(secret: &Secret) -> bool {
    secret.name_any().starts_with(ROBOT_TOKEN_PREFIX)
        && secret
            .annotations()
            .get(SERVICE_ACCOUNT_NAME_ANNOTATION)
            .map(String::as_str)
            == Some(ROBOT_SERVICE_ACCOUNT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::RobotSpec;
    use crate::ensure::testing::{tenant, Fixture};

    fn namespace(name: &str) -> Namespace {
        let mut namespace = Namespace::default();
        namespace.metadata.name = Some(name.to_string());
        namespace
    }

    fn token(name: &str, service_account: &str) -> Secret {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.to_string());
        secret.metadata.namespace = Some("t-abc-robot-config".to_string());
        secret
            .annotations_mut()
            .insert(SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(), service_account.to_string());
        secret
    }

    #[tokio::test]
    async fn test_collect_namespaces_respects_segment_boundary() {
        let fixture = Fixture::new();
        for name in ["t-abc", "t-abc-robot-config", "t-abc-app-1", "t-abc-xyz", "t-abc-xyz-app-1", "kube-system"] {
            fixture.store.create(&namespace(name)).await.unwrap();
        }
        let mut abc = tenant("abc");

        collect_namespaces(&fixture.cx(), &mut abc).await.unwrap();

        assert_eq!(
            abc.status.as_ref().unwrap().tenant_namespaces,
            vec!["t-abc", "t-abc-app-1", "t-abc-robot-config"]
        );
        let app: Namespace = fixture.store.get(None, "t-abc-app-1").await.unwrap().unwrap();
        assert_eq!(app.labels().get(TENANT_LABEL).map(String::as_str), Some("abc"));
        let other: Namespace = fixture.store.get(None, "t-abc-xyz-app-1").await.unwrap().unwrap();
        assert!(other.labels().get(TENANT_LABEL).is_none());
    }

    #[tokio::test]
    async fn test_collect_namespaces_skips_tenant_with_longer_name() {
        let fixture = Fixture::new();
        for name in ["t-abc", "t-abc-app-1", "t-abc-app", "t-abc-app-robot-config", "t-abc-app-app-x"] {
            fixture.store.create(&namespace(name)).await.unwrap();
        }
        fixture.store.create(&tenant("abc-app")).await.unwrap();
        let mut abc = tenant("abc");
        let mut abc_app = tenant("abc-app");

        // 连续两轮，标签不会在两个租户之间来回切换
        for _ in 0..2 {
            collect_namespaces(&fixture.cx(), &mut abc).await.unwrap();
            collect_namespaces(&fixture.cx(), &mut abc_app).await.unwrap();
        }

        assert_eq!(abc.status.as_ref().unwrap().tenant_namespaces, vec!["t-abc", "t-abc-app-1"]);
        assert_eq!(
            abc_app.status.as_ref().unwrap().tenant_namespaces,
            vec!["t-abc-app", "t-abc-app-app-x", "t-abc-app-robot-config"]
        );
        let robot_config: Namespace = fixture
            .store
            .get(None, "t-abc-app-robot-config")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(robot_config.labels().get(TENANT_LABEL).map(String::as_str), Some("abc-app"));
        let version = robot_config.metadata.resource_version.clone();

        collect_namespaces(&fixture.cx(), &mut abc).await.unwrap();
        let unchanged: Namespace = fixture
            .store
            .get(None, "t-abc-app-robot-config")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.metadata.resource_version, version);
    }

    #[tokio::test]
    async fn test_collect_robots_counts_tokens() {
        let fixture = Fixture::new();
        for name in ["r1", "r2"] {
            let mut robot = Robot::new(name, RobotSpec::default());
            robot.metadata.namespace = Some("t-abc".to_string());
            fixture.store.create(&robot).await.unwrap();
        }
        fixture.store.create(&token("robot-token-a1", "robot-service")).await.unwrap();
        fixture.store.create(&token("robot-token-b2", "robot-service")).await.unwrap();
        fixture.store.create(&token("robot-token-c3", "someone-else")).await.unwrap();
        fixture.store.create(&token("other-token", "robot-service")).await.unwrap();
        let mut abc = tenant("abc");

        collect_robots(&fixture.cx(), &mut abc).await.unwrap();

        let status = abc.status.as_ref().unwrap();
        assert_eq!(status.robots, 2);
        assert_eq!(status.robot_clusters, 2);
    }
}
