//! 事件路由模块
//!
//! 把被监听对象的变化映射回需要重新协调的租户。路由是纯函数：输入对象视图与当前租户名列表，
//! 输出零个或多个租户名，由控制器的去重队列负责入队。

use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use robofleet_common::naming::{
    namespace_owner, robot_config_namespace, tenant_for_object_namespace, tenant_main_namespace,
    ROBOT_CONFIG_NAMESPACE, ROBOT_SETUP_CONFIGMAP, ROBOT_TOKEN_PREFIX,
};

use crate::crd::{Robot, Tenant};

/// 路由所需的对象视图
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedObject {
    /// 由租户创建的依赖对象，按属主引用路由
    Owned {
        /// 属主引用
        owners: Vec<OwnerReference>,
    },
    /// 命名空间，按名称归属路由
    Namespace {
        /// 命名空间名称
        name: String,
    },
    /// ConfigMap，机器人安装模板广播给所有租户，其余按属主引用路由
    ConfigMap {
        /// 所在命名空间
        namespace: String,
        /// 名称
        name: String,
        /// 属主引用
        owners: Vec<OwnerReference>,
    },
    /// 密钥，机器人集群令牌按机器人配置命名空间路由，其余按属主引用路由
    Secret {
        /// 所在命名空间
        namespace: String,
        /// 名称
        name: String,
        /// 属主引用
        owners: Vec<OwnerReference>,
    },
    /// 机器人，按所在命名空间路由
    Robot {
        /// 所在命名空间
        namespace: String,
    },
}

impl RoutedObject {
    /// 任意带属主引用的依赖对象
    pub fn owned<K: Resource>(object: &K) -> Self {
        RoutedObject::Owned {
            owners: object.owner_references().to_vec(),
        }
    }

    /// 命名空间
    pub fn namespace(namespace: &Namespace) -> Self {
        RoutedObject::Namespace {
            name: namespace.name_any(),
        }
    }

    /// ConfigMap
    pub fn config_map(config_map: &ConfigMap) -> Self {
        RoutedObject::ConfigMap {
            namespace: config_map.namespace().unwrap_or_default(),
            name: config_map.name_any(),
            owners: config_map.owner_references().to_vec(),
        }
    }

    /// 密钥
    pub fn secret(secret: &Secret) -> Self {
        RoutedObject::Secret {
            namespace: secret.namespace().unwrap_or_default(),
            name: secret.name_any(),
            owners: secret.owner_references().to_vec(),
        }
    }

    /// 机器人
    pub fn robot(robot: &Robot) -> Self {
        RoutedObject::Robot {
            namespace: robot.namespace().unwrap_or_default(),
        }
    }
}

/// 计算需要重新协调的租户
///
/// `tenants` 为当前已知的全部租户名，只用于命名空间路由与广播。
pub fn route(object: &RoutedObject, tenants: &[String]) -> Vec<String> {
    let mut routed = match object {
        RoutedObject::Owned { owners } => tenant_owners(owners),
        RoutedObject::Namespace { name } => namespace_owner(name, tenants.iter().map(String::as_str))
            .map(str::to_string)
            .into_iter()
            .collect(),
        RoutedObject::ConfigMap {
            namespace,
            name,
            owners,
        } => {
            if namespace == ROBOT_CONFIG_NAMESPACE && name == ROBOT_SETUP_CONFIGMAP {
                tenants.to_vec()
            } else {
                tenant_owners(owners)
            }
        }
        RoutedObject::Secret {
            namespace,
            name,
            owners,
        } => {
            if name.starts_with(ROBOT_TOKEN_PREFIX) {
                tenants
                    .iter()
                    .filter(|tenant| robot_config_namespace(&tenant_main_namespace(tenant)) == *namespace)
                    .cloned()
                    .collect()
            } else {
                tenant_owners(owners)
            }
        }
        RoutedObject::Robot { namespace } => tenant_for_object_namespace(namespace).into_iter().collect(),
    };
    routed.sort();
    routed.dedup();
    routed
}

/// 属主引用中指向租户的名称
fn tenant_owners(owners: &[OwnerReference]) -> Vec<String> {
    let api_version = Tenant::api_version(&());
    let kind = Tenant::kind(&());
    owners
        .iter()
        .filter(|owner| owner.api_version == api_version && owner.kind == kind)
        .map(|owner| owner.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tenants(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn tenant_owner(name: &str) -> OwnerReference {
        OwnerReference {
            api_version: "config.robofleet.io/v1alpha1".to_string(),
            kind: "Tenant".to_string(),
            name: name.to_string(),
            uid: format!("uid-{name}"),
            controller: Some(true),
            ..Default::default()
        }
    }

    #[rstest]
    #[case("t-abc-xyz-app-1", &["abc-xyz"])]
    #[case("t-abc-app-1", &["abc"])]
    #[case("t-abc", &["abc"])]
    #[case("t-abc-xyz-robot-config", &["abc-xyz"])]
    #[case("kube-system", &[])]
    fn test_namespace_routing_is_segment_safe(#[case] namespace: &str, #[case] expected: &[&str]) {
        let known = tenants(&["abc", "abc-xyz"]);
        let routed = route(
            &RoutedObject::Namespace {
                name: namespace.to_string(),
            },
            &known,
        );
        assert_eq!(routed, tenants(expected));
    }

    #[rstest]
    #[case("t-abc-app", &["abc-app"])]
    #[case("t-abc-app-robot-config", &["abc-app"])]
    #[case("t-abc-app-app-x", &["abc-app"])]
    #[case("t-abc-app-x", &["abc"])]
    fn test_namespace_routing_prefers_longest_tenant(#[case] namespace: &str, #[case] expected: &[&str]) {
        let known = tenants(&["abc", "abc-app"]);
        let routed = route(
            &RoutedObject::Namespace {
                name: namespace.to_string(),
            },
            &known,
        );
        assert_eq!(routed, tenants(expected));
    }

    #[test]
    fn test_owner_reference_routing() {
        let mut foreign = tenant_owner("abc");
        foreign.kind = "Deployment".to_string();
        let object = RoutedObject::Owned {
            owners: vec![tenant_owner("xyz"), foreign],
        };
        assert_eq!(route(&object, &[]), tenants(&["xyz"]));
    }

    #[test]
    fn test_robot_setup_template_is_broadcast() {
        let known = tenants(&["abc", "default", "xyz"]);
        let template = RoutedObject::ConfigMap {
            namespace: ROBOT_CONFIG_NAMESPACE.to_string(),
            name: ROBOT_SETUP_CONFIGMAP.to_string(),
            owners: vec![],
        };
        assert_eq!(route(&template, &known), known);

        // 租户自己的快照只路由到属主
        let snapshot = RoutedObject::ConfigMap {
            namespace: "t-abc-robot-config".to_string(),
            name: ROBOT_SETUP_CONFIGMAP.to_string(),
            owners: vec![tenant_owner("abc")],
        };
        assert_eq!(route(&snapshot, &known), tenants(&["abc"]));
    }

    #[rstest]
    #[case("t-abc-robot-config", &["abc"])]
    #[case("t-abc-xyz-robot-config", &["abc-xyz"])]
    #[case("robot-config", &["default"])]
    #[case("t-abc", &[])]
    fn test_robot_token_routing(#[case] namespace: &str, #[case] expected: &[&str]) {
        let token = RoutedObject::Secret {
            namespace: namespace.to_string(),
            name: format!("{ROBOT_TOKEN_PREFIX}abcde"),
            owners: vec![],
        };
        assert_eq!(route(&token, &tenants(&["abc", "abc-xyz", "default"])), tenants(expected));
    }

    #[rstest]
    #[case("t-abc", &["abc"])]
    #[case("default", &["default"])]
    #[case("kube-system", &[])]
    fn test_robot_routing(#[case] namespace: &str, #[case] expected: &[&str]) {
        let object = RoutedObject::Robot {
            namespace: namespace.to_string(),
        };
        assert_eq!(route(&object, &[]), tenants(expected));
    }
}
