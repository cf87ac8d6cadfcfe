//! 自定义资源定义模块
//!
//! 该模块定义了 RoboFleet 的 Tenant 自定义资源，以及租户控制器需要读写的
//! 协作方资源（机器人、应用发布、DNS 记录、证书、Istio 网关）的最小类型视图。

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 租户规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "config.robofleet.io", version = "v1alpha1", kind = "Tenant")]
#[kube(status = "TenantStatus")]
#[kube(printcolumn = r#"{"name":"机器人", "type":"integer", "jsonPath":".status.robots"}"#)]
#[kube(printcolumn = r#"{"name":"机器人集群", "type":"integer", "jsonPath":".status.robotClusters"}"#)]
#[kube(printcolumn = r#"{"name":"域名", "type":"string", "jsonPath":".status.tenantDomain"}"#)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// 自定义租户域名，为空时使用集群域名派生的默认域名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_domain: Option<String>,
}

/// 租户状态，只由控制器写入
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    /// 租户下的机器人数量
    #[serde(default)]
    pub robots: i64,

    /// 已注册的机器人集群数量
    #[serde(default)]
    pub robot_clusters: i64,

    /// 当前使用的入口网关（namespace/name）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// 解析后的租户域名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_domain: Option<String>,

    /// 归属于该租户的命名空间
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tenant_namespaces: Vec<String>,

    /// 各方面的健康条件，按插入顺序排列
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<TenantCondition>,
}

/// 条件类型
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub enum TenantConditionType {
    /// 租户命名空间
    Namespace,
    /// DNS 记录
    Domain,
    /// TLS 证书
    Certificate,
    /// 入口网关
    Gateway,
    /// 服务账号
    ServiceAccount,
    /// RBAC 绑定
    Permissions,
    /// 镜像拉取密钥
    PullSecret,
    /// 机器人安装配置快照
    #[serde(rename = "RobotSetupConfig")]
    RobotSetup,
}

impl TenantConditionType {
    /// 全部条件类型
    pub const ALL: [TenantConditionType; 8] = [
        TenantConditionType::Namespace,
        TenantConditionType::Domain,
        TenantConditionType::Certificate,
        TenantConditionType::Gateway,
        TenantConditionType::ServiceAccount,
        TenantConditionType::Permissions,
        TenantConditionType::PullSecret,
        TenantConditionType::RobotSetup,
    ];

    /// 条件类型在 API 中的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantConditionType::Namespace => "Namespace",
            TenantConditionType::Domain => "Domain",
            TenantConditionType::Certificate => "Certificate",
            TenantConditionType::Gateway => "Gateway",
            TenantConditionType::ServiceAccount => "ServiceAccount",
            TenantConditionType::Permissions => "Permissions",
            TenantConditionType::PullSecret => "PullSecret",
            TenantConditionType::RobotSetup => "RobotSetupConfig",
        }
    }
}

impl fmt::Display for TenantConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 条件状态
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    /// 正常
    True,
    /// 异常或尚未就绪
    False,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// 租户条件
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantCondition {
    /// 条件类型，每个租户每种类型至多一个条件
    #[serde(rename = "type")]
    pub type_: TenantConditionType,

    /// 条件状态
    pub status: ConditionStatus,

    /// 人类可读的说明
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// 状态或说明最近一次变化的时间
    pub last_update_time: DateTime<Utc>,

    /// 状态最近一次翻转的时间
    pub last_transition_time: DateTime<Utc>,
}

/// 机器人注册记录（只用于统计数量）
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "registry.robofleet.io", version = "v1alpha1", kind = "Robot", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct RobotSpec {
    /// 机器人类型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

/// 应用发布，删除租户前必须清理
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "apps.robofleet.io", version = "v1alpha1", kind = "AppRollout", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct AppRolloutSpec {
    /// 发布的应用名称
    #[serde(default)]
    pub app_name: String,
}

/// 图表分配，由应用发布级联删除
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "apps.robofleet.io", version = "v1alpha1", kind = "ChartAssignment", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct ChartAssignmentSpec {
    /// 目标集群
    #[serde(default)]
    pub cluster_name: String,
    /// 目标命名空间
    #[serde(default)]
    pub namespace_name: String,
}

/// 外部控制器回写的就绪状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningStatus {
    /// 状态，例如 Pending、Ready、Error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// 附加说明
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProvisioningStatus {
    /// 外部控制器报告的就绪状态值
    pub const READY: &'static str = "Ready";

    /// 是否已就绪
    pub fn is_ready(status: Option<&ProvisioningStatus>) -> bool {
        status.and_then(|s| s.state.as_deref()) == Some(Self::READY)
    }

    /// 观察到的中间状态，用于条件说明
    pub fn observed(status: Option<&ProvisioningStatus>) -> String {
        status.and_then(|s| s.state.clone()).unwrap_or_default()
    }
}

/// DNS 记录
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "dns.gardener.cloud", version = "v1alpha1", kind = "DNSEntry", namespaced)]
#[kube(struct = "DnsEntry", plural = "dnsentries")]
#[kube(status = "ProvisioningStatus")]
#[serde(rename_all = "camelCase")]
pub struct DnsEntrySpec {
    /// 记录名称，例如 `*.abc.t.example.com`
    pub dns_name: String,
    /// 生存时间（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    /// 解析目标（IP 或主机名）
    #[serde(default)]
    pub targets: Vec<String>,
}

/// TLS 证书
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "cert.gardener.cloud", version = "v1alpha1", kind = "Certificate", namespaced)]
#[kube(status = "ProvisioningStatus")]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// 证书通用名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    /// 存放证书的密钥名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

/// Istio 入口网关
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "networking.istio.io", version = "v1beta1", kind = "Gateway", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// 选择入口网关 Pod 的标签
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// 监听的服务器列表
    #[serde(default)]
    pub servers: Vec<GatewayServer>,
}

/// 网关服务器
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayServer {
    /// 主机名列表
    pub hosts: Vec<String>,
    /// 端口
    pub port: GatewayPort,
    /// TLS 设置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ServerTlsSettings>,
}

/// 网关端口
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPort {
    /// 端口名称
    pub name: String,
    /// 端口号
    pub number: u32,
    /// 协议
    pub protocol: String,
}

/// 服务器 TLS 设置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerTlsSettings {
    /// TLS 模式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// 证书凭据名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_name: Option<String>,
    /// 最低 TLS 版本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_protocol_version: Option<String>,
    /// 允许的加密套件
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cipher_suites: Vec<String>,
    /// 是否把 HTTP 重定向到 HTTPS
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub https_redirect: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, Resource};

    #[test]
    fn test_tenant_crd_is_cluster_scoped_with_status() {
        let crd = Tenant::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("tenants.config.robofleet.io"));
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.names.kind, "Tenant");
        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1alpha1");
        assert!(version
            .subresources
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .is_some());
    }

    #[test]
    fn test_condition_type_wire_names() {
        let json = serde_json::to_value(TenantConditionType::RobotSetup).unwrap();
        assert_eq!(json, serde_json::json!("RobotSetupConfig"));
        for condition in TenantConditionType::ALL {
            let json = serde_json::to_value(condition).unwrap();
            assert_eq!(json, serde_json::json!(condition.as_str()));
        }
    }

    #[test]
    fn test_tenant_status_serialization() {
        let status = TenantStatus {
            robots: 2,
            robot_clusters: 1,
            tenant_domain: Some("abc.t.example.com".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["robotClusters"], 1);
        assert_eq!(json["tenantDomain"], "abc.t.example.com");
        assert!(json.get("conditions").is_none());
    }

    #[test]
    fn test_provisioning_status_ready() {
        let ready = ProvisioningStatus {
            state: Some("Ready".to_string()),
            message: None,
        };
        let pending = ProvisioningStatus {
            state: Some("Pending".to_string()),
            message: None,
        };
        assert!(ProvisioningStatus::is_ready(Some(&ready)));
        assert!(!ProvisioningStatus::is_ready(Some(&pending)));
        assert!(!ProvisioningStatus::is_ready(None));
        assert_eq!(ProvisioningStatus::observed(Some(&pending)), "Pending");
    }

    #[test]
    fn test_dns_entry_matches_gardener_resource() {
        assert_eq!(DnsEntry::kind(&()), "DNSEntry");
        assert_eq!(DnsEntry::plural(&()), "dnsentries");
        assert_eq!(DnsEntry::api_version(&()), "dns.gardener.cloud/v1alpha1");

        let entry = DnsEntry::new("t-abc", DnsEntrySpec::default());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "DNSEntry");
    }
}
