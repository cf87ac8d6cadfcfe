//! 租户域名与 DNS 记录
//!
//! DNS 记录指向 Istio 入口负载均衡器，记录名为 `*.<租户域名>`。证书通用名最长 64 个字符，
//! 扣除通配符前缀后租户域名最长 62 个字符；超长时改用随机生成的域名。

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use robofleet_common::naming::tenant_main_namespace;
use robofleet_common::{Error, Result};
use tracing::{info, warn};

use super::{record, upsert, Observation};
use crate::context::PassContext;
use crate::crd::{DnsEntry, DnsEntrySpec, ProvisioningStatus, Tenant, TenantConditionType, TenantStatus};
use crate::store::ObjectStore;

/// Istio 入口网关所在命名空间
pub const ISTIO_NAMESPACE: &str = "istio-system";
/// Istio 入口负载均衡器服务
pub const ISTIO_LOAD_BALANCER_SERVICE: &str = "istio-ingressgateway";
/// 租户 DNS 记录名称
pub const DNS_ENTRY_NAME: &str = "tenant-domain";

const DNS_CLASS_ANNOTATION: &str = "dns.gardener.cloud/class";
const DNS_CLASS: &str = "garden";
const DNS_TTL_SECONDS: i64 = 600;
/// 租户域名最大长度，为通配符 `*.` 预留两个字符
const MAX_TENANT_DOMAIN_LENGTH: usize = 62;

/// 确保租户的 DNS 记录，并把解析后的域名写入状态
///
/// 记录写入成功但外部控制器尚未报告就绪时，条件为 False 且不视为失败。
pub async fn ensure_dns<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &mut Tenant) -> Result<()> {
    let result = ensure(cx, tenant).await;
    record(tenant, TenantConditionType::Domain, result)
}

async fn ensure<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &mut Tenant) -> Result<Observation> {
    let main = tenant_main_namespace(&tenant.name_any());
    let target = load_balancer_target(cx).await?;
    let domain = resolve_tenant_domain(&cx.config().domain, tenant, |length| cx.random_label(length))?;

    let entry: DnsEntry = upsert(
        cx,
        Some(&*tenant),
        Some(&main),
        DNS_ENTRY_NAME,
        || DnsEntry::new(DNS_ENTRY_NAME, DnsEntrySpec::default()),
        |entry| {
            entry.spec.dns_name = format!("*.{domain}");
            entry.spec.ttl = Some(DNS_TTL_SECONDS);
            entry.spec.targets = vec![target.clone()];
            entry
                .annotations_mut()
                .insert(DNS_CLASS_ANNOTATION.to_string(), DNS_CLASS.to_string());
            Ok(())
        },
    )
    .await?;

    tenant
        .status
        .get_or_insert_with(TenantStatus::default)
        .tenant_domain = Some(domain.clone());

    if ProvisioningStatus::is_ready(entry.status.as_ref()) {
        Ok(Observation::ready(format!("域名 *.{domain} 的 DNS 记录已创建")))
    } else {
        Ok(Observation::pending(format!(
            "域名 *.{domain} 的 DNS 记录已创建，当前状态为 {:?}",
            ProvisioningStatus::observed(entry.status.as_ref())
        )))
    }
}

/// 读取 Istio 入口负载均衡器的第一个 IP 或主机名
async fn load_balancer_target<S: ObjectStore>(cx: &PassContext<'_, S>) -> Result<String> {
    let service: Service = cx
        .get(Some(ISTIO_NAMESPACE), ISTIO_LOAD_BALANCER_SERVICE)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!("Service {}/{}", ISTIO_NAMESPACE, ISTIO_LOAD_BALANCER_SERVICE))
        })?;

    service
        .status
        .and_then(|s| s.load_balancer)
        .and_then(|lb| lb.ingress)
        .unwrap_or_default()
        .into_iter()
        .find_map(|ingress| {
            ingress
                .ip
                .filter(|ip| !ip.is_empty())
                .or_else(|| ingress.hostname.filter(|h| !h.is_empty()))
        })
        .ok_or_else(|| Error::NotReady("Istio 负载均衡器服务中没有 IP 或主机名".to_string()))
}

/// 计算租户域名
///
/// 默认取声明中的域名，否则为 `<租户>.t.<集群域名>`。超过长度上限时沿用状态中已记录的随机域名，
/// 没有则生成新的随机域名。后缀本身过长时无法生成，返回校验错误。
pub(crate) fn resolve_tenant_domain(
    cluster_domain: &str,
    tenant: &Tenant,
    random_label: impl FnOnce(usize) -> String,
) -> Result<String> {
    let name = tenant.name_any();
    let domain = match tenant.spec.tenant_domain.as_deref().filter(|d| !d.is_empty()) {
        Some(domain) => domain.to_string(),
        None => format!("{name}.t.{cluster_domain}"),
    };
    if domain.len() <= MAX_TENANT_DOMAIN_LENGTH {
        return Ok(domain);
    }

    let suffix = format!(".t.{cluster_domain}");
    let previous = tenant
        .status
        .as_ref()
        .and_then(|s| s.tenant_domain.as_deref())
        .filter(|d| d.contains(&suffix));
    if let Some(previous) = previous {
        return Ok(previous.to_string());
    }

    warn!(
        "租户 {} 的默认域名 *.{} 超过证书通用名长度上限，改用随机域名",
        name, domain
    );
    if suffix.len() > MAX_TENANT_DOMAIN_LENGTH - 1 {
        return Err(Error::Validation(format!(
            "无法生成租户域名，后缀 {suffix:?} 超过 61 个字符"
        )));
    }
    let generated = format!("{}{}", random_label(MAX_TENANT_DOMAIN_LENGTH - suffix.len()), suffix);
    info!("租户 {} 使用随机域名 {}", name, generated);
    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{find_condition, in_condition};
    use crate::crd::TenantSpec;
    use crate::ensure::testing::{tenant, Fixture};
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};
    use rstest::rstest;

    fn load_balancer(ingress: LoadBalancerIngress) -> Service {
        let mut service = Service::default();
        service.metadata.name = Some(ISTIO_LOAD_BALANCER_SERVICE.to_string());
        service.metadata.namespace = Some(ISTIO_NAMESPACE.to_string());
        service.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![ingress]),
            }),
            ..Default::default()
        });
        service
    }

    fn long_name() -> String {
        "a".repeat(60)
    }

    #[rstest]
    #[case::derived("abc", None, "abc.t.example.com")]
    #[case::override_domain("abc", Some("robots.example.org"), "robots.example.org")]
    #[case::empty_override("abc", Some(""), "abc.t.example.com")]
    fn test_resolve_short_domains(#[case] name: &str, #[case] spec_domain: Option<&str>, #[case] expected: &str) {
        let mut t = Tenant::new(name, TenantSpec::default());
        t.spec.tenant_domain = spec_domain.map(str::to_string);
        let domain = resolve_tenant_domain("example.com", &t, |_| unreachable!()).unwrap();
        assert_eq!(domain, expected);
    }

    #[test]
    fn test_long_domain_is_randomized() {
        let t = Tenant::new(&long_name(), TenantSpec::default());
        let domain = resolve_tenant_domain("example.com", &t, |length| "x".repeat(length)).unwrap();
        assert_eq!(domain.len(), 62);
        assert!(domain.ends_with(".t.example.com"));
    }

    #[test]
    fn test_long_domain_reuses_recorded_domain() {
        let mut t = Tenant::new(&long_name(), TenantSpec::default());
        t.status = Some(TenantStatus {
            tenant_domain: Some("qwerty.t.example.com".to_string()),
            ..Default::default()
        });
        let domain = resolve_tenant_domain("example.com", &t, |_| unreachable!()).unwrap();
        assert_eq!(domain, "qwerty.t.example.com");
    }

    #[test]
    fn test_overlong_cluster_domain_is_a_validation_error() {
        let t = Tenant::new("abc", TenantSpec::default());
        let cluster_domain = format!("{}.com", "d".repeat(60));
        let err = resolve_tenant_domain(&cluster_domain, &t, |length| "x".repeat(length)).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_load_balancer_address() {
        let fixture = Fixture::new();
        fixture
            .store
            .create(&load_balancer(LoadBalancerIngress::default()))
            .await
            .unwrap();
        let mut abc = tenant("abc");

        let err = ensure_dns(&fixture.cx(), &mut abc).await.unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
        assert!(!in_condition(&abc, TenantConditionType::Domain));
    }

    #[tokio::test]
    async fn test_entry_pending_then_ready() {
        let fixture = Fixture::new();
        fixture
            .store
            .create(&load_balancer(LoadBalancerIngress {
                hostname: Some("lb.example.com".to_string()),
                ..Default::default()
            }))
            .await
            .unwrap();
        let mut abc = tenant("abc");

        ensure_dns(&fixture.cx(), &mut abc).await.unwrap();

        let mut entry: DnsEntry = fixture.store.get(Some("t-abc"), DNS_ENTRY_NAME).await.unwrap().unwrap();
        assert_eq!(entry.spec.dns_name, "*.abc.t.example.com");
        assert_eq!(entry.spec.targets, vec!["lb.example.com"]);
        assert_eq!(entry.spec.ttl, Some(600));
        assert_eq!(entry.annotations().get(DNS_CLASS_ANNOTATION).map(String::as_str), Some("garden"));
        assert_eq!(
            abc.status.as_ref().unwrap().tenant_domain.as_deref(),
            Some("abc.t.example.com")
        );
        let condition = find_condition(&abc, TenantConditionType::Domain).unwrap();
        assert!(!in_condition(&abc, TenantConditionType::Domain));
        assert!(condition.message.contains("abc.t.example.com"));

        // 外部控制器回写就绪状态
        entry.status = Some(ProvisioningStatus {
            state: Some(ProvisioningStatus::READY.to_string()),
            message: None,
        });
        fixture.store.update_status(&entry).await.unwrap();

        ensure_dns(&fixture.cx(), &mut abc).await.unwrap();
        assert!(in_condition(&abc, TenantConditionType::Domain));
    }
}
