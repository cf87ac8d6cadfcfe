//! 租户 TLS 证书
//!
//! 证书与其密钥必须和 Istio 入口网关位于同一命名空间。

use kube::ResourceExt;
use robofleet_common::naming::certificate_name;
use robofleet_common::{Error, Result};

use super::dns::ISTIO_NAMESPACE;
use super::{record, upsert, Observation};
use crate::context::PassContext;
use crate::crd::{Certificate, CertificateSpec, ProvisioningStatus, Tenant, TenantConditionType};
use crate::store::ObjectStore;

/// 确保租户通配符证书，证书就绪后条件才为 True
pub async fn ensure_certificate<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &mut Tenant) -> Result<()> {
    let result = ensure(cx, tenant).await;
    record(tenant, TenantConditionType::Certificate, result)
}

/// 状态中已解析的租户域名
pub(crate) fn resolved_domain(tenant: &Tenant) -> Result<String> {
    tenant
        .status
        .as_ref()
        .and_then(|s| s.tenant_domain.clone())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| Error::NotReady("租户域名尚未设置".to_string()))
}

async fn ensure<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &Tenant) -> Result<Observation> {
    let domain = resolved_domain(tenant)?;
    let name = certificate_name(&tenant.name_any());

    let certificate: Certificate = upsert(
        cx,
        Some(tenant),
        Some(ISTIO_NAMESPACE),
        &name,
        || Certificate::new(&name, CertificateSpec::default()),
        |certificate| {
            certificate.spec.common_name = Some(format!("*.{domain}"));
            certificate.spec.secret_name = Some(name.clone());
            Ok(())
        },
    )
    .await?;

    if ProvisioningStatus::is_ready(certificate.status.as_ref()) {
        Ok(Observation::ready(format!("域名 *.{domain} 的 TLS 证书已创建")))
    } else {
        Ok(Observation::pending(format!(
            "域名 *.{domain} 的 TLS 证书已创建，当前状态为 {:?}",
            ProvisioningStatus::observed(certificate.status.as_ref())
        )))
    }
}
