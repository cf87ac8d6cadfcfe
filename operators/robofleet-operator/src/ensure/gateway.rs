//! 租户 Istio 网关

use kube::ResourceExt;
use robofleet_common::naming::{certificate_name, tenant_main_namespace};
use robofleet_common::Result;
use std::collections::BTreeMap;

use super::certificate::resolved_domain;
use super::{record, upsert, Observation};
use crate::context::PassContext;
use crate::crd::{
    Gateway, GatewayPort, GatewayServer, GatewaySpec, ServerTlsSettings, Tenant, TenantConditionType,
    TenantStatus,
};
use crate::store::ObjectStore;

/// 租户网关名称
pub const GATEWAY_NAME: &str = "tenant-gateway";

const CIPHER_SUITES: [&str; 5] = [
    "ECDHE-RSA-CHACHA20-POLY1305",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-SHA",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-SHA",
];

/// 确保租户网关，并把网关引用写入状态
pub async fn ensure_gateway<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &mut Tenant) -> Result<()> {
    let result = ensure(cx, tenant).await;
    record(tenant, TenantConditionType::Gateway, result)
}

async fn ensure<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &mut Tenant) -> Result<Observation> {
    let domain = resolved_domain(tenant)?;
    let tenant_name = tenant.name_any();
    let namespace = tenant_main_namespace(&tenant_name);
    let spec = desired_spec(&domain, &certificate_name(&tenant_name));

    let _: Gateway = upsert(
        cx,
        Some(&*tenant),
        Some(&namespace),
        GATEWAY_NAME,
        || Gateway::new(GATEWAY_NAME, GatewaySpec::default()),
        |gateway| {
            gateway.spec = spec;
            Ok(())
        },
    )
    .await?;

    tenant.status.get_or_insert_with(TenantStatus::default).gateway =
        Some(format!("{namespace}/{GATEWAY_NAME}"));
    Ok(Observation::ready(format!("域名 *.{domain} 的 Istio 网关已创建")))
}

/// HTTPS 443 终止 TLS，HTTP 80 重定向到 HTTPS
fn desired_spec(domain: &str, credential_name: &str) -> GatewaySpec {
    let hosts = vec![format!("*.{domain}")];
    GatewaySpec {
        selector: BTreeMap::from([
            ("app".to_string(), "istio-ingressgateway".to_string()),
            ("istio".to_string(), "ingressgateway".to_string()),
        ]),
        servers: vec![
            GatewayServer {
                hosts: hosts.clone(),
                port: GatewayPort {
                    name: "https".to_string(),
                    number: 443,
                    protocol: "HTTPS".to_string(),
                },
                tls: Some(ServerTlsSettings {
                    mode: Some("SIMPLE".to_string()),
                    credential_name: Some(credential_name.to_string()),
                    min_protocol_version: Some("TLSV1_2".to_string()),
                    cipher_suites: CIPHER_SUITES.iter().map(|c| c.to_string()).collect(),
                    https_redirect: false,
                }),
            },
            GatewayServer {
                hosts,
                port: GatewayPort {
                    name: "http".to_string(),
                    number: 80,
                    protocol: "HTTP".to_string(),
                },
                tls: Some(ServerTlsSettings {
                    https_redirect: true,
                    ..Default::default()
                }),
            },
        ],
    }
}
