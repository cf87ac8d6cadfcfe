//! 租户准入校验模块
//!
//! 在租户写入集群之前进行同步校验：默认租户与其他租户互斥，关闭独立网关时不允许自定义域名。

use anyhow::{bail, Result};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::ResourceExt;
use robofleet_common::naming::DEFAULT_TENANT_NAME;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warp::Filter;

use crate::config::WebhookConfig;
use crate::crd::Tenant;
use crate::store::TenantSource;

/// 校验一个待写入的租户
///
/// 只校验创建与更新，`existing` 为集群中当前的全部租户。
pub fn validate(
    operation: &Operation,
    tenant: &Tenant,
    existing: &[Tenant],
    tenant_specific_gateways: bool,
) -> Result<(), String> {
    if !matches!(operation, Operation::Create | Operation::Update) {
        return Ok(());
    }

    let name = tenant.name_any();
    if name == DEFAULT_TENANT_NAME {
        if let Some(other) = existing.iter().find(|t| t.name_any() != DEFAULT_TENANT_NAME) {
            return Err(format!(
                "创建默认租户 default 之前需要先删除其他租户（已存在租户 {}）",
                other.name_any()
            ));
        }
    } else if existing.iter().any(|t| t.name_any() == DEFAULT_TENANT_NAME) {
        return Err(format!(
            "创建租户 {} 之前需要先删除默认租户 default",
            name
        ));
    }

    let has_domain = tenant
        .spec
        .tenant_domain
        .as_deref()
        .map_or(false, |d| !d.is_empty());
    if !tenant_specific_gateways && has_domain {
        return Err("未启用租户独立网关时 tenantDomain 必须为空".to_string());
    }
    Ok(())
}

/// 对一个准入请求作出允许或拒绝的回应
pub async fn admit<T>(source: &T, tenant_specific_gateways: bool, request: AdmissionRequest<Tenant>) -> AdmissionResponse
where
    T: TenantSource + ?Sized,
{
    let response = AdmissionResponse::from(&request);
    if !matches!(request.operation, Operation::Create | Operation::Update) {
        return response;
    }
    let Some(tenant) = request.object.as_ref() else {
        return AdmissionResponse::invalid("准入请求中缺少租户对象");
    };

    let existing = match source.list_tenants().await {
        Ok(existing) => existing,
        Err(e) => {
            warn!("准入校验时列出租户失败: {}", e);
            return response.deny(format!("无法列出现有租户: {e}"));
        }
    };

    match validate(&request.operation, tenant, &existing, tenant_specific_gateways) {
        Ok(()) => {
            debug!("允许租户 {} 的 {:?} 请求", tenant.name_any(), request.operation);
            response
        }
        Err(reason) => {
            info!("拒绝租户 {} 的 {:?} 请求: {}", tenant.name_any(), request.operation, reason);
            response.deny(reason)
        }
    }
}

/// 解码准入审查请求体并生成回应，无法解码时返回 invalid 回应
pub async fn review<T>(source: &T, tenant_specific_gateways: bool, body: &[u8]) -> AdmissionReview<DynamicObject>
where
    T: TenantSource + ?Sized,
{
    let review: AdmissionReview<Tenant> = match serde_json::from_slice(body) {
        Ok(review) => review,
        Err(e) => {
            warn!("无法解码准入审查: {}", e);
            return AdmissionResponse::invalid(format!("无法解码准入审查: {e}")).into_review();
        }
    };
    let request: AdmissionRequest<Tenant> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!("无效的准入请求: {}", e);
            return AdmissionResponse::invalid(format!("无效的准入请求: {e}")).into_review();
        }
    };
    admit(source, tenant_specific_gateways, request).await.into_review()
}

/// 启动准入校验 HTTPS 服务器，直到停止信号触发
pub async fn run(
    source: Arc<dyn TenantSource>,
    config: &WebhookConfig,
    tenant_specific_gateways: bool,
    shutdown: CancellationToken,
) -> Result<()> {
    let cert = config.cert_dir.join("tls.crt");
    let key = config.cert_dir.join("tls.key");
    for path in [&cert, &key] {
        if !path.exists() {
            bail!("准入校验证书文件不存在: {}", path.display());
        }
    }

    let route = warp::post()
        .and(warp::path!("tenant" / "validate"))
        .and(warp::body::bytes())
        .and(warp::any().map(move || source.clone()))
        .and_then(move |body: hyper::body::Bytes, source: Arc<dyn TenantSource>| async move {
            let response = review(source.as_ref(), tenant_specific_gateways, &body).await;
            Ok::<_, Infallible>(warp::reply::json(&response))
        });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let (addr, server) = warp::serve(route)
        .tls()
        .cert_path(cert)
        .key_path(key)
        .bind_with_graceful_shutdown(addr, async move { shutdown.cancelled().await });

    info!("准入校验服务器启动在 {}", addr);
    server.await;
    info!("准入校验服务器已停止");
    Ok(())
}
