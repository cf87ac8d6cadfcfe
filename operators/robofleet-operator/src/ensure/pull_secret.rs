//! 镜像拉取密钥
//!
//! 服务账号不能引用其他命名空间的密钥，因此把基础命名空间中的模板密钥复制到租户命名空间，
//! 再挂到该命名空间的 default 服务账号上。

use k8s_openapi::api::core::v1::{LocalObjectReference, Secret, ServiceAccount};
use kube::ResourceExt;
use robofleet_common::naming::{robot_config_namespace, tenant_main_namespace, BASE_NAMESPACE, IMAGE_PULL_SECRET};
use robofleet_common::{Error, Result};
use tracing::debug;

use super::{record, upsert, Observation};
use crate::context::PassContext;
use crate::crd::{Tenant, TenantConditionType};
use crate::store::ObjectStore;

/// 确保镜像拉取密钥存在并被 default 服务账号引用
pub async fn ensure_pull_secret<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &mut Tenant) -> Result<()> {
    let result = ensure(cx, tenant).await;
    record(tenant, TenantConditionType::PullSecret, result)
}

async fn ensure<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &Tenant) -> Result<Observation> {
    let template: Secret = cx
        .get(Some(BASE_NAMESPACE), IMAGE_PULL_SECRET)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Secret {}/{}", BASE_NAMESPACE, IMAGE_PULL_SECRET)))?;

    let main = tenant_main_namespace(&tenant.name_any());
    let robot_config = robot_config_namespace(&main);

    for namespace in [main, robot_config] {
        // 基础命名空间中的密钥就是模板本身
        if namespace == BASE_NAMESPACE {
            continue;
        }
        upsert::<_, Secret, _, _>(cx, Some(tenant), Some(&namespace), IMAGE_PULL_SECRET, Secret::default, |secret| {
            secret.data = template.data.clone();
            secret.type_ = template.type_.clone();
            Ok(())
        })
        .await?;

        attach_to_default_service_account(cx, &namespace).await?;
    }

    Ok(Observation::ready("租户镜像拉取密钥已创建"))
}

/// 把拉取密钥挂到命名空间的 default 服务账号上，已引用时不重复添加
async fn attach_to_default_service_account<S: ObjectStore>(cx: &PassContext<'_, S>, namespace: &str) -> Result<()> {
    let mut service_account: ServiceAccount = cx
        .get(Some(namespace), "default")
        .await?
        .ok_or_else(|| Error::MissingServiceAccount(format!("ServiceAccount {}/default", namespace)))?;

    let reference = LocalObjectReference {
        name: Some(IMAGE_PULL_SECRET.to_string()),
    };
    let pull_secrets = service_account.image_pull_secrets.get_or_insert_with(Vec::new);
    if pull_secrets.contains(&reference) {
        return Ok(());
    }
    pull_secrets.push(reference);
    debug!("为 {}/default 服务账号添加镜像拉取密钥", namespace);
    cx.update(&service_account).await?;
    Ok(())
}
