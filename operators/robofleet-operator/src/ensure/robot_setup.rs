//! 机器人安装配置快照
//!
//! 从中央模板复制 ConfigMap 到租户的机器人配置命名空间，并写入租户名、租户域名与主命名空间。
//! 依赖 DNS 确保器解析出的域名，因此在所有确保器之后执行。

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use robofleet_common::naming::{
    robot_config_namespace, tenant_main_namespace, ROBOT_CONFIG_NAMESPACE, ROBOT_SETUP_CONFIGMAP,
};
use robofleet_common::{Error, Result};

use super::{record, upsert, Observation, TENANT_LABEL};
use crate::context::PassContext;
use crate::crd::{Tenant, TenantConditionType};
use crate::store::ObjectStore;

/// 确保租户的机器人安装配置与模板同步
pub async fn ensure_robot_setup<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &mut Tenant) -> Result<()> {
    let result = ensure(cx, tenant).await;
    record(tenant, TenantConditionType::RobotSetup, result)
}

async fn ensure<S: ObjectStore>(cx: &PassContext<'_, S>, tenant: &Tenant) -> Result<Observation> {
    let template: ConfigMap = cx
        .get(Some(ROBOT_CONFIG_NAMESPACE), ROBOT_SETUP_CONFIGMAP)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!("ConfigMap {}/{}", ROBOT_CONFIG_NAMESPACE, ROBOT_SETUP_CONFIGMAP))
        })?;

    let tenant_name = tenant.name_any();
    let main = tenant_main_namespace(&tenant_name);
    let namespace = robot_config_namespace(&main);
    let tenant_domain = tenant
        .status
        .as_ref()
        .and_then(|s| s.tenant_domain.clone())
        .unwrap_or_default();

    // 默认租户的目标就是模板本身，不能让模板归属于租户
    let owner = (namespace != ROBOT_CONFIG_NAMESPACE).then_some(tenant);

    upsert::<_, ConfigMap, _, _>(cx, owner, Some(&namespace), ROBOT_SETUP_CONFIGMAP, ConfigMap::default, |config_map| {
        let mut data = template.data.clone().unwrap_or_default();
        data.insert("tenant".to_string(), tenant_name.clone());
        data.insert("tenant_domain".to_string(), tenant_domain);
        data.insert("tenant_main_namespace".to_string(), main.clone());
        config_map.data = Some(data);
        config_map
            .annotations_mut()
            .insert(TENANT_LABEL.to_string(), tenant_name.clone());
        Ok(())
    })
    .await?;

    Ok(Observation::ready("机器人安装配置已同步"))
}
