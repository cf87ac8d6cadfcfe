//! 对象存储模块
//!
//! 协调器与各个确保器只通过 [`ObjectStore`] 访问集群对象。生产环境使用基于
//! `kube::Api<DynamicObject>` 的 [`KubeStore`]，测试使用内存实现 [`MemoryStore`]。

pub mod memory;

use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject, TypeMeta},
    Client, Resource, ResourceExt,
};
use robofleet_common::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::Tenant;

pub use memory::{MemoryStore, Verb};

/// 可以通过对象存储读写的资源类型
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// 按类型参数化的集群对象存储
///
/// `namespace` 为 `None` 时表示集群级对象，或对命名空间级对象跨所有命名空间操作。
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// 读取对象，不存在时返回 `None`
    async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>;

    /// 列出对象
    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>>;

    /// 创建对象，同名对象已存在时返回 [`Error::AlreadyExists`]
    async fn create<K: StoreObject>(&self, object: &K) -> Result<K>;

    /// 替换对象（不含状态），resourceVersion 过期时返回 [`Error::Conflict`]
    async fn update<K: StoreObject>(&self, object: &K) -> Result<K>;

    /// 只替换对象的状态子资源
    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K>;

    /// 删除对象，对象不存在时视为成功
    async fn delete<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<()>;

    /// 删除命名空间内某类型的全部对象
    async fn delete_all_of<K: StoreObject>(&self, namespace: &str) -> Result<()>;
}

/// 租户列表来源，供准入校验使用
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantSource: Send + Sync {
    /// 列出集群中当前所有租户
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;
}

/// 基于 Kubernetes API 的对象存储
#[derive(Clone)]
pub struct KubeStore {
    /// Kubernetes 客户端
    client: Client,
}

impl KubeStore {
    /// 创建新的存储
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 获取 Kubernetes 客户端
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: StoreObject>(&self, namespace: Option<&str>) -> (Api<DynamicObject>, ApiResource) {
        let resource = ApiResource::erase::<K>(&());
        let api = match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        };
        (api, resource)
    }
}

/// 类型化对象转换为动态对象
fn to_dynamic<K: StoreObject>(object: &K) -> Result<DynamicObject> {
    let value = serde_json::to_value(object)?;
    serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// 动态对象转换回类型化对象
///
/// 列表中的条目可能不带 apiVersion/kind，转换前补齐。
fn from_dynamic<K: StoreObject>(mut object: DynamicObject, resource: &ApiResource) -> Result<K> {
    if object.types.is_none() {
        object.types = Some(TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
    }
    let value = serde_json::to_value(object)?;
    serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// 把 kube 错误映射到统一错误类型
fn map_kube_error(err: kube::Error, what: &str) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 404 => {
            Error::NotFound(format!("{what}: {}", response.message))
        }
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            Error::AlreadyExists(format!("{what}: {}", response.message))
        }
        kube::Error::Api(response) if response.code == 409 => {
            Error::Conflict(format!("{what}: {}", response.message))
        }
        other => Error::Api(format!("{what}: {other}")),
    }
}

fn describe<K: StoreObject>(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(namespace) => format!("{} {}/{}", K::kind(&()), namespace, name),
        None => format!("{} {}", K::kind(&()), name),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let (api, resource) = self.api::<K>(namespace);
        let object = api
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, &describe::<K>(namespace, name)))?;
        object.map(|o| from_dynamic(o, &resource)).transpose()
    }

    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        let (api, resource) = self.api::<K>(namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, &format!("列出 {}", K::kind(&()))))?;
        list.items
            .into_iter()
            .map(|o| from_dynamic(o, &resource))
            .collect()
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K> {
        let namespace = object.namespace();
        let (api, resource) = self.api::<K>(namespace.as_deref());
        let what = describe::<K>(namespace.as_deref(), &object.name_any());
        let created = api
            .create(&PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| map_kube_error(e, &what))?;
        debug!("已创建 {}", what);
        from_dynamic(created, &resource)
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K> {
        let namespace = object.namespace();
        let name = object.name_any();
        let (api, resource) = self.api::<K>(namespace.as_deref());
        let what = describe::<K>(namespace.as_deref(), &name);
        let updated = api
            .replace(&name, &PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| map_kube_error(e, &what))?;
        debug!("已更新 {}", what);
        from_dynamic(updated, &resource)
    }

    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K> {
        let namespace = object.namespace();
        let name = object.name_any();
        let (api, resource) = self.api::<K>(namespace.as_deref());
        let what = describe::<K>(namespace.as_deref(), &name);
        let data = serde_json::to_vec(&to_dynamic(object)?)?;
        let updated = api
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| map_kube_error(e, &what))?;
        from_dynamic(updated, &resource)
    }

    async fn delete<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        let (api, _) = self.api::<K>(namespace);
        let what = describe::<K>(namespace, name);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!("已删除 {}", what);
                Ok(())
            }
            Err(e) => match map_kube_error(e, &what) {
                Error::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn delete_all_of<K: StoreObject>(&self, namespace: &str) -> Result<()> {
        let (api, _) = self.api::<K>(Some(namespace));
        api.delete_collection(&DeleteParams::default(), &ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, &format!("删除 {}/{}", namespace, K::kind(&()))))?;
        debug!("已删除命名空间 {} 中的全部 {}", namespace, K::kind(&()));
        Ok(())
    }
}

#[async_trait]
impl TenantSource for KubeStore {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        self.list::<Tenant>(None).await
    }
}

#[async_trait]
impl TenantSource for MemoryStore {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        self.list::<Tenant>(None).await
    }
}
