//! 内存对象存储
//!
//! 以 JSON 形式保存对象，模拟 API 服务器中与协调逻辑相关的语义：
//! resourceVersion 乐观并发、状态子资源、finalizer 与删除时间戳。
//! 另外支持按类型与操作注入故障，并记录集合删除，便于测试断言。

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use robofleet_common::{Error, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ObjectStore, StoreObject};

/// 存储操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
    DeleteCollection,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<ObjectKey, Value>,
    last_version: u64,
    faults: HashMap<(String, Verb), String>,
    collection_deletes: Vec<(String, String)>,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    fn check_fault(&self, kind: &str, verb: Verb) -> Result<()> {
        match self.faults.get(&(kind.to_string(), verb)) {
            Some(message) => Err(Error::Api(message.clone())),
            None => Ok(()),
        }
    }

    /// 删除语义：有 finalizer 时只标记删除时间戳
    fn delete_key(&mut self, key: &ObjectKey) {
        let Some(value) = self.objects.get(key) else {
            return;
        };
        let meta = meta_of(value);
        if meta.finalizers.as_ref().map_or(true, Vec::is_empty) {
            self.objects.remove(key);
            return;
        }
        if meta.deletion_timestamp.is_some() {
            return;
        }
        let version = self.next_version();
        if let Some(value) = self.objects.get_mut(key) {
            set_meta_field(value, "deletionTimestamp", Value::String(now()));
            set_meta_field(value, "resourceVersion", Value::String(version));
        }
    }
}

/// 内存对象存储
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn meta_of(value: &Value) -> ObjectMeta {
    value
        .get("metadata")
        .cloned()
        .and_then(|m| serde_json::from_value(m).ok())
        .unwrap_or_default()
}

fn set_meta_field(value: &mut Value, field: &str, field_value: Value) {
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert(field.to_string(), field_value);
    }
}

fn copy_meta_field(from: &Value, to: &mut Value, field: &str) {
    match from.get("metadata").and_then(|m| m.get(field)) {
        Some(field_value) => set_meta_field(to, field, field_value.clone()),
        None => {
            if let Some(metadata) = to.get_mut("metadata").and_then(Value::as_object_mut) {
                metadata.remove(field);
            }
        }
    }
}

fn key_for<K: StoreObject>(namespace: Option<&str>, name: &str) -> ObjectKey {
    ObjectKey {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        namespace: namespace.unwrap_or_default().to_string(),
        name: name.to_string(),
    }
}

fn key_of<K: StoreObject>(object: &K) -> Result<ObjectKey> {
    let meta = object.meta();
    let name = meta
        .name
        .as_deref()
        .ok_or_else(|| Error::Validation(format!("{} 缺少名称", K::kind(&()))))?;
    Ok(key_for::<K>(meta.namespace.as_deref(), name))
}

fn decode<K: StoreObject>(value: &Value) -> Result<K> {
    serde_json::from_value(value.clone()).map_err(|e| Error::Serialization(e.to_string()))
}

fn describe(key: &ObjectKey) -> String {
    if key.namespace.is_empty() {
        format!("{} {}", key.kind, key.name)
    } else {
        format!("{} {}/{}", key.kind, key.namespace, key.name)
    }
}

impl MemoryStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 直接写入对象，不经过任何 API 语义检查
    ///
    /// 缺少 uid 与 resourceVersion 时补齐，其余字段（包括删除时间戳）原样保存。
    pub fn seed<K: StoreObject>(&self, object: &K) -> Result<()> {
        let key = key_of(object)?;
        let mut value = serde_json::to_value(object)?;
        let mut state = self.lock();
        let meta = meta_of(&value);
        if meta.uid.is_none() {
            set_meta_field(&mut value, "uid", Value::String(uuid::Uuid::new_v4().to_string()));
        }
        if meta.resource_version.is_none() {
            let version = state.next_version();
            set_meta_field(&mut value, "resourceVersion", Value::String(version));
        }
        state.objects.insert(key, value);
        Ok(())
    }

    /// 让某类型的某个操作始终失败
    pub fn inject_fault(&self, kind: &str, verb: Verb, message: &str) {
        self.lock()
            .faults
            .insert((kind.to_string(), verb), message.to_string());
    }

    /// 清除注入的故障
    pub fn clear_fault(&self, kind: &str, verb: Verb) {
        self.lock().faults.remove(&(kind.to_string(), verb));
    }

    /// 已执行的集合删除，按 (类型, 命名空间) 记录
    pub fn collection_deletes(&self) -> Vec<(String, String)> {
        self.lock().collection_deletes.clone()
    }

    /// 当前保存的对象总数
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    /// 存储是否为空
    pub fn is_empty(&self) -> bool {
        self.lock().objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let state = self.lock();
        state.check_fault(&K::kind(&()), Verb::Get)?;
        state
            .objects
            .get(&key_for::<K>(namespace, name))
            .map(decode)
            .transpose()
    }

    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        let state = self.lock();
        let api_version = K::api_version(&());
        let kind = K::kind(&());
        state.check_fault(&kind, Verb::List)?;
        state
            .objects
            .iter()
            .filter(|(key, _)| key.api_version == api_version && key.kind == kind)
            .filter(|(key, _)| namespace.map_or(true, |ns| key.namespace == ns))
            .map(|(_, value)| decode(value))
            .collect()
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K> {
        let key = key_of(object)?;
        let mut state = self.lock();
        state.check_fault(&key.kind, Verb::Create)?;
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists(describe(&key)));
        }

        let mut value = serde_json::to_value(object)?;
        let version = state.next_version();
        set_meta_field(&mut value, "uid", Value::String(uuid::Uuid::new_v4().to_string()));
        set_meta_field(&mut value, "resourceVersion", Value::String(version));
        set_meta_field(&mut value, "creationTimestamp", Value::String(now()));
        let created = decode(&value)?;
        state.objects.insert(key, value);
        Ok(created)
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K> {
        let key = key_of(object)?;
        let mut state = self.lock();
        state.check_fault(&key.kind, Verb::Update)?;
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(describe(&key)))?;
        let stored_meta = meta_of(&stored);
        if let Some(version) = object.meta().resource_version.as_deref() {
            if stored_meta.resource_version.as_deref() != Some(version) {
                return Err(Error::Conflict(describe(&key)));
            }
        }

        let mut value = serde_json::to_value(object)?;
        match stored.get("status") {
            Some(status) => {
                if let Some(map) = value.as_object_mut() {
                    map.insert("status".to_string(), status.clone());
                }
            }
            None => {
                if let Some(map) = value.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            copy_meta_field(&stored, &mut value, field);
        }
        let version = state.next_version();
        set_meta_field(&mut value, "resourceVersion", Value::String(version));

        let updated = decode(&value)?;
        let meta = meta_of(&value);
        if meta.deletion_timestamp.is_some() && meta.finalizers.as_ref().map_or(true, Vec::is_empty) {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, value);
        }
        Ok(updated)
    }

    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K> {
        let key = key_of(object)?;
        let mut state = self.lock();
        state.check_fault(&key.kind, Verb::UpdateStatus)?;
        let mut stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(describe(&key)))?;
        if let Some(version) = object.meta().resource_version.as_deref() {
            if meta_of(&stored).resource_version.as_deref() != Some(version) {
                return Err(Error::Conflict(describe(&key)));
            }
        }

        let incoming = serde_json::to_value(object)?;
        if let Some(map) = stored.as_object_mut() {
            match incoming.get("status") {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        let version = state.next_version();
        set_meta_field(&mut stored, "resourceVersion", Value::String(version));

        let updated = decode(&stored)?;
        state.objects.insert(key, stored);
        Ok(updated)
    }

    async fn delete<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        let key = key_for::<K>(namespace, name);
        let mut state = self.lock();
        state.check_fault(&key.kind, Verb::Delete)?;
        state.delete_key(&key);
        Ok(())
    }

    async fn delete_all_of<K: StoreObject>(&self, namespace: &str) -> Result<()> {
        let mut state = self.lock();
        let api_version = K::api_version(&());
        let kind = K::kind(&());
        state.check_fault(&kind, Verb::DeleteCollection)?;
        state
            .collection_deletes
            .push((kind.to_string(), namespace.to_string()));

        let keys: Vec<ObjectKey> = state
            .objects
            .keys()
            .filter(|key| key.api_version == api_version && key.kind == kind && key.namespace == namespace)
            .cloned()
            .collect();
        for key in &keys {
            state.delete_key(key);
        }
        Ok(())
    }
}
