//! 单次协调上下文
//!
//! 协调器与确保器的每次存储调用都经过 [`PassContext`]，与取消信号和截止时间赛跑。
//! 任一触发时调用立即返回 [`Error::Cancelled`]，队列会在稍后重试。

use rand::rngs::StdRng;
use robofleet_common::{naming, Error, Result};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::store::{ObjectStore, StoreObject};

/// 单次协调的上下文
pub struct PassContext<'a, S> {
    /// 对象存储
    store: &'a S,
    /// Operator 配置
    config: &'a OperatorConfig,
    /// 随机数源，只用于生成随机域名
    rng: &'a Mutex<StdRng>,
    /// 取消信号
    cancel: CancellationToken,
    /// 截止时间
    deadline: Instant,
}

impl<'a, S: ObjectStore> PassContext<'a, S> {
    /// 创建新的上下文
    pub fn new(
        store: &'a S,
        config: &'a OperatorConfig,
        rng: &'a Mutex<StdRng>,
        cancel: CancellationToken,
        deadline: Instant,
    ) -> Self {
        Self {
            store,
            config,
            rng,
            cancel,
            deadline,
        }
    }

    /// Operator 配置
    pub fn config(&self) -> &OperatorConfig {
        self.config
    }

    /// 生成指定长度的随机标签
    pub fn random_label(&self, length: usize) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        naming::random_label(&mut *rng, length)
    }

    async fn guarded<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("{operation}: 协调已被取消")));
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled(format!("{operation}: 协调已被取消"))),
            _ = tokio::time::sleep_until(self.deadline) => {
                Err(Error::Cancelled(format!("{operation}: 超过协调截止时间")))
            }
            result = call => result,
        }
    }

    pub async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        self.guarded("读取对象", self.store.get::<K>(namespace, name)).await
    }

    pub async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        self.guarded("列出对象", self.store.list::<K>(namespace)).await
    }

    pub async fn create<K: StoreObject>(&self, object: &K) -> Result<K> {
        self.guarded("创建对象", self.store.create(object)).await
    }

    pub async fn update<K: StoreObject>(&self, object: &K) -> Result<K> {
        self.guarded("更新对象", self.store.update(object)).await
    }

    pub async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K> {
        self.guarded("更新状态", self.store.update_status(object)).await
    }

    pub async fn delete<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        self.guarded("删除对象", self.store.delete::<K>(namespace, name)).await
    }

    pub async fn delete_all_of<K: StoreObject>(&self, namespace: &str) -> Result<()> {
        self.guarded("批量删除对象", self.store.delete_all_of::<K>(namespace)).await
    }
}
