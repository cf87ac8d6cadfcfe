//! 错误处理模块
//!
//! 该模块提供 RoboFleet 项目的统一错误处理机制。错误分为三类：
//! 瞬时的集群 API 错误（重新排队重试）、可恢复的领域状态（记录为 False 条件并快速复查）
//! 以及需要用户修改声明才能解决的校验错误。

use std::io;
use thiserror::Error;

/// RoboFleet 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 集群 API 错误（网络、服务端错误等）
    #[error("集群 API 错误: {0}")]
    Api(String),

    /// 资源不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 资源已存在
    #[error("资源已存在: {0}")]
    AlreadyExists(String),

    /// 乐观并发冲突，资源版本已过期
    #[error("资源版本冲突: {0}")]
    Conflict(String),

    /// 同名命名空间正在删除中，需要等待删除完成
    #[error("命名空间正在删除: {0}")]
    NamespaceInDeletion(String),

    /// 命名空间的 default 服务账号尚未由集群创建
    #[error("default 服务账号尚未创建: {0}")]
    MissingServiceAccount(String),

    /// 依赖的外部资源尚未就绪
    #[error("资源尚未就绪: {0}")]
    NotReady(String),

    /// 资源已被其他控制器对象持有
    #[error("资源归属冲突: {0}")]
    OwnerConflict(String),

    /// 校验错误
    #[error("校验失败: {0}")]
    Validation(String),

    /// 操作被取消或超过截止时间
    #[error("操作已取消: {0}")]
    Cancelled(String),

    /// 序列化/反序列化错误
    #[error("序列化/反序列化错误: {0}")]
    Serialization(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 带有操作名称与租户标识的错误
    #[error("{operation}（租户 {tenant}）: {source}")]
    Tenant {
        /// 失败的操作
        operation: String,
        /// 租户名称
        tenant: String,
        /// 原始错误
        #[source]
        source: Box<Error>,
    },
}

/// RoboFleet 结果类型别名
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// 去掉租户包装后的原始错误
    pub fn root(&self) -> &Error {
        match self {
            Error::Tenant { source, .. } => source.root(),
            other => other,
        }
    }

    /// 是否为可恢复的领域状态（不视为失败，只需快速复查）
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.root(),
            Error::NamespaceInDeletion(_) | Error::MissingServiceAccount(_) | Error::NotReady(_)
        )
    }

    /// 是否值得重试；校验与配置错误需要先修改声明
    pub fn is_retryable(&self) -> bool {
        !matches!(self.root(), Error::Validation(_) | Error::Config(_))
    }

    /// 是否为资源版本冲突
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Error::Conflict(_))
    }
}

/// 为错误附加操作名称与租户标识
pub trait ResultExt<T> {
    /// 将错误包装为 [`Error::Tenant`]
    fn for_tenant(self, operation: &str, tenant: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn for_tenant(self, operation: &str, tenant: &str) -> Result<T> {
        self.map_err(|e| Error::Tenant {
            operation: operation.to_string(),
            tenant: tenant.to_string(),
            source: Box::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_error_keeps_classification() {
        let err: Result<()> = Err(Error::NamespaceInDeletion("t-abc".to_string()));
        let err = err.for_tenant("确保命名空间", "abc").unwrap_err();

        assert!(err.is_recoverable());
        assert!(err.is_retryable());
        let message = err.to_string();
        assert!(message.contains("确保命名空间"));
        assert!(message.contains("abc"));
    }

    #[test]
    fn test_validation_error_is_not_retryable() {
        let err = Error::Validation("域名过长".to_string());
        assert!(!err.is_retryable());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_conflict_detection_through_wrapper() {
        let err: Result<()> = Err(Error::Conflict("resourceVersion 7".to_string()));
        let err = err.for_tenant("更新租户状态", "abc").unwrap_err();
        assert!(err.is_conflict());
        assert!(!err.is_recoverable());
    }
}
