//! RoboFleet Common - 跨模块共享工具与数据结构
//!
//! 该模块提供 RoboFleet 项目中所有组件共享的租户命名规则、统一的错误处理机制
//! 以及随机域名标签等工具函数。

pub mod error;
pub mod naming;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use error::ResultExt;
