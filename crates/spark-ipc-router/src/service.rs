//! 服务级自注册。
//!
//! # 教案式说明
//! - **意图（Why）**：一个服务通常暴露多个方法，逐条注册既啰嗦又容易漏掉；
//!   服务实现本 trait 后，装配代码只需一行即可把全部方法挂进路由表；
//! - **契约（What）**：实现应按 `"{service}.{method}"` 约定命名路由
//!   （见 [`Route::for_method`](spark_ipc::Route::for_method)），并在遇到第一个冲突时返回错误；
//!   已成功注册的路由不会回滚，调用方可按需 [`IpcRouter::deregister`]。

use spark_ipc::Registrar;

use crate::{IpcRouter, RouterError};

/// 一次性把服务的全部方法注册进路由器。
pub trait SelfRegistration {
    fn self_register(&self, registrar: &Registrar, router: &IpcRouter) -> Result<(), RouterError>;
}
