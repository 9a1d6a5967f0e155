use spark_ipc::{InteractionModel, Route};
use thiserror::Error;

/// 路由表变更失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// 同一交互模型下路由已被占用。
    #[error("{model} route `{route}` is already registered")]
    DuplicateRoute { model: InteractionModel, route: Route },
}

impl RouterError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::DuplicateRoute { .. } => "ipc.router.duplicate_route",
        }
    }
}
