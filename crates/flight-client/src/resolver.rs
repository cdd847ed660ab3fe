//! 模块解析能力：把模块引用行的元数据换成本地值。

use flight_core::ModuleMetadata;
use futures::future::BoxFuture;

use crate::{error::RemoteError, model::Model};

/// 一次解析的结果。
pub enum Resolution {
    /// 模块已加载。
    Ready(Model),
    /// 模块正在加载，结算后对应标识符随之结算。
    Pending(BoxFuture<'static, Result<Model, RemoteError>>),
    /// 解析失败，按该标识符的生产者失败处理。
    Failed(RemoteError),
}

/// 注入的模块解析能力。
///
/// 元数据的 `name` 为 `*` 时应返回整个模块（通常是以导出名为键的 [`Model::Object`]），
/// 路径引用会在其上取具名导出；`is_async` 表示模块本身异步求值，由实现决定如何等待。
pub trait ModuleResolver: Send + Sync {
    /// 解析一条模块引用行；在响应内部锁之外调用，每个模块行调用一次。
    fn resolve(&self, metadata: &ModuleMetadata) -> Resolution;
}

impl<F> ModuleResolver for F
where
    F: Fn(&ModuleMetadata) -> Resolution + Send + Sync,
{
    fn resolve(&self, metadata: &ModuleMetadata) -> Resolution {
        self(metadata)
    }
}

/// 未配置解析能力时使用：所有模块解析失败。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoModules;

impl ModuleResolver for NoModules {
    fn resolve(&self, metadata: &ModuleMetadata) -> Resolution {
        Resolution::Failed(RemoteError::module(format!(
            "no module resolver is configured; cannot load `{}`",
            metadata.id
        )))
    }
}
