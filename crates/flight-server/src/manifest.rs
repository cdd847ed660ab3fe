//! 客户端清单：把客户端引用映射为模块引用行的负载。

use std::collections::HashMap;

use anyhow::anyhow;
use flight_core::ModuleMetadata;

use crate::client_reference::ClientReference;

/// 注入的清单查询能力。
///
/// 查询失败视为该引用所在标识符的生产者失败：错误回调被调用，并输出错误行。
pub trait ClientManifest: Send + Sync {
    fn resolve(&self, reference: &ClientReference) -> anyhow::Result<ModuleMetadata>;
}

impl<F> ClientManifest for F
where
    F: Fn(&ClientReference) -> anyhow::Result<ModuleMetadata> + Send + Sync,
{
    fn resolve(&self, reference: &ClientReference) -> anyhow::Result<ModuleMetadata> {
        self(reference)
    }
}

/// 预先登记的静态清单。
///
/// 查找顺序：`(模块, 导出名)` 精确条目，其次 `(模块, "*")` 整模块条目。
/// 命中整模块条目时返回的元数据 `name` 为 `*`，编码端据此改用路径引用。
#[derive(Clone, Debug, Default)]
pub struct StaticManifest {
    entries: HashMap<(String, String), ModuleMetadata>,
}

impl StaticManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记具名导出。
    pub fn with_export(
        mut self,
        specifier: impl Into<String>,
        export: impl Into<String>,
        metadata: ModuleMetadata,
    ) -> Self {
        self.entries
            .insert((specifier.into(), export.into()), metadata);
        self
    }

    /// 登记整模块条目，`metadata.name` 会被改写为 `*`。
    pub fn with_module(self, specifier: impl Into<String>, mut metadata: ModuleMetadata) -> Self {
        metadata.name = ModuleMetadata::WHOLE_MODULE.to_owned();
        self.with_export(specifier, ModuleMetadata::WHOLE_MODULE, metadata)
    }
}

impl ClientManifest for StaticManifest {
    fn resolve(&self, reference: &ClientReference) -> anyhow::Result<ModuleMetadata> {
        let specifier = reference.specifier().to_owned();
        self.entries
            .get(&(specifier.clone(), reference.export_name().to_owned()))
            .or_else(|| {
                self.entries
                    .get(&(specifier, ModuleMetadata::WHOLE_MODULE.to_owned()))
            })
            .cloned()
            .ok_or_else(|| {
                anyhow!(
                    "Could not find the module \"{}\" in the client manifest",
                    reference.specifier()
                )
            })
    }
}
