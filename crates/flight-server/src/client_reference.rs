//! 客户端引用：由解码端自行加载、编码端只传描述符的值。

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Weak},
};

use flight_core::FlightError;
use parking_lot::Mutex;

/// React 等宿主在检查组件时会读取的属性名；对它们的访问不视为误用。
const INSPECTION_NAMES: [&str; 5] = ["name", "displayName", "defaultProps", "toJSON", "$$typeof"];

const CONTEXT_PROVIDER: &str = "Provider";

struct ModuleInner {
    specifier: Arc<str>,
    contexts: HashSet<String>,
    exports: Mutex<HashMap<String, ClientReference>>,
}

/// 一个客户端模块。
///
/// # 教案式说明
/// - **意图 (Why)**：同一导出在流内必须序列化为同一描述符，因此导出引用由模块缓存，
///   重复调用 [`ClientModule::export`] 返回指针相同的 [`ClientReference`]；
/// - **契约 (What)**：`specifier` 是解码端模块解析能力认识的模块路径；
///   通过 [`ClientModule::with_context`] 声明的导出在被访问 `Provider` 时给出专门的报错；
/// - **风险 (Trade-offs)**：引用只以弱引用回指模块，模块全部被丢弃后整模块引用不能再取出新导出。
#[derive(Clone)]
pub struct ClientModule {
    inner: Arc<ModuleInner>,
}

impl ClientModule {
    pub fn new(specifier: impl Into<String>) -> Self {
        Self::build(specifier.into(), HashSet::new())
    }

    /// 声明一个上下文导出。
    pub fn with_context(self, export: impl Into<String>) -> Self {
        let mut contexts = self.inner.contexts.clone();
        contexts.insert(export.into());
        Self::build(self.inner.specifier.to_string(), contexts)
    }

    fn build(specifier: String, contexts: HashSet<String>) -> Self {
        Self {
            inner: Arc::new(ModuleInner {
                specifier: Arc::from(specifier),
                contexts,
                exports: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn specifier(&self) -> &str {
        &self.inner.specifier
    }

    /// 具名导出；空串表示默认导出。
    pub fn export(&self, name: &str) -> ClientReference {
        let mut exports = self.inner.exports.lock();
        if let Some(existing) = exports.get(name) {
            return existing.clone();
        }
        let export = if self.inner.contexts.contains(name) {
            Export::Context(name.to_owned())
        } else {
            Export::Named(name.to_owned())
        };
        let reference = ClientReference::new(&self.inner, export);
        exports.insert(name.to_owned(), reference.clone());
        reference
    }

    /// 整个模块。
    pub fn whole(&self) -> ClientReference {
        let mut exports = self.inner.exports.lock();
        exports
            .entry(flight_core::ModuleMetadata::WHOLE_MODULE.to_owned())
            .or_insert_with(|| ClientReference::new(&self.inner, Export::Whole))
            .clone()
    }
}

impl fmt::Debug for ClientModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientModule")
            .field("specifier", &self.specifier())
            .finish()
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum Export {
    Whole,
    Named(String),
    Context(String),
}

struct ReferenceInner {
    module: Weak<ModuleInner>,
    specifier: Arc<str>,
    export: Export,
}

/// 客户端导出的不透明描述符。
#[derive(Clone)]
pub struct ClientReference {
    inner: Arc<ReferenceInner>,
}

impl ClientReference {
    fn new(module: &Arc<ModuleInner>, export: Export) -> Self {
        Self {
            inner: Arc::new(ReferenceInner {
                module: Arc::downgrade(module),
                specifier: Arc::clone(&module.specifier),
                export,
            }),
        }
    }

    pub fn specifier(&self) -> &str {
        &self.inner.specifier
    }

    /// 导出名；整模块引用返回 `*`。
    pub fn export_name(&self) -> &str {
        match &self.inner.export {
            Export::Whole => flight_core::ModuleMetadata::WHOLE_MODULE,
            Export::Named(name) | Export::Context(name) => name,
        }
    }

    pub fn is_whole_module(&self) -> bool {
        matches!(self.inner.export, Export::Whole)
    }

    /// 在引用上读取属性。
    ///
    /// - 整模块引用：返回同名导出（`$$typeof` 除外，返回 `None`）；
    /// - 具名导出：检查用的属性名返回 `None`，上下文导出的 `Provider` 与其余属性都报
    ///   [`FlightError::ClientReferenceAccess`]。
    pub fn get(&self, property: &str) -> Result<Option<ClientReference>, FlightError> {
        match &self.inner.export {
            Export::Whole => {
                if property == "$$typeof" {
                    return Ok(None);
                }
                Ok(self.inner.module.upgrade().map(|module| {
                    ClientModule { inner: module }.export(property)
                }))
            }
            _ if INSPECTION_NAMES.contains(&property) => Ok(None),
            Export::Context(_) if property == CONTEXT_PROVIDER => {
                Err(FlightError::ClientReferenceAccess {
                    message: "Cannot render a Client Context Provider on the Server. \
                              Instead, you can export a Client Component wrapper \
                              that itself renders a Client Context Provider."
                        .to_owned(),
                })
            }
            Export::Named(name) | Export::Context(name) => {
                Err(FlightError::ClientReferenceAccess {
                    message: format!(
                        "Cannot access {name}.{property} on the server. \
                         You cannot dot into a client module from a server component. \
                         You can only pass the imported name through."
                    ),
                })
            }
        }
    }

    /// 同一导出的引用返回 `true`，与是否经由同一模块句柄取得无关。
    pub fn same_export(&self, other: &ClientReference) -> bool {
        self.inner.specifier == other.inner.specifier && self.inner.export == other.inner.export
    }

    pub(crate) fn dedup_key(&self) -> (Arc<str>, String) {
        (Arc::clone(&self.inner.specifier), self.export_name().to_owned())
    }
}

impl fmt::Debug for ClientReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientReference")
            .field("specifier", &self.specifier())
            .field("export", &self.export_name())
            .finish()
    }
}
