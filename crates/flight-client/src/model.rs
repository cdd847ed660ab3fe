//! 解码端重建出的值。

use std::{any::Any, fmt, sync::Arc};

use crate::handle::Handle;

/// 重建后的值。
///
/// 与编码端的值模型一一对应，另有两个只在解码端出现的变体：
/// `Promise` 是指向另一个标识符的非阻塞句柄，`Opaque` 是模块解析能力返回的宿主对象。
#[derive(Clone, Default)]
pub enum Model {
    /// 缺失的值，也是越界属性访问的结果。
    #[default]
    Undefined,
    /// JSON `null`。
    Null,
    /// 布尔值。
    Bool(bool),
    /// 数值，含 `NaN`、无穷与负零。
    Number(f64),
    /// 任意精度整数的十进制文本。
    BigInt(String),
    /// 已去除转义的字符串。
    String(String),
    /// 数组。
    Array(Vec<Model>),
    /// 保持原始顺序的对象。
    Object(Vec<(String, Model)>),
    /// 元素。
    Element(Box<ElementModel>),
    /// 按注册名还原的符号。
    Symbol(String),
    /// 非阻塞引用：值本身可能仍未结算。
    Promise(Handle),
    /// 模块解析能力返回的宿主对象。
    Opaque(Arc<dyn Any + Send + Sync>),
}

/// 重建后的元素。
#[derive(Clone, Debug, PartialEq)]
pub struct ElementModel {
    /// 元素类型：标签名字符串或解析出的模块导出。
    pub ty: Model,
    /// 可选的 key。
    pub key: Option<String>,
    /// 按原始顺序排列的属性，子节点位于 `children`。
    pub props: Vec<(String, Model)>,
}

impl Model {
    /// 包装一个宿主对象。
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Model::Opaque(Arc::new(value))
    }

    /// 由键值对构造对象，保持给定顺序。
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Model)>,
        K: Into<String>,
    {
        Model::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// 对象或元素属性的查找；其余变体返回 `None`。
    pub fn get(&self, key: &str) -> Option<&Model> {
        let entries = match self {
            Model::Object(entries) => entries,
            Model::Element(element) => &element.props,
            _ => return None,
        };
        entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// 字符串内容。
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Model::String(text) => Some(text),
            _ => None,
        }
    }

    /// 数值内容。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Model::Number(number) => Some(*number),
            _ => None,
        }
    }

    /// 元素内容。
    pub fn as_element(&self) -> Option<&ElementModel> {
        match self {
            Model::Element(element) => Some(element),
            _ => None,
        }
    }

    /// 把宿主对象还原为具体类型。
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Model::Opaque(value) => value.downcast_ref(),
            _ => None,
        }
    }

    /// 沿属性路径取值；缺失的属性得到 `Undefined`。
    pub(crate) fn project(&self, path: &[&str]) -> Model {
        let mut current = self;
        for segment in path {
            match current.get(segment) {
                Some(next) => current = next,
                None => return Model::Undefined,
            }
        }
        current.clone()
    }
}

impl From<&str> for Model {
    fn from(text: &str) -> Self {
        Model::String(text.to_owned())
    }
}

impl From<String> for Model {
    fn from(text: String) -> Self {
        Model::String(text)
    }
}

impl From<f64> for Model {
    fn from(number: f64) -> Self {
        Model::Number(number)
    }
}

impl From<bool> for Model {
    fn from(flag: bool) -> Self {
        Model::Bool(flag)
    }
}

impl From<ElementModel> for Model {
    fn from(element: ElementModel) -> Self {
        Model::Element(Box::new(element))
    }
}

/// 结构相等：`NaN` 与 `NaN` 相等，`0` 与 `-0` 不等；句柄按所属响应与标识符比较，
/// 宿主对象按指针比较。
impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Model::Undefined, Model::Undefined) | (Model::Null, Model::Null) => true,
            (Model::Bool(a), Model::Bool(b)) => a == b,
            (Model::Number(a), Model::Number(b)) => a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()),
            (Model::BigInt(a), Model::BigInt(b))
            | (Model::String(a), Model::String(b))
            | (Model::Symbol(a), Model::Symbol(b)) => a == b,
            (Model::Array(a), Model::Array(b)) => a == b,
            (Model::Object(a), Model::Object(b)) => a == b,
            (Model::Element(a), Model::Element(b)) => a == b,
            (Model::Promise(a), Model::Promise(b)) => a.same_target(b),
            (Model::Opaque(a), Model::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Undefined => f.write_str("Undefined"),
            Model::Null => f.write_str("Null"),
            Model::Bool(flag) => f.debug_tuple("Bool").field(flag).finish(),
            Model::Number(number) => f.debug_tuple("Number").field(number).finish(),
            Model::BigInt(digits) => f.debug_tuple("BigInt").field(digits).finish(),
            Model::String(text) => f.debug_tuple("String").field(text).finish(),
            Model::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Model::Object(entries) => f.debug_tuple("Object").field(entries).finish(),
            Model::Element(element) => f.debug_tuple("Element").field(element).finish(),
            Model::Symbol(name) => f.debug_tuple("Symbol").field(name).finish(),
            Model::Promise(handle) => f.debug_tuple("Promise").field(&handle.id()).finish(),
            Model::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}
