//! 编码端的值模型。
//!
//! [`Value`] 是生产者交给 [`crate::Request`] 的输入：普通值内联进模型行，
//! 共享子树与异步值各自占用一个标识符，客户端引用只以模块引用行出现。

use std::{fmt, sync::Arc};

use futures::{
    FutureExt,
    channel::oneshot,
    future::{BoxFuture, Shared},
};

use crate::client_reference::ClientReference;

/// 生产者提交的值。
///
/// # 教案式说明
/// - **意图 (Why)**：在编码前就把“可以内联的数据”与“需要单独寻址的值”区分开，
///   编码器无需猜测哪些子树应当去重或延后；
/// - **契约 (What)**：
///   - `Array`、`Object`、`Element` 总是内联，不参与去重；
///   - `Shared` 以 `Arc` 指针身份去重，同一 `Arc` 在一个流内只输出一行；
///   - `Deferred` 阻塞父值：解码端的父值要等它结算后才算结算；
///   - `Promise` 不阻塞父值：解码端拿到的是一个可等待的句柄；
///   - `Client` 从不展开，只输出模块引用；
/// - **风险 (Trade-offs)**：`Object` 使用 `Vec` 保存键值对以保持插入顺序，重复键由调用方负责避免。
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// 显式缺省。
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// 大整数，十进制文本，可带负号。
    BigInt(String),
    String(String),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
    Element(Box<Element>),
    /// 以注册名标识的全局符号。
    Symbol(String),
    Client(ClientReference),
    Shared(Arc<Value>),
    Deferred(Deferred),
    Promise(Deferred),
}

impl Value {
    pub fn string(text: impl Into<String>) -> Self {
        Value::String(text.into())
    }

    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn shared(value: Value) -> Self {
        Value::Shared(Arc::new(value))
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Value::Number(number)
    }
}

impl From<i32> for Value {
    fn from(number: i32) -> Self {
        Value::Number(f64::from(number))
    }
}

impl From<Element> for Value {
    fn from(element: Element) -> Self {
        Value::Element(Box::new(element))
    }
}

impl From<ClientReference> for Value {
    fn from(reference: ClientReference) -> Self {
        Value::Client(reference)
    }
}

impl From<Deferred> for Value {
    fn from(deferred: Deferred) -> Self {
        Value::Deferred(deferred)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// 元素：`type` 可以是标签名字符串或客户端引用，`props` 保持插入顺序。
#[derive(Clone, Debug)]
pub struct Element {
    pub ty: Value,
    pub key: Option<String>,
    pub props: Vec<(String, Value)>,
}

impl Element {
    pub fn new(ty: impl Into<Value>) -> Self {
        Self {
            ty: ty.into(),
            key: None,
            props: Vec::new(),
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn prop(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.push((name.into(), value.into()));
        self
    }

    /// 追加 `children` 属性。
    pub fn child(self, child: impl Into<Value>) -> Self {
        self.prop("children", child)
    }
}

/// 值生产失败的原因。
#[derive(Clone)]
pub enum Failure {
    /// 普通错误：经错误回调换成摘要后发送。
    Error(Arc<anyhow::Error>),
    /// 暂缓：该值本次不产出，输出暂缓行，不触发错误回调。
    Postponed { reason: String },
}

impl Failure {
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Failure::Error(Arc::new(anyhow::Error::msg(message)))
    }

    pub fn postponed(reason: impl Into<String>) -> Self {
        Failure::Postponed {
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Error(Arc::new(err))
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Error(err) => f.debug_tuple("Error").field(&err.to_string()).finish(),
            Failure::Postponed { reason } => {
                f.debug_struct("Postponed").field("reason", reason).finish()
            }
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Error(err) => write!(f, "{err}"),
            Failure::Postponed { reason } => write!(f, "postponed: {reason}"),
        }
    }
}

type DeferredFuture = Shared<BoxFuture<'static, Result<Value, Failure>>>;

struct DeferredInner {
    future: DeferredFuture,
}

/// 尚未结算的异步值。
///
/// 克隆共享同一个底层 future：同一个 `Deferred` 出现在多处时只分配一个标识符，
/// 底层 future 也只被驱动一次。
#[derive(Clone)]
pub struct Deferred {
    inner: Arc<DeferredInner>,
}

impl Deferred {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, Failure>> + Send + 'static,
    {
        Self {
            inner: Arc::new(DeferredInner {
                future: future.boxed().shared(),
            }),
        }
    }

    /// 立即成功的值。
    pub fn ready(value: Value) -> Self {
        Self::new(futures::future::ready(Ok(value)))
    }

    /// 立即失败的值。
    pub fn failed(failure: Failure) -> Self {
        Self::new(futures::future::ready(Err(failure)))
    }

    /// 永不结算的值，只能被中止。
    pub fn never() -> Self {
        Self::new(futures::future::pending())
    }

    /// 由外部手动结算的值。
    ///
    /// [`Settle`] 被丢弃而未结算时，值以错误结束。
    pub fn channel() -> (Settle, Deferred) {
        let (sender, receiver) = oneshot::channel();
        let deferred = Self::new(async move {
            match receiver.await {
                Ok(outcome) => outcome,
                Err(oneshot::Canceled) => Err(Failure::msg(
                    "deferred value was dropped before it settled",
                )),
            }
        });
        (Settle { sender }, deferred)
    }

    /// 已完成时返回结果。
    pub(crate) fn peek(&self) -> Option<&Result<Value, Failure>> {
        self.inner.future.peek()
    }

    pub(crate) fn future(&self) -> DeferredFuture {
        self.inner.future.clone()
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &self.peek().is_some())
            .finish()
    }
}

/// [`Deferred::channel`] 的写端。
pub struct Settle {
    sender: oneshot::Sender<Result<Value, Failure>>,
}

impl Settle {
    pub fn resolve(self, value: impl Into<Value>) {
        let _ = self.sender.send(Ok(value.into()));
    }

    pub fn reject(self, failure: impl Into<Failure>) {
        let _ = self.sender.send(Err(failure.into()));
    }

    pub fn postpone(self, reason: impl Into<String>) {
        let _ = self.sender.send(Err(Failure::postponed(reason)));
    }
}
