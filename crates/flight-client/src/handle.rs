//! 指向某个标识符的句柄。

use std::{
    fmt,
    pin::Pin,
    sync::Weak,
    task::{Context, Poll},
};

use flight_core::{FlightError, RowId};
use futures::{FutureExt, channel::oneshot};

use crate::{error::RemoteError, graph::Outcome, model::Model, response::ResponseInner};

/// 同步读取的结果。
#[derive(Debug)]
pub enum Read {
    /// 已成功结算。
    Ready(Model),
    /// 尚未结算；等待 [`Notify`] 完成后再读一次。
    Pending(Notify),
    /// 已失败。
    Failed(RemoteError),
}

/// 结算通知。条目结算（或响应被丢弃）时完成。
#[derive(Debug)]
pub struct Notify {
    receiver: oneshot::Receiver<()>,
}

impl Future for Notify {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.receiver.poll_unpin(cx).map(|_| ())
    }
}

/// 某个标识符的句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：消费者既可能想“现在能读就读，否则挂起”，也可能想注册回调或直接 `await`，
///   三种用法共享同一个结算结果；
/// - **契约 (What)**：
///   - 多个句柄指向同一标识符时观察到同一次结算，不会重新解析；
///   - 句柄只弱引用响应，响应全部被丢弃后，未结算的句柄以“连接关闭”失败；
///   - 克隆得到的句柄从头开始等待，不共享正在进行的 `await`；
/// - **风险 (Trade-offs)**：每次 [`Handle::read`] 在未结算时都会登记一个新的通知，
///   已丢弃的 [`Notify`] 在下一次登记时才被清理。
pub struct Handle {
    origin: Weak<ResponseInner>,
    id: RowId,
    waiting: Option<oneshot::Receiver<Outcome>>,
}

impl Handle {
    pub(crate) fn new(origin: Weak<ResponseInner>, id: RowId) -> Self {
        Self {
            origin,
            id,
            waiting: None,
        }
    }

    /// 句柄指向的标识符。
    pub fn id(&self) -> RowId {
        self.id
    }

    /// 非阻塞读取当前状态。
    pub fn read(&self) -> Read {
        let Some(inner) = self.origin.upgrade() else {
            return Read::Failed(RemoteError::closed());
        };
        let (sender, receiver) = oneshot::channel();
        match inner.watch(self.id, sender) {
            Some(Ok(model)) => Read::Ready(model),
            Some(Err(err)) => Read::Failed(err),
            None => Read::Pending(Notify { receiver }),
        }
    }

    /// 注册一对回调；已结算时立即在当前线程调用。
    pub fn on_settle<F, G>(&self, on_ready: F, on_failed: G)
    where
        F: FnOnce(Model) + Send + 'static,
        G: FnOnce(RemoteError) + Send + 'static,
    {
        let callback = move |outcome: Outcome| match outcome {
            Ok(model) => on_ready(model),
            Err(err) => on_failed(err),
        };
        match self.origin.upgrade() {
            Some(inner) => {
                inner.subscribe(self.id, Box::new(callback));
            }
            None => callback(Err(RemoteError::closed())),
        }
    }

    /// 读取已结算值的属性。
    ///
    /// 结构化访问只对已成功结算的值有效；在未结算（或已失败）的占位上访问属性是编程错误，
    /// 返回 [`FlightError::UnresolvedAccess`]。
    pub fn property(&self, name: &str) -> Result<Model, FlightError> {
        let unresolved = || FlightError::UnresolvedAccess {
            id: self.id,
            property: name.to_owned(),
        };
        let inner = self.origin.upgrade().ok_or_else(unresolved)?;
        match inner.outcome(self.id) {
            Some(Ok(model)) => Ok(model.project(&[name])),
            Some(Err(_)) | None => Err(unresolved()),
        }
    }

    pub(crate) fn same_target(&self, other: &Handle) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.origin, &other.origin)
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        Self::new(self.origin.clone(), self.id)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("id", &self.id).finish()
    }
}

impl Future for Handle {
    type Output = Result<Model, RemoteError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.waiting.is_none() {
            let Some(inner) = this.origin.upgrade() else {
                return Poll::Ready(Err(RemoteError::closed()));
            };
            let (sender, receiver) = oneshot::channel();
            let listener = Box::new(move |outcome: Outcome| {
                let _ = sender.send(outcome);
            });
            if let Some(outcome) = inner.subscribe(this.id, listener) {
                return Poll::Ready(outcome);
            }
            this.waiting = Some(receiver);
        }
        match this.waiting.as_mut() {
            Some(receiver) => receiver
                .poll_unpin(cx)
                .map(|outcome| outcome.unwrap_or_else(|_| Err(RemoteError::closed()))),
            None => Poll::Pending,
        }
    }
}
