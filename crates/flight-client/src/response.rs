//! 解码端响应：驱动行解码器与引用图。

use std::{
    fmt,
    pin::{Pin, pin},
    sync::Arc,
    task::{Context, Poll},
};

use flight_codec_row::{Row, RowDecoder, RowTag};
use flight_core::{
    ErrorPayload, FlightConfig, FlightError, ModuleMetadata, PostponePayload, RowId,
    observability::targets,
};
use futures::{
    AsyncRead, FutureExt, Stream, StreamExt, channel::oneshot, future::BoxFuture,
    future::poll_fn, stream::FuturesUnordered,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::{
    error::RemoteError,
    graph::{Fired, Listener, Outcome, ReferenceGraph},
    handle::Handle,
    hints::{Hint, HintDispatcher},
    model::Model,
    resolver::{ModuleResolver, NoModules, Resolution},
};

const READ_CHUNK: usize = 8 * 1024;

/// 响应参数。
#[derive(Clone)]
pub struct ResponseOptions {
    /// 运行模式与单行预算。
    pub config: FlightConfig,
    /// 模块解析能力，默认 [`NoModules`]。
    pub resolver: Arc<dyn ModuleResolver>,
    /// 提示接收方；缺省时提示只记录日志。
    pub hints: Option<Arc<dyn HintDispatcher>>,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self {
            config: FlightConfig::default(),
            resolver: Arc::new(NoModules),
            hints: None,
        }
    }
}

impl ResponseOptions {
    /// 替换配置。
    pub fn with_config(mut self, config: FlightConfig) -> Self {
        self.config = config;
        self
    }

    /// 注入模块解析能力。
    pub fn with_resolver(mut self, resolver: impl ModuleResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// 注入提示接收方。
    pub fn with_hints(mut self, dispatcher: impl HintDispatcher + 'static) -> Self {
        self.hints = Some(Arc::new(dispatcher));
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Status {
    Open,
    Closed,
}

struct ResponseState {
    graph: ReferenceGraph,
    decoder: RowDecoder,
    status: Status,
}

type Load = BoxFuture<'static, (RowId, Outcome)>;

/// 应用一批行后需要在锁外完成的工作。
#[derive(Default)]
struct Effects {
    fired: Fired,
    hints: Vec<Hint>,
    modules: Vec<(RowId, ModuleMetadata)>,
}

pub(crate) struct ResponseInner {
    state: Mutex<ResponseState>,
    loads: Mutex<FuturesUnordered<Load>>,
    resolver: Arc<dyn ModuleResolver>,
    hints: Option<Arc<dyn HintDispatcher>>,
}

impl ResponseInner {
    /// 登记回调；已结算时立即调用回调并返回结果。
    pub(crate) fn subscribe(&self, id: RowId, listener: Listener) -> Option<Outcome> {
        let settled = self.state.lock().graph.subscribe(id, listener);
        settled.map(|(listener, outcome)| {
            listener(outcome.clone());
            outcome
        })
    }

    /// 登记一次性结算通知；已结算时返回结果。
    pub(crate) fn watch(&self, id: RowId, watcher: oneshot::Sender<()>) -> Option<Outcome> {
        self.state.lock().graph.watch(id, watcher)
    }

    pub(crate) fn outcome(&self, id: RowId) -> Option<Outcome> {
        self.state.lock().graph.outcome(id)
    }

    fn finish(&self, effects: Effects) {
        let Effects {
            mut fired,
            hints,
            modules,
        } = effects;
        for hint in hints {
            match &self.hints {
                Some(dispatcher) => dispatcher.dispatch(hint),
                None => tracing::debug!(target: targets::CLIENT, ?hint, "hint ignored"),
            }
        }
        for (id, metadata) in modules {
            match self.resolver.resolve(&metadata) {
                Resolution::Ready(model) => self.state.lock().graph.settle(id, Ok(model), &mut fired),
                Resolution::Failed(err) => {
                    tracing::warn!(target: targets::CLIENT, %id, module = %metadata.id, error = %err, "module resolution failed");
                    self.state.lock().graph.settle(id, Err(err), &mut fired);
                }
                Resolution::Pending(load) => {
                    tracing::debug!(target: targets::CLIENT, %id, module = %metadata.id, "module loading");
                    self.loads
                        .lock()
                        .push(load.map(move |outcome| (id, outcome)).boxed());
                }
            }
        }
        fire(fired);
    }

    /// 推进在途的模块加载；全部完成时返回 `Ready`。
    fn poll_loads(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut settled = Vec::new();
        let poll = {
            let mut loads = self.loads.lock();
            loop {
                match loads.poll_next_unpin(cx) {
                    Poll::Ready(Some(done)) => settled.push(done),
                    Poll::Ready(None) => break Poll::Ready(()),
                    Poll::Pending => break Poll::Pending,
                }
            }
        };
        if !settled.is_empty() {
            let mut fired = Fired::new();
            {
                let mut state = self.state.lock();
                for (id, outcome) in settled {
                    if let Err(err) = &outcome {
                        tracing::warn!(target: targets::CLIENT, %id, error = %err, "module load failed");
                    }
                    state.graph.settle(id, outcome, &mut fired);
                }
            }
            fire(fired);
        }
        poll
    }
}

fn fire(fired: Fired) {
    for (listeners, outcome) in fired {
        for listener in listeners {
            listener(outcome.clone());
        }
    }
}

/// 一条 Flight 流的解码端。
///
/// # 教案式说明
/// - **意图 (Why)**：字节以任意边界到达，行按到达顺序同步应用；消费者通过 [`Handle`]
///   在任意时刻读取或等待某个标识符的值；
/// - **逻辑 (How)**：
///   1. [`Response::process_chunk`] 在锁内解码并应用所有完整行，把回调、提示与模块解析留到锁外；
///   2. 模块解析能力返回的未决加载进入 `FuturesUnordered`，由 [`Response::consume`]
///      或 [`Response::flush_modules`] 推进；
///   3. 协议违例立即以错误返回，同时以该违例结束整条流；
/// - **契约 (What)**：
///   - 输入结束（[`Response::close`]）时，仍依赖流数据的标识符以“连接关闭”失败，
///     只等待在途模块加载的标识符随加载结算；
///   - [`Response::abort`] 让所有未结算的标识符以给定原因失败；
///   - 克隆共享同一个响应；
/// - **风险 (Trade-offs)**：模块加载 future 在内部锁下被轮询，不能在其中回调本响应。
#[derive(Clone)]
pub struct Response {
    inner: Arc<ResponseInner>,
}

impl Response {
    /// 构造一个尚未收到任何字节的响应。
    pub fn new(options: ResponseOptions) -> Self {
        let decoder = RowDecoder::with_max_row_bytes(options.config.max_row_bytes);
        let inner = Arc::new_cyclic(|origin| ResponseInner {
            state: Mutex::new(ResponseState {
                graph: ReferenceGraph::new(origin.clone()),
                decoder,
                status: Status::Open,
            }),
            loads: Mutex::new(FuturesUnordered::new()),
            resolver: options.resolver,
            hints: options.hints,
        });
        Self { inner }
    }

    /// 根值（标识符 1）的句柄。
    pub fn root(&self) -> Handle {
        self.handle(RowId::ROOT)
    }

    /// 任意标识符的句柄；标识符无需已出现在流中。
    pub fn handle(&self, id: RowId) -> Handle {
        Handle::new(Arc::downgrade(&self.inner), id)
    }

    /// 是否已关闭、中止或因协议违例结束。
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().status == Status::Closed
    }

    /// 喂入一块字节并应用其中所有完整的行。
    pub fn process_chunk(&self, chunk: &[u8]) -> Result<(), FlightError> {
        let mut effects = Effects::default();
        let result = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.status == Status::Closed {
                return Err(FlightError::Closed);
            }
            let result = apply_chunk(state, chunk, &mut effects);
            if let Err(err) = &result {
                tracing::warn!(
                    target: targets::CLIENT,
                    error = %err,
                    code = err.code(),
                    "protocol violation; closing response"
                );
                state
                    .graph
                    .abort(RemoteError::protocol(err), &mut effects.fired);
                state.status = Status::Closed;
            }
            result
        };
        self.inner.finish(effects);
        result
    }

    /// 输入结束。
    ///
    /// 末尾残留半行时返回 [`FlightError::TruncatedRow`]，并以该违例结束所有未结算的标识符。
    pub fn close(&self) -> Result<(), FlightError> {
        let mut fired = Fired::new();
        let result = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.status == Status::Closed {
                return Ok(());
            }
            state.status = Status::Closed;
            let result = state.decoder.finish();
            match &result {
                Ok(()) => state.graph.close(RemoteError::closed(), &mut fired),
                Err(err) => {
                    tracing::warn!(target: targets::CLIENT, error = %err, "stream truncated");
                    state.graph.abort(RemoteError::protocol(err), &mut fired);
                }
            }
            tracing::info!(
                target: targets::CLIENT,
                waiting_on_modules = state.graph.unsettled(),
                "response closed"
            );
            result
        };
        fire(fired);
        result
    }

    /// 中止：所有未结算的标识符以 `reason` 失败，在途模块加载被丢弃。
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut fired = Fired::new();
        {
            let mut state = self.inner.state.lock();
            state.status = Status::Closed;
            state
                .graph
                .abort(RemoteError::aborted(reason.clone()), &mut fired);
        }
        *self.inner.loads.lock() = FuturesUnordered::new();
        tracing::info!(target: targets::CLIENT, reason = %reason, "response aborted");
        fire(fired);
    }

    /// 等待所有在途模块加载结算。
    pub async fn flush_modules(&self) {
        poll_fn(|cx| self.inner.poll_loads(cx)).await
    }

    /// 读完整个字节流，随后关闭响应并等待在途模块加载。
    pub async fn consume<S, B>(&self, source: S) -> Result<(), FlightError>
    where
        S: Stream<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut source = pin!(source);
        loop {
            let next = poll_fn(|cx| {
                let _ = self.inner.poll_loads(cx);
                source.as_mut().poll_next(cx)
            })
            .await;
            match next {
                Some(chunk) => self.process_chunk(chunk.as_ref())?,
                None => break,
            }
        }
        self.close()?;
        self.flush_modules().await;
        Ok(())
    }

    /// 与 [`Response::consume`] 相同，输入为 `AsyncRead`。读取失败时中止响应。
    pub async fn consume_reader<R>(&self, mut reader: R) -> Result<(), FlightError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = vec![0_u8; READ_CHUNK];
        loop {
            let read = poll_fn(|cx| {
                let _ = self.inner.poll_loads(cx);
                Pin::new(&mut reader).poll_read(cx, &mut buffer)
            })
            .await;
            match read {
                Ok(0) => break,
                Ok(len) => self.process_chunk(&buffer[..len])?,
                Err(err) => {
                    self.abort(err.to_string());
                    return Err(FlightError::Source {
                        reason: err.to_string(),
                    });
                }
            }
        }
        self.close()?;
        self.flush_modules().await;
        Ok(())
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn apply_chunk(
    state: &mut ResponseState,
    chunk: &[u8],
    effects: &mut Effects,
) -> Result<(), FlightError> {
    state.decoder.push(chunk);
    while let Some(row) = state.decoder.next_row()? {
        apply_row(&mut state.graph, &row, effects)?;
    }
    Ok(())
}

fn apply_row(graph: &mut ReferenceGraph, row: &Row, effects: &mut Effects) -> Result<(), FlightError> {
    let id = row.id;
    tracing::debug!(target: targets::CLIENT, %id, tag = ?row.tag, "row applied");
    match row.tag {
        RowTag::Model => {
            let raw: Json = parse(row)?;
            graph.resolve_model(id, raw, &mut effects.fired)
        }
        RowTag::Module => {
            let metadata: ModuleMetadata = parse(row)?;
            graph.define_pending(id)?;
            effects.modules.push((id, metadata));
            Ok(())
        }
        RowTag::Hint => {
            effects.hints.push(Hint::parse(row.payload_str()?)?);
            Ok(())
        }
        RowTag::Error => {
            let payload: ErrorPayload = parse(row)?;
            graph.reject(id, RemoteError::from_payload(payload), &mut effects.fired)
        }
        RowTag::Symbol => {
            let name: String = parse(row)?;
            graph.define_value(id, Model::Symbol(name), &mut effects.fired)
        }
        RowTag::Postpone => {
            let payload: PostponePayload = parse(row)?;
            graph.reject(id, RemoteError::postponed(payload.reason), &mut effects.fired)
        }
    }
}

fn parse<T: DeserializeOwned>(row: &Row) -> Result<T, FlightError> {
    serde_json::from_slice(&row.payload).map_err(|err| FlightError::InvalidPayload {
        id: row.id,
        reason: err.to_string(),
    })
}
