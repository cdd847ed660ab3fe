//! 编码端请求与渲染流。
//!
//! ## 执行模型（How）
//! - [`Request::render`] 同步遍历根值，能立即序列化的部分直接写入输出队列；
//! - 尚未结算的 [`Deferred`] 分配标识符后进入 `FuturesUnordered`，谁先结算谁先输出，
//!   互不阻塞；
//! - 行先进入共享队列，再由 [`RenderStream`] 按顺序交给消费者；提示与中止可以从任意线程写入
//!   共享状态，通过 `AtomicWaker` 唤醒流。

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use flight_codec_row::{RowTag, encode_row, literal};
use flight_core::{
    ErrorPayload, FlightConfig, FlightError, HintCode, ModuleMetadata, PostponePayload, RowId,
    observability::targets,
};
use futures::{
    AsyncWrite, AsyncWriteExt, FutureExt, Stream, StreamExt, future::BoxFuture,
    stream::FuturesUnordered,
};
use futures_util::task::AtomicWaker;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::{
    client_reference::ClientReference,
    digest::{ErrorReporter, OnError},
    hints::{HintTable, Hints},
    manifest::ClientManifest,
    value::{Deferred, Failure, Value},
};

/// 请求参数。
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub config: FlightConfig,
    pub on_error: Option<OnError>,
}

impl RequestOptions {
    pub fn with_config(mut self, config: FlightConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置错误回调，返回值作为摘要发送给解码端。
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&anyhow::Error) -> Option<String> + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Status {
    Open,
    Closed,
}

struct RequestState {
    next_id: Option<RowId>,
    completed: VecDeque<Bytes>,
    hints: HintTable,
    abort: Option<String>,
    status: Status,
}

/// 请求内跨线程共享的部分：标识符计数器、输出队列、提示表与中止信号。
pub(crate) struct RequestShared {
    state: Mutex<RequestState>,
    waker: AtomicWaker,
}

impl RequestShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(RequestState {
                next_id: RowId::ROOT.next().ok(),
                completed: VecDeque::new(),
                hints: HintTable::default(),
                abort: None,
                status: Status::Open,
            }),
            waker: AtomicWaker::new(),
        }
    }

    fn allocate(&self) -> Result<RowId, FlightError> {
        let mut state = self.state.lock();
        let id = state.next_id.ok_or(FlightError::IdExhausted)?;
        state.next_id = id.next().ok();
        Ok(id)
    }

    fn push(&self, row: Bytes) {
        self.state.lock().completed.push_back(row);
        self.waker.wake();
    }

    fn pop(&self) -> Option<Bytes> {
        self.state.lock().completed.pop_front()
    }

    fn take_abort(&self) -> Option<String> {
        self.state.lock().abort.take()
    }

    fn close(&self) {
        self.state.lock().status = Status::Closed;
    }

    fn is_closed(&self) -> bool {
        self.state.lock().status == Status::Closed
    }

    pub(crate) fn emit_hint(&self, code: HintCode, key: String, payload: &Json) -> bool {
        let mut state = self.state.lock();
        if state.status == Status::Closed || !state.hints.insert(key) {
            return false;
        }
        let Some(id) = state.next_id else {
            tracing::error!(target: targets::SERVER, "hint dropped: row id space exhausted");
            return false;
        };
        state.next_id = id.next().ok();
        let text = format!("{}{payload}", code.as_char());
        match encode_row(id, RowTag::Hint, &text) {
            Ok(row) => state.completed.push_back(row),
            Err(err) => {
                tracing::error!(target: targets::SERVER, %id, error = %err, "hint dropped");
                return false;
            }
        }
        drop(state);
        tracing::debug!(target: targets::SERVER, %id, code = %code.as_char(), "hint emitted");
        self.waker.wake();
        true
    }
}

/// 一次编码请求。
///
/// # 教案式说明
/// - **意图 (Why)**：生产者 future 往往需要在渲染开始前拿到 [`Hints`]，
///   因此构造与渲染拆成两步：先 [`Request::new`]，再 [`Request::render`]；
/// - **契约 (What)**：标识符 `1` 预留给根值；每个请求拥有独立的标识符空间、去重表与提示表；
/// - **风险 (Trade-offs)**：清单查询在遍历时同步执行，慢清单会拖慢首行输出。
pub struct Request {
    shared: Arc<RequestShared>,
    manifest: Arc<dyn ClientManifest>,
    reporter: ErrorReporter,
}

impl Request {
    pub fn new(manifest: Arc<dyn ClientManifest>, options: RequestOptions) -> Self {
        Self {
            shared: Arc::new(RequestShared::new()),
            manifest,
            reporter: ErrorReporter::new(options.on_error, options.config.mode),
        }
    }

    pub fn hints(&self) -> Hints {
        Hints::new(Arc::clone(&self.shared))
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 遍历根值并返回输出流。
    pub fn render(self, root: Value) -> RenderStream {
        let mut encoder = Encoder {
            shared: self.shared,
            manifest: self.manifest,
            reporter: self.reporter,
            client_refs: HashMap::new(),
            whole_modules: HashMap::new(),
            symbols: HashMap::new(),
            outlined: HashMap::new(),
            deferred: HashMap::new(),
            pending: BTreeSet::new(),
            tasks: FuturesUnordered::new(),
        };
        tracing::debug!(target: targets::SERVER, "render started");
        match &root {
            Value::Deferred(deferred) => {
                encoder
                    .deferred
                    .insert(deferred.identity(), (RowId::ROOT, deferred.clone()));
                encoder.schedule(RowId::ROOT, deferred);
            }
            other => encoder.model_row(RowId::ROOT, other),
        }
        RenderStream { encoder }
    }
}

/// 一步完成构造与渲染。
pub fn render(root: Value, manifest: Arc<dyn ClientManifest>, options: RequestOptions) -> RenderStream {
    Request::new(manifest, options).render(root)
}

/// 中止入口，可跨线程克隆使用。
#[derive(Clone)]
pub struct AbortHandle {
    shared: Arc<RequestShared>,
}

impl AbortHandle {
    /// 请求中止；流已结束或已被中止时返回 `false`。
    ///
    /// 中止在流下一次被轮询时生效：原因上报一次，每个未结算的标识符各输出一行错误，
    /// 在途的生产者 future 被丢弃。
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        {
            let mut state = self.shared.state.lock();
            if state.status == Status::Closed || state.abort.is_some() {
                return false;
            }
            state.abort = Some(reason.into());
        }
        self.shared.waker.wake();
        true
    }
}

type Task = BoxFuture<'static, (RowId, Result<Value, Failure>)>;

struct Encoder {
    shared: Arc<RequestShared>,
    manifest: Arc<dyn ClientManifest>,
    reporter: ErrorReporter,
    client_refs: HashMap<(Arc<str>, String), String>,
    whole_modules: HashMap<Arc<str>, RowId>,
    symbols: HashMap<String, RowId>,
    // 持有 Arc，保证指针身份在流内不被复用
    outlined: HashMap<usize, (RowId, Arc<Value>)>,
    deferred: HashMap<usize, (RowId, Deferred)>,
    pending: BTreeSet<RowId>,
    tasks: FuturesUnordered<Task>,
}

impl Encoder {
    fn model_row(&mut self, id: RowId, value: &Value) {
        match self.to_json(value) {
            Ok(json) => self.write(id, RowTag::Model, &json.to_string()),
            Err(err) => {
                let payload = self.reporter.report(&anyhow::Error::new(err));
                self.write_json(id, RowTag::Error, &payload);
            }
        }
    }

    fn to_json(&mut self, value: &Value) -> Result<Json, FlightError> {
        let json = match value {
            Value::Undefined => Json::from(literal::UNDEFINED),
            Value::Null => Json::Null,
            Value::Bool(flag) => Json::Bool(*flag),
            Value::Number(number) => literal::number(*number),
            Value::BigInt(digits) => Json::String(literal::bigint(digits)?),
            Value::String(text) => Json::String(literal::escape_string(text).into_owned()),
            Value::Array(items) => Json::Array(
                items
                    .iter()
                    .map(|item| self.to_json(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(entries) => Json::Object(self.entries_to_json(entries)?),
            Value::Element(element) => {
                let ty = self.to_json(&element.ty)?;
                let key = element
                    .key
                    .as_ref()
                    .map_or(Json::Null, |key| Json::String(key.clone()));
                let props = self.entries_to_json(&element.props)?;
                Json::Array(vec![
                    Json::from(literal::ELEMENT_MARKER),
                    ty,
                    key,
                    Json::Object(props),
                ])
            }
            Value::Symbol(name) => Json::String(literal::reference(self.symbol(name)?)),
            Value::Client(reference) => Json::String(self.client_reference(reference)?),
            Value::Shared(value) => Json::String(literal::reference(self.outline(value)?)),
            Value::Deferred(deferred) => Json::String(literal::reference(self.defer(deferred)?)),
            Value::Promise(deferred) => {
                Json::String(literal::promise_reference(self.defer(deferred)?))
            }
        };
        Ok(json)
    }

    fn entries_to_json(
        &mut self,
        entries: &[(String, Value)],
    ) -> Result<Map<String, Json>, FlightError> {
        let mut map = Map::with_capacity(entries.len());
        for (key, value) in entries {
            let json = self.to_json(value)?;
            map.insert(key.clone(), json);
        }
        Ok(map)
    }

    fn symbol(&mut self, name: &str) -> Result<RowId, FlightError> {
        if let Some(id) = self.symbols.get(name) {
            return Ok(*id);
        }
        let id = self.shared.allocate()?;
        self.symbols.insert(name.to_owned(), id);
        self.write_json(id, RowTag::Symbol, &name);
        Ok(id)
    }

    fn outline(&mut self, value: &Arc<Value>) -> Result<RowId, FlightError> {
        let key = Arc::as_ptr(value) as usize;
        if let Some((id, _)) = self.outlined.get(&key) {
            return Ok(*id);
        }
        let id = self.shared.allocate()?;
        self.outlined.insert(key, (id, Arc::clone(value)));
        self.model_row(id, value);
        Ok(id)
    }

    fn defer(&mut self, deferred: &Deferred) -> Result<RowId, FlightError> {
        let key = deferred.identity();
        if let Some((id, _)) = self.deferred.get(&key) {
            return Ok(*id);
        }
        let id = self.shared.allocate()?;
        self.deferred.insert(key, (id, deferred.clone()));
        self.schedule(id, deferred);
        Ok(id)
    }

    fn schedule(&mut self, id: RowId, deferred: &Deferred) {
        if let Some(outcome) = deferred.peek() {
            let outcome = outcome.clone();
            self.settle(id, outcome);
            return;
        }
        self.pending.insert(id);
        self.tasks
            .push(deferred.future().map(move |outcome| (id, outcome)).boxed());
    }

    fn settle(&mut self, id: RowId, outcome: Result<Value, Failure>) {
        self.pending.remove(&id);
        match outcome {
            Ok(value) => self.model_row(id, &value),
            Err(Failure::Error(err)) => {
                let payload = self.reporter.report(&err);
                self.write_json(id, RowTag::Error, &payload);
            }
            Err(Failure::Postponed { reason }) => {
                tracing::debug!(target: targets::SERVER, %id, "value postponed");
                let payload = PostponePayload {
                    reason: self.reporter.mode().is_development().then_some(reason),
                };
                self.write_json(id, RowTag::Postpone, &payload);
            }
        }
    }

    /// 客户端引用只查一次清单；结果（成功或失败）都以引用令牌缓存。
    fn client_reference(&mut self, reference: &ClientReference) -> Result<String, FlightError> {
        let key = reference.dedup_key();
        if let Some(token) = self.client_refs.get(&key) {
            return Ok(token.clone());
        }
        let token = match self.manifest.resolve(reference) {
            Ok(metadata) if metadata.is_whole_module() => {
                let module_id = match self.whole_modules.get(&key.0) {
                    Some(id) => *id,
                    None => {
                        let id = self.shared.allocate()?;
                        self.whole_modules.insert(Arc::clone(&key.0), id);
                        self.write_json(id, RowTag::Module, &metadata);
                        id
                    }
                };
                if reference.is_whole_module() {
                    literal::reference(module_id)
                } else {
                    let export = match reference.export_name() {
                        "" => "default",
                        name => name,
                    };
                    literal::path_reference(module_id, &[export])?
                }
            }
            Ok(metadata) => {
                let id = self.shared.allocate()?;
                self.write_json(id, RowTag::Module, &metadata);
                literal::reference(id)
            }
            Err(err) => {
                let id = self.shared.allocate()?;
                let payload = self.reporter.report(&err);
                self.write_json(id, RowTag::Error, &payload);
                literal::reference(id)
            }
        };
        self.client_refs.insert(key, token.clone());
        Ok(token)
    }

    fn abort(&mut self, reason: String) {
        tracing::info!(
            target: targets::SERVER,
            reason = %reason,
            pending = self.pending.len(),
            "request aborted"
        );
        self.tasks = FuturesUnordered::new();
        if self.pending.is_empty() {
            return;
        }
        let payload: ErrorPayload = self.reporter.report(&anyhow::Error::msg(reason));
        for id in std::mem::take(&mut self.pending) {
            self.write_json(id, RowTag::Error, &payload);
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, id: RowId, tag: RowTag, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(text) => self.write(id, tag, &text),
            Err(err) => {
                tracing::error!(target: targets::SERVER, %id, error = %err, "row dropped");
            }
        }
    }

    fn write(&self, id: RowId, tag: RowTag, payload: &str) {
        match encode_row(id, tag, payload) {
            Ok(row) => {
                tracing::debug!(target: targets::SERVER, %id, ?tag, len = row.len(), "row emitted");
                self.shared.push(row);
            }
            Err(err) => {
                tracing::error!(target: targets::SERVER, %id, error = %err, "row dropped");
            }
        }
    }
}

/// 渲染输出流，逐行产出字节块。
///
/// 所有标识符结算（或请求被中止）且队列排空后结束。
pub struct RenderStream {
    encoder: Encoder,
}

impl RenderStream {
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            shared: Arc::clone(&self.encoder.shared),
        }
    }

    pub fn hints(&self) -> Hints {
        Hints::new(Arc::clone(&self.encoder.shared))
    }

    /// 把整条流写入 `writer`，结束时冲刷并关闭写端。
    pub async fn pipe<W>(mut self, mut writer: W) -> Result<(), FlightError>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(row) = self.next().await {
            writer.write_all(&row).await.map_err(sink_error)?;
        }
        writer.flush().await.map_err(sink_error)?;
        writer.close().await.map_err(sink_error)
    }
}

fn sink_error(err: std::io::Error) -> FlightError {
    FlightError::Sink {
        reason: err.to_string(),
    }
}

impl Stream for RenderStream {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let encoder = &mut self.get_mut().encoder;
        encoder.shared.waker.register(cx.waker());
        loop {
            if let Some(reason) = encoder.shared.take_abort() {
                encoder.abort(reason);
                encoder.shared.close();
            }
            if let Some(row) = encoder.shared.pop() {
                return Poll::Ready(Some(row));
            }
            if encoder.shared.is_closed() {
                return Poll::Ready(None);
            }
            match encoder.tasks.poll_next_unpin(cx) {
                Poll::Ready(Some((id, outcome))) => encoder.settle(id, outcome),
                Poll::Ready(None) => {
                    tracing::debug!(target: targets::SERVER, "render complete");
                    encoder.shared.close();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
