//! 引用图：标识符到占位或值的映射。
//!
//! ## 状态机（What）
//! ```text
//! Pending ──模型行(依赖均已结算)──▶ Resolved
//!    │  └──模型行(有未结算依赖)──▶ Blocked ──依赖全部成功──▶ Resolved
//!    │                               └──────任一依赖失败────▶ Errored
//!    └──错误行 / 暂缓行 / 关闭 / 中止────────────────────────▶ Errored
//! ```
//! - 结算只发生一次，之后状态不可变；
//! - `defined` 记录定义行是否到达，第二次定义视为协议违例；
//! - `Blocked` 条目保存原始 JSON 与仍在等待的标识符集合，依赖结算时递减，
//!   集合清空后再统一物化。

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Weak,
};

use flight_codec_row::literal::{self, Token};
use flight_core::{FlightError, RowId, observability::targets};
use futures::channel::oneshot;
use serde_json::Value as Json;

use crate::{
    error::RemoteError,
    handle::Handle,
    model::{ElementModel, Model},
    response::ResponseInner,
};

pub(crate) type Outcome = Result<Model, RemoteError>;

/// 结算回调；在图的锁释放之后调用。
pub(crate) type Listener = Box<dyn FnOnce(Outcome) + Send>;

/// 一批待调用的回调及其结果。
pub(crate) type Fired = Vec<(Vec<Listener>, Outcome)>;

enum EntryState {
    Pending,
    Blocked { raw: Json, waiting: HashSet<RowId> },
    Resolved(Model),
    Errored(RemoteError),
}

struct Entry {
    state: EntryState,
    defined: bool,
    dependents: HashSet<RowId>,
    listeners: Vec<Listener>,
    /// 同步读取登记的结算通知；接收端已丢弃的在登记新通知时清除。
    watchers: Vec<oneshot::Sender<()>>,
}

impl Entry {
    fn new(state: EntryState) -> Self {
        Self {
            state,
            defined: false,
            dependents: HashSet::new(),
            listeners: Vec::new(),
            watchers: Vec::new(),
        }
    }

    fn outcome(&self) -> Option<Outcome> {
        match &self.state {
            EntryState::Resolved(model) => Some(Ok(model.clone())),
            EntryState::Errored(err) => Some(Err(err.clone())),
            EntryState::Pending | EntryState::Blocked { .. } => None,
        }
    }

    fn is_settled(&self) -> bool {
        matches!(
            self.state,
            EntryState::Resolved(_) | EntryState::Errored(_)
        )
    }
}

/// 单个响应独占的引用图。
///
/// # 教案式说明
/// - **意图 (Why)**：模型行可以引用尚未到达的标识符，图负责记下“谁在等谁”，
///   并在依赖到达时级联结算；
/// - **逻辑 (How)**：定义行先整体扫描一遍令牌，语法错误在修改图之前返回；
///   未结算的依赖登记为等待边，登记前沿等待边做深度优先搜索，发现环即判为协议违例；
///   结算以工作队列推进，避免深层依赖链造成递归过深；
/// - **契约 (What)**：所有修改方法把需要触发的回调追加到 `fired`，由调用方在释放锁后执行；
/// - **风险 (Trade-offs)**：物化会克隆被引用的值，被多处引用的大子树会被复制多次。
pub(crate) struct ReferenceGraph {
    entries: HashMap<RowId, Entry>,
    origin: Weak<ResponseInner>,
    terminal: Option<RemoteError>,
}

impl ReferenceGraph {
    pub(crate) fn new(origin: Weak<ResponseInner>) -> Self {
        Self {
            entries: HashMap::new(),
            origin,
            terminal: None,
        }
    }

    fn entry(&mut self, id: RowId) -> &mut Entry {
        let terminal = &self.terminal;
        self.entries.entry(id).or_insert_with(|| match terminal {
            Some(err) => Entry::new(EntryState::Errored(err.clone())),
            None => Entry::new(EntryState::Pending),
        })
    }

    /// 当前结果；未结算返回 `None`。首次访问会创建占位。
    pub(crate) fn outcome(&mut self, id: RowId) -> Option<Outcome> {
        self.entry(id).outcome()
    }

    /// 登记回调；已结算时把回调与结果交还调用方立即执行。
    pub(crate) fn subscribe(&mut self, id: RowId, listener: Listener) -> Option<(Listener, Outcome)> {
        let entry = self.entry(id);
        match entry.outcome() {
            Some(outcome) => Some((listener, outcome)),
            None => {
                entry.listeners.push(listener);
                None
            }
        }
    }

    /// 登记结算通知；已结算时丢弃通知并返回结果。
    pub(crate) fn watch(&mut self, id: RowId, watcher: oneshot::Sender<()>) -> Option<Outcome> {
        let entry = self.entry(id);
        let outcome = entry.outcome();
        if outcome.is_none() {
            entry.watchers.retain(|watcher| !watcher.is_canceled());
            entry.watchers.push(watcher);
        }
        outcome
    }

    fn define(&mut self, id: RowId) -> Result<(), FlightError> {
        let entry = self.entry(id);
        if entry.defined {
            return Err(FlightError::Redefinition { id });
        }
        entry.defined = true;
        Ok(())
    }

    /// 标记定义行已到达但值由外部稍后提供（模块加载）。
    pub(crate) fn define_pending(&mut self, id: RowId) -> Result<(), FlightError> {
        self.define(id)
    }

    /// 定义并立即结算为给定值。
    pub(crate) fn define_value(
        &mut self,
        id: RowId,
        model: Model,
        fired: &mut Fired,
    ) -> Result<(), FlightError> {
        self.define(id)?;
        self.settle(id, Ok(model), fired);
        Ok(())
    }

    /// 定义并结算为失败，依赖它的条目级联失败。
    pub(crate) fn reject(
        &mut self,
        id: RowId,
        err: RemoteError,
        fired: &mut Fired,
    ) -> Result<(), FlightError> {
        self.define(id)?;
        self.settle(id, Err(err), fired);
        Ok(())
    }

    /// 应用一个模型行。
    pub(crate) fn resolve_model(
        &mut self,
        id: RowId,
        raw: Json,
        fired: &mut Fired,
    ) -> Result<(), FlightError> {
        let mut targets = Vec::new();
        scan(&raw, &mut targets)?;
        self.define(id)?;

        let mut waiting = HashSet::new();
        for target in targets {
            match self.entry(target).outcome() {
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    self.settle(id, Err(err), fired);
                    return Ok(());
                }
                None => {
                    waiting.insert(target);
                }
            }
        }

        if waiting.is_empty() {
            let outcome = self.materialize(&raw).map_err(|err| RemoteError::protocol(&err));
            self.settle(id, outcome, fired);
            return Ok(());
        }

        for target in &waiting {
            if *target == id || self.waits_on(*target, id) {
                return Err(FlightError::CyclicReference {
                    id,
                    target: *target,
                });
            }
        }
        for target in &waiting {
            self.entry(*target).dependents.insert(id);
        }
        tracing::trace!(target: targets::CLIENT, %id, waiting = waiting.len(), "row blocked");
        self.entry(id).state = EntryState::Blocked { raw, waiting };
        Ok(())
    }

    /// 沿等待边判断 `from` 是否（间接）等待 `to`。
    fn waits_on(&self, from: RowId, to: RowId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(Entry {
                state: EntryState::Blocked { waiting, .. },
                ..
            }) = self.entries.get(&current)
            {
                stack.extend(waiting.iter().copied());
            }
        }
        false
    }

    /// 结算一个条目并级联到依赖它的条目。已结算的条目保持不变。
    pub(crate) fn settle(&mut self, id: RowId, outcome: Outcome, fired: &mut Fired) {
        let mut queue = VecDeque::from([(id, outcome)]);
        while let Some((id, outcome)) = queue.pop_front() {
            let entry = self.entry(id);
            if entry.is_settled() {
                continue;
            }
            entry.state = match &outcome {
                Ok(model) => EntryState::Resolved(model.clone()),
                Err(err) => EntryState::Errored(err.clone()),
            };
            let listeners = std::mem::take(&mut entry.listeners);
            let dependents = std::mem::take(&mut entry.dependents);
            for watcher in entry.watchers.drain(..) {
                let _ = watcher.send(());
            }
            tracing::trace!(
                target: targets::CLIENT,
                %id,
                ok = outcome.is_ok(),
                listeners = listeners.len(),
                dependents = dependents.len(),
                "row settled"
            );

            for dependent in dependents {
                let Some(entry) = self.entries.get_mut(&dependent) else {
                    continue;
                };
                let EntryState::Blocked { waiting, .. } = &mut entry.state else {
                    continue;
                };
                match &outcome {
                    Err(err) => queue.push_back((dependent, Err(err.clone()))),
                    Ok(_) => {
                        waiting.remove(&id);
                        if waiting.is_empty() {
                            let EntryState::Blocked { raw, .. } =
                                std::mem::replace(&mut entry.state, EntryState::Pending)
                            else {
                                continue;
                            };
                            let unblocked = self
                                .materialize(&raw)
                                .map_err(|err| RemoteError::protocol(&err));
                            queue.push_back((dependent, unblocked));
                        }
                    }
                }
            }
            if !listeners.is_empty() {
                fired.push((listeners, outcome));
            }
        }
    }

    /// 流结束：尚未收到定义行的条目失败，并级联到等待它们的条目。
    /// 已定义但仍在等待模块加载的条目不受影响。
    pub(crate) fn close(&mut self, reason: RemoteError, fired: &mut Fired) {
        let undefined: Vec<RowId> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.defined && !entry.is_settled())
            .map(|(id, _)| *id)
            .collect();
        for id in undefined {
            self.settle(id, Err(reason.clone()), fired);
        }
        self.terminal = Some(reason);
    }

    /// 中止：所有未结算的条目以 `reason` 失败。
    pub(crate) fn abort(&mut self, reason: RemoteError, fired: &mut Fired) {
        let unsettled: Vec<RowId> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_settled())
            .map(|(id, _)| *id)
            .collect();
        for id in unsettled {
            self.settle(id, Err(reason.clone()), fired);
        }
        self.terminal = Some(reason);
    }

    /// 尚未结算的条目数。
    pub(crate) fn unsettled(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| !entry.is_settled())
            .count()
    }

    fn resolved(&self, id: RowId) -> Model {
        match self.entries.get(&id).map(|entry| &entry.state) {
            Some(EntryState::Resolved(model)) => model.clone(),
            _ => Model::Undefined,
        }
    }

    /// 把原始 JSON 物化为 [`Model`]；调用前所有阻塞引用都已结算。
    fn materialize(&self, raw: &Json) -> Result<Model, FlightError> {
        let model = match raw {
            Json::Null => Model::Null,
            Json::Bool(flag) => Model::Bool(*flag),
            Json::Number(number) => Model::Number(number.as_f64().unwrap_or(f64::NAN)),
            Json::String(text) => match literal::parse_token(text)? {
                Token::Text(text) => Model::String(text.into_owned()),
                Token::Reference { id, path } => self.resolved(id).project(&path),
                Token::Promise(id) => Model::Promise(Handle::new(self.origin.clone(), id)),
                Token::Undefined => Model::Undefined,
                Token::Number(number) => Model::Number(number),
                Token::BigInt(digits) => Model::BigInt(digits.to_owned()),
            },
            Json::Array(items) => match element_parts(items) {
                Some((ty, key, props)) => Model::from(ElementModel {
                    ty: self.materialize(ty)?,
                    key: key.map(str::to_owned),
                    props: self.materialize_entries(props)?,
                }),
                None => Model::Array(
                    items
                        .iter()
                        .map(|item| self.materialize(item))
                        .collect::<Result<_, _>>()?,
                ),
            },
            Json::Object(map) => Model::Object(self.materialize_entries(map)?),
        };
        Ok(model)
    }

    fn materialize_entries(
        &self,
        map: &serde_json::Map<String, Json>,
    ) -> Result<Vec<(String, Model)>, FlightError> {
        map.iter()
            .map(|(key, value)| -> Result<_, FlightError> {
                Ok((key.clone(), self.materialize(value)?))
            })
            .collect()
    }
}

type ElementParts<'a> = (&'a Json, Option<&'a str>, &'a serde_json::Map<String, Json>);

/// 识别元素元组 `["$", type, key|null, props]`。
fn element_parts(items: &[Json]) -> Option<ElementParts<'_>> {
    match items {
        [Json::String(marker), ty, key, Json::Object(props)]
            if marker == literal::ELEMENT_MARKER =>
        {
            let key = match key {
                Json::String(key) => Some(key.as_str()),
                _ => None,
            };
            Some((ty, key, props))
        }
        _ => None,
    }
}

/// 校验所有令牌并收集阻塞引用的目标。
fn scan(raw: &Json, targets: &mut Vec<RowId>) -> Result<(), FlightError> {
    match raw {
        Json::String(text) => {
            if let Token::Reference { id, .. } = literal::parse_token(text)? {
                targets.push(id);
            }
        }
        Json::Array(items) => match element_parts(items) {
            Some((ty, _, props)) => {
                scan(ty, targets)?;
                for value in props.values() {
                    scan(value, targets)?;
                }
            }
            None => {
                if let Some(Json::String(marker)) = items.first()
                    && marker == literal::ELEMENT_MARKER
                {
                    return Err(FlightError::MalformedToken {
                        token: format!("malformed element tuple of {} items", items.len()),
                    });
                }
                for item in items {
                    scan(item, targets)?;
                }
            }
        },
        Json::Object(map) => {
            for value in map.values() {
                scan(value, targets)?;
            }
        }
        Json::Null | Json::Bool(_) | Json::Number(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flight_core::ErrorPayload;
    use serde_json::json;

    fn id(raw: u64) -> RowId {
        RowId::new(raw).expect("non-zero id")
    }

    fn graph() -> ReferenceGraph {
        ReferenceGraph::new(Weak::new())
    }

    fn server_error(digest: &str) -> RemoteError {
        RemoteError::from_payload(ErrorPayload {
            digest: Some(digest.into()),
            message: None,
        })
    }

    #[test]
    fn forward_references_resolve_when_the_target_arrives() {
        let mut graph = graph();
        let mut fired = Fired::new();
        graph
            .resolve_model(id(1), json!({"a": "$2", "b": ["$2", "$$2"]}), &mut fired)
            .expect("row 1");
        assert!(graph.outcome(id(1)).is_none());

        graph
            .resolve_model(id(2), json!("x"), &mut fired)
            .expect("row 2");
        let expected = Model::object([
            ("a", Model::from("x")),
            ("b", Model::Array(vec![Model::from("x"), Model::from("$2")])),
        ]);
        assert_eq!(graph.outcome(id(1)), Some(Ok(expected)));
        assert_eq!(graph.unsettled(), 0);
    }

    #[test]
    fn transitive_dependencies_cascade_in_order() {
        let mut graph = graph();
        let mut fired = Fired::new();
        graph.resolve_model(id(1), json!(["$2"]), &mut fired).expect("1");
        graph.resolve_model(id(2), json!({"c": "$3"}), &mut fired).expect("2");
        assert!(graph.outcome(id(1)).is_none());
        graph.resolve_model(id(3), json!(7), &mut fired).expect("3");
        assert_eq!(
            graph.outcome(id(1)),
            Some(Ok(Model::Array(vec![Model::object([(
                "c",
                Model::Number(7.0)
            )])])))
        );
    }

    #[test]
    fn rejection_cascades_to_dependents() {
        let mut graph = graph();
        let mut fired = Fired::new();
        graph.resolve_model(id(1), json!({"a": "$2"}), &mut fired).expect("1");
        graph.resolve_model(id(3), json!("$1"), &mut fired).expect("3");
        graph.reject(id(2), server_error("d"), &mut fired).expect("2");

        for target in [1, 3] {
            let err = graph.outcome(id(target)).expect("settled").expect_err("cascaded");
            assert_eq!(err.digest(), Some("d"));
        }
        graph.resolve_model(id(4), json!("$2"), &mut fired).expect("4");
        assert!(matches!(graph.outcome(id(4)), Some(Err(_))));
    }

    #[test]
    fn cycles_are_protocol_violations() {
        let mut graph = graph();
        let mut fired = Fired::new();
        graph.resolve_model(id(1), json!(["$2"]), &mut fired).expect("1");
        let err = graph
            .resolve_model(id(2), json!({"back": "$1"}), &mut fired)
            .expect_err("cycle");
        assert!(matches!(err, FlightError::CyclicReference { .. }));
        assert!(err.is_protocol_violation());

        let err = graph
            .resolve_model(id(5), json!("$5"), &mut fired)
            .expect_err("self reference");
        assert!(matches!(err, FlightError::CyclicReference { .. }));
    }

    #[test]
    fn redefinition_is_rejected_and_settlement_is_single_shot() {
        let mut graph = graph();
        let mut fired = Fired::new();
        graph.resolve_model(id(1), json!("first"), &mut fired).expect("1");
        assert_eq!(
            graph.resolve_model(id(1), json!("second"), &mut fired),
            Err(FlightError::Redefinition { id: id(1) })
        );
        graph.settle(id(1), Err(RemoteError::closed()), &mut fired);
        assert_eq!(graph.outcome(id(1)), Some(Ok(Model::from("first"))));
    }

    #[test]
    fn malformed_tokens_leave_the_graph_untouched() {
        let mut graph = graph();
        let mut fired = Fired::new();
        let err = graph
            .resolve_model(id(1), json!({"bad": "$zz"}), &mut fired)
            .expect_err("malformed");
        assert!(err.is_protocol_violation());
        graph.resolve_model(id(1), json!("ok"), &mut fired).expect("still definable");
    }

    #[test]
    fn close_spares_entries_waiting_on_module_loads() {
        let mut graph = graph();
        let mut fired = Fired::new();
        graph.define_pending(id(2)).expect("module row");
        graph.resolve_model(id(1), json!(["$2", "$3"]), &mut fired).expect("1");
        graph.resolve_model(id(4), json!("$2"), &mut fired).expect("4");

        graph.close(RemoteError::closed(), &mut fired);
        assert_eq!(
            graph.outcome(id(1)).expect("cascaded").expect_err("closed").kind(),
            crate::RemoteErrorKind::Closed
        );
        assert!(graph.outcome(id(2)).is_none());
        assert!(graph.outcome(id(4)).is_none());
        assert!(matches!(graph.outcome(id(9)), Some(Err(_))));

        graph.settle(id(2), Ok(Model::from("module")), &mut fired);
        assert_eq!(graph.outcome(id(4)), Some(Ok(Model::from("module"))));
    }

    #[test]
    fn abandoned_watchers_do_not_accumulate() {
        let mut graph = graph();
        for _ in 0..16 {
            let (sender, _receiver) = oneshot::channel();
            assert!(graph.watch(id(1), sender).is_none());
        }
        let (sender, mut receiver) = oneshot::channel();
        assert!(graph.watch(id(1), sender).is_none());
        assert_eq!(graph.entries[&id(1)].watchers.len(), 1);

        let mut fired = Fired::new();
        graph.resolve_model(id(1), json!(1), &mut fired).expect("1");
        assert_eq!(receiver.try_recv(), Ok(Some(())));
        assert!(graph.entries[&id(1)].watchers.is_empty());
    }

    #[test]
    fn listeners_fire_once_with_the_outcome() {
        let mut graph = graph();
        let mut fired = Fired::new();
        let (sender, receiver) = std::sync::mpsc::channel();
        let listener: Listener = Box::new(move |outcome| {
            let _ = sender.send(outcome);
        });
        assert!(graph.subscribe(id(1), listener).is_none());
        graph.resolve_model(id(1), json!(true), &mut fired).expect("1");
        assert_eq!(fired.len(), 1);
        for (listeners, outcome) in fired {
            for listener in listeners {
                listener(outcome.clone());
            }
        }
        assert_eq!(receiver.recv().expect("fired"), Ok(Model::Bool(true)));
    }
}
