//! 旁路提示：按身份键去重，每个流内同一键至多输出一行。
//!
//! ## 身份键（What）
//! | 提示 | 键 | 负载 |
//! |---|---|---|
//! | 预解析 DNS | `D\|href` | `"href"` |
//! | 预连接 | `C\|href` 或 `C:<crossOrigin>\|href` | `"href"` 或 `["href", crossOrigin]` |
//! | 预加载 | `L<as>\|href` | `["href", as]` |
//! | 预初始化 | `I\|href` | `["href", as]` |
//!
//! 只有参与身份的属性进入键；其余属性（例如预初始化的 `as`）不影响去重。

use std::{collections::HashSet, sync::Arc};

use flight_core::HintCode;
use serde_json::{Value as Json, json};

use crate::request::RequestShared;

/// 已输出的提示键。
#[derive(Debug, Default)]
pub(crate) struct HintTable {
    emitted: HashSet<String>,
}

impl HintTable {
    /// 首次出现返回 `true`。
    pub(crate) fn insert(&mut self, key: String) -> bool {
        self.emitted.insert(key)
    }
}

/// 一个流的提示入口。
///
/// 由 [`crate::Request::hints`] 取得，可以在生产者 future 内部、任意挂起点前后调用。
/// 不同请求的 `Hints` 互不共享去重表。
#[derive(Clone)]
pub struct Hints {
    shared: Arc<RequestShared>,
}

impl Hints {
    pub(crate) fn new(shared: Arc<RequestShared>) -> Self {
        Self { shared }
    }

    /// 预解析 `href` 的域名；首次输出返回 `true`。
    pub fn prefetch_dns(&self, href: &str) -> bool {
        self.emit(HintCode::PrefetchDns, format!("D|{href}"), json!(href))
    }

    /// 预连接 `href`；不同的跨域模式各自输出一次。
    pub fn preconnect(&self, href: &str, cross_origin: Option<&str>) -> bool {
        let key = match cross_origin {
            Some(mode) => format!("C:{mode}|{href}"),
            None => format!("C|{href}"),
        };
        let payload = match cross_origin {
            Some(mode) => json!([href, mode]),
            None => json!(href),
        };
        self.emit(HintCode::Preconnect, key, payload)
    }

    /// 以 `as_type` 预加载 `href`；`as_type` 参与去重。
    pub fn preload(&self, href: &str, as_type: &str) -> bool {
        self.emit(
            HintCode::Preload,
            format!("L{as_type}|{href}"),
            json!([href, as_type]),
        )
    }

    /// 预初始化 `href`；同一 `href` 只输出一次，后续调用的 `as_type` 被忽略。
    pub fn preinit(&self, href: &str, as_type: &str) -> bool {
        self.emit(
            HintCode::Preinit,
            format!("I|{href}"),
            json!([href, as_type]),
        )
    }

    /// 以自定义键输出提示；键已出现过、或流已结束时返回 `false`。
    pub fn emit(&self, code: HintCode, key: String, payload: Json) -> bool {
        self.shared.emit_hint(code, key, &payload)
    }
}
