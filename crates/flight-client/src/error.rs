//! 解码端可见的失败。

use flight_core::{ErrorPayload, FlightError};

/// 生产模式下错误行不带消息时使用的通用描述。
pub const PRODUCTION_MESSAGE: &str = "An error occurred on the server while producing this value. \
     The original message is omitted in production builds; \
     the digest identifies the failure in server logs.";

const CLOSED_MESSAGE: &str = "Connection closed.";

/// 失败来源。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RemoteErrorKind {
    /// 编码端生产者失败（错误行），含中止时为未结算标识符合成的错误行。
    Server,
    /// 编码端暂缓了该值（暂缓行）。
    Postponed,
    /// 本地模块解析失败。
    Module,
    /// 流中出现协议违例，所有未结算的标识符以此失败。
    Protocol,
    /// 流结束时该值仍依赖尚未到达的数据。
    Closed,
    /// 本地调用了 [`crate::Response::abort`]。
    Aborted,
}

/// 某个标识符的失败结果。
///
/// # 教案式说明
/// - **意图 (Why)**：边界处理代码需要把“摘要”与“消息”当作两条独立信息：
///   摘要用于与服务端日志对应，消息只用于开发诊断；
/// - **契约 (What)**：`Display` 只输出消息；摘要通过 [`RemoteError::digest`] 单独读取；
///   生产模式没有原始消息时，消息为 [`PRODUCTION_MESSAGE`]；
/// - **风险 (Trade-offs)**：级联失败共享同一个值的克隆，无法区分是直接失败还是受依赖牵连。
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    message: String,
    digest: Option<String>,
    kind: RemoteErrorKind,
}

impl RemoteError {
    /// 由错误行负载重建。
    pub fn from_payload(payload: ErrorPayload) -> Self {
        Self {
            message: payload
                .message
                .unwrap_or_else(|| PRODUCTION_MESSAGE.to_owned()),
            digest: payload.digest,
            kind: RemoteErrorKind::Server,
        }
    }

    /// 由暂缓行重建；没有原因时使用通用描述。
    pub fn postponed(reason: Option<String>) -> Self {
        Self {
            message: reason.unwrap_or_else(|| "The value was postponed on the server.".to_owned()),
            digest: None,
            kind: RemoteErrorKind::Postponed,
        }
    }

    /// 本地模块解析失败，供 [`crate::ModuleResolver`] 实现使用。
    pub fn module(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            digest: None,
            kind: RemoteErrorKind::Module,
        }
    }

    /// 以协议违例结束的标识符。
    pub fn protocol(violation: &FlightError) -> Self {
        Self {
            message: violation.to_string(),
            digest: None,
            kind: RemoteErrorKind::Protocol,
        }
    }

    /// 流结束时仍缺少数据。
    pub fn closed() -> Self {
        Self {
            message: CLOSED_MESSAGE.to_owned(),
            digest: None,
            kind: RemoteErrorKind::Closed,
        }
    }

    /// 本地中止。
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            message: reason.into(),
            digest: None,
            kind: RemoteErrorKind::Aborted,
        }
    }

    /// 面向开发者的消息；生产模式下为 [`PRODUCTION_MESSAGE`]。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 编码端错误回调给出的摘要，只有服务端失败才可能携带。
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// 失败来源。
    pub fn kind(&self) -> RemoteErrorKind {
        self.kind
    }
}
