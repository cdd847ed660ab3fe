//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义编解码两端共享的本地错误：协议违例、预算超限、配置错误、客户端引用误用与收发端失败；
//! - 每个变体映射到 `<领域>.<语义>` 形式的稳定错误码，便于日志与告警按码聚合。
//!
//! ## 边界（What）
//! - 生产者失败（异步值被拒绝）不属于这里：它在编码端以 `Failure` 表示，
//!   跨线传输后在解码端以 `RemoteError` 呈现；
//! - 本枚举只描述“本地这一侧出了什么问题”，因此会从 API 直接以 `Err` 返回。

use thiserror::Error;

use crate::id::RowId;

/// crate 内统一的 `Result` 别名，错误类型默认为 [`FlightError`]。
pub type Result<T, E = FlightError> = core::result::Result<T, E>;

/// 稳定错误码。
///
/// 新增错误码需要同时补充 [`FlightError::code`] 的映射。
pub mod codes {
    /// 行或标识符文本不满足语法。
    pub const PROTOCOL_MALFORMED_ROW: &str = "protocol.malformed_row";
    /// 流在行中间结束。
    pub const PROTOCOL_TRUNCATED_ROW: &str = "protocol.truncated_row";
    /// 单行字节数超过配置预算。
    pub const PROTOCOL_BUDGET_EXCEEDED: &str = "protocol.budget_exceeded";
    /// 负载无法解析为期望的结构。
    pub const PROTOCOL_DECODE: &str = "protocol.decode";
    /// `$` 开头的字符串令牌无法识别。
    pub const PROTOCOL_MALFORMED_TOKEN: &str = "protocol.malformed_token";
    /// 已定义的标识符再次出现定义行。
    pub const PROTOCOL_REDEFINITION: &str = "protocol.redefinition";
    /// 引用之间形成等待环。
    pub const PROTOCOL_CYCLE: &str = "protocol.cycle";
    /// 标识符空间耗尽。
    pub const PROTOCOL_ID_EXHAUSTED: &str = "protocol.id_exhausted";
    /// 在客户端引用上做了不允许的属性访问。
    pub const CLIENT_REFERENCE_ACCESS: &str = "client_reference.access";
    /// 在尚未结算的占位上做了结构化访问。
    pub const CLIENT_REFERENCE_UNRESOLVED: &str = "client_reference.unresolved";
    /// 配置文本非法。
    pub const CONFIG_INVALID: &str = "config.invalid";
    /// 输出端写入失败。
    pub const TRANSPORT_SINK: &str = "transport.sink";
    /// 输入端读取失败。
    pub const TRANSPORT_SOURCE: &str = "transport.source";
    /// 流已关闭后继续写入。
    pub const STREAM_CLOSED: &str = "stream.closed";
}

/// Flight 的本地错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：协议违例必须在误用点立即、响亮地失败，细粒度变体帮助定位是哪一行、哪个标识符出错；
/// - **契约 (What)**：所有变体 `Send + Sync + 'static`，可跨线程传播；[`FlightError::code`] 返回稳定错误码；
/// - **风险 (Trade-offs)**：上下文以 `String` 保存，多一次分配换取可读的诊断。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FlightError {
    /// 标识符文本不是合法的非零小写十六进制。
    #[error("malformed row id `{text}`")]
    MalformedId { text: String },

    /// 标识符计数器溢出。
    #[error("row id space exhausted")]
    IdExhausted,

    /// 行结构不满足 `<id>:<tag?><payload>` 语法。
    #[error("malformed row: {reason}")]
    MalformedRow { reason: String },

    /// 输入在最后一行结束前终止。
    #[error("stream ended inside a row ({len} bytes pending)")]
    TruncatedRow { len: usize },

    /// 单行长度超过预算。
    #[error("row length {len} exceeds budget {limit}")]
    RowBudgetExceeded { len: usize, limit: usize },

    /// 负载无法解析。
    #[error("invalid payload for row {id}: {reason}")]
    InvalidPayload { id: RowId, reason: String },

    /// 以 `$` 开头但无法识别的字符串令牌。
    #[error("malformed reference token `{token}`")]
    MalformedToken { token: String },

    /// 提示行携带未知的提示码。
    #[error("unknown hint code `{code}`")]
    UnknownHint { code: char },

    /// 已定义的标识符再次收到定义行。
    #[error("row {id} is already defined; redefinition rejected")]
    Redefinition { id: RowId },

    /// `id` 等待 `target`，而 `target` 已（间接）等待 `id`。
    #[error("row {id} would wait on row {target}, which already waits on {id}")]
    CyclicReference { id: RowId, target: RowId },

    /// 在客户端引用上做了不允许的属性访问，消息面向开发者。
    #[error("{message}")]
    ClientReferenceAccess { message: String },

    /// 在尚未结算的占位上读取属性。
    #[error("cannot read `{property}` of row {id} before it resolves")]
    UnresolvedAccess { id: RowId, property: String },

    /// 配置非法。
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// 输出端写入失败。
    #[error("failed to write to sink: {reason}")]
    Sink { reason: String },

    /// 输入端读取失败。
    #[error("failed to read from source: {reason}")]
    Source { reason: String },

    /// 流已关闭。
    #[error("stream is closed")]
    Closed,
}

impl FlightError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            FlightError::MalformedId { .. } | FlightError::MalformedRow { .. } => {
                codes::PROTOCOL_MALFORMED_ROW
            }
            FlightError::IdExhausted => codes::PROTOCOL_ID_EXHAUSTED,
            FlightError::TruncatedRow { .. } => codes::PROTOCOL_TRUNCATED_ROW,
            FlightError::RowBudgetExceeded { .. } => codes::PROTOCOL_BUDGET_EXCEEDED,
            FlightError::InvalidPayload { .. } | FlightError::UnknownHint { .. } => {
                codes::PROTOCOL_DECODE
            }
            FlightError::MalformedToken { .. } => codes::PROTOCOL_MALFORMED_TOKEN,
            FlightError::Redefinition { .. } => codes::PROTOCOL_REDEFINITION,
            FlightError::CyclicReference { .. } => codes::PROTOCOL_CYCLE,
            FlightError::ClientReferenceAccess { .. } => codes::CLIENT_REFERENCE_ACCESS,
            FlightError::UnresolvedAccess { .. } => codes::CLIENT_REFERENCE_UNRESOLVED,
            FlightError::Config { .. } => codes::CONFIG_INVALID,
            FlightError::Sink { .. } => codes::TRANSPORT_SINK,
            FlightError::Source { .. } => codes::TRANSPORT_SOURCE,
            FlightError::Closed => codes::STREAM_CLOSED,
        }
    }

    /// 是否属于协议违例（对端发送了不合法的数据）。
    pub fn is_protocol_violation(&self) -> bool {
        self.code().starts_with("protocol.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_variants_share_protocol_prefix() {
        let id = RowId::ROOT;
        let violations = [
            FlightError::MalformedRow {
                reason: "x".into(),
            },
            FlightError::TruncatedRow { len: 3 },
            FlightError::Redefinition { id },
            FlightError::CyclicReference { id, target: id },
            FlightError::MalformedToken { token: "$?".into() },
        ];
        for err in violations {
            assert!(err.is_protocol_violation(), "{err:?}");
        }
        assert!(!FlightError::Closed.is_protocol_violation());
        assert!(
            !FlightError::ClientReferenceAccess {
                message: "nope".into()
            }
            .is_protocol_violation()
        );
    }

    #[test]
    fn client_reference_access_displays_message_verbatim() {
        let err = FlightError::ClientReferenceAccess {
            message: "Cannot access A.b on the server.".into(),
        };
        assert_eq!(err.to_string(), "Cannot access A.b on the server.");
        assert_eq!(err.code(), codes::CLIENT_REFERENCE_ACCESS);
    }
}
