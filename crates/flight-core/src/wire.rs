//! 线格式中的结构化负载记录。
//!
//! 模型行之外的几类行（模块引用、错误、暂缓、提示）都携带固定形状的 JSON，
//! 两端通过这里的类型读写，保证字段名一致。

use serde::{Deserialize, Serialize};

use crate::error::FlightError;

/// 模块引用行的负载：解码端据此调用自身的模块解析能力。
///
/// - `id`：打包产物中的模块标识；
/// - `chunks`：加载该模块前需要就绪的分块；
/// - `name`：导出名，`*` 表示整个模块，空串表示默认导出；
/// - `is_async`：模块本身异步求值，解析结果需要再等待一次。
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ModuleMetadata {
    pub id: String,
    #[serde(default)]
    pub chunks: Vec<String>,
    pub name: String,
    #[serde(rename = "async", default, skip_serializing_if = "is_false")]
    pub is_async: bool,
}

impl ModuleMetadata {
    /// 整模块导出名。
    pub const WHOLE_MODULE: &'static str = "*";

    /// 构造同步模块的元数据。
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chunks: Vec::new(),
            name: name.into(),
            is_async: false,
        }
    }

    /// 追加所需分块。
    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks.extend(chunks.into_iter().map(Into::into));
        self
    }

    /// 标记为异步模块。
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// 是否指向整个模块。
    pub fn is_whole_module(&self) -> bool {
        self.name == Self::WHOLE_MODULE
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// 错误行负载。
///
/// 生产模式只有 `digest`；开发模式额外带 `message`，除此之外不传任何细节。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// 暂缓行负载；`reason` 只在开发模式出现。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PostponePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// 提示行的种类码，紧跟在 `H` 标签之后。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum HintCode {
    /// 预解析 DNS。
    PrefetchDns,
    /// 预连接。
    Preconnect,
    /// 预加载资源。
    Preload,
    /// 预初始化（加载并执行）资源。
    Preinit,
}

impl HintCode {
    /// 线格式字符。
    pub fn as_char(self) -> char {
        match self {
            HintCode::PrefetchDns => 'D',
            HintCode::Preconnect => 'C',
            HintCode::Preload => 'L',
            HintCode::Preinit => 'I',
        }
    }

    /// 由线格式字符解析。
    pub fn from_char(code: char) -> Result<Self, FlightError> {
        match code {
            'D' => Ok(HintCode::PrefetchDns),
            'C' => Ok(HintCode::Preconnect),
            'L' => Ok(HintCode::Preload),
            'I' => Ok(HintCode::Preinit),
            other => Err(FlightError::UnknownHint { code: other }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_metadata_omits_sync_flag() {
        let meta = ModuleMetadata::new("./Button.js", "Button").with_chunks(["chunk-1"]);
        let json = serde_json::to_string(&meta).expect("serialize");
        assert_eq!(json, r#"{"id":"./Button.js","chunks":["chunk-1"],"name":"Button"}"#);

        let parsed: ModuleMetadata =
            serde_json::from_str(r#"{"id":"m","name":"*","async":true}"#).expect("parse");
        assert!(parsed.is_async);
        assert!(parsed.is_whole_module());
        assert!(parsed.chunks.is_empty());
    }

    #[test]
    fn production_error_payload_carries_digest_only() {
        let payload = ErrorPayload {
            digest: Some("d1".into()),
            message: None,
        };
        assert_eq!(
            serde_json::to_string(&payload).expect("serialize"),
            r#"{"digest":"d1"}"#
        );
    }

    #[test]
    fn hint_codes_round_trip_through_chars() {
        for code in [
            HintCode::PrefetchDns,
            HintCode::Preconnect,
            HintCode::Preload,
            HintCode::Preinit,
        ] {
            assert_eq!(HintCode::from_char(code.as_char()).expect("known"), code);
        }
        assert_eq!(
            HintCode::from_char('Z'),
            Err(FlightError::UnknownHint { code: 'Z' })
        );
    }
}
