//! 提示行的解析与分发。

use flight_core::{FlightError, HintCode};
use serde_json::Value as Json;

/// 解码后的提示。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Hint {
    /// 预解析域名。
    PrefetchDns {
        /// 目标地址。
        href: String,
    },
    /// 预连接，可带跨域模式。
    Preconnect {
        /// 目标地址。
        href: String,
        /// 跨域模式，例如 `anonymous`。
        cross_origin: Option<String>,
    },
    /// 预加载资源。
    Preload {
        /// 资源地址。
        href: String,
        /// 资源类型，例如 `style`。
        as_type: String,
    },
    /// 预加载并立即初始化资源。
    Preinit {
        /// 资源地址。
        href: String,
        /// 资源类型，例如 `script`。
        as_type: String,
    },
}

impl Hint {
    /// 解析 `H` 标签之后的负载：一个提示码字符加 JSON。
    pub fn parse(payload: &str) -> Result<Hint, FlightError> {
        let mut chars = payload.chars();
        let code = chars.next().ok_or_else(|| malformed(payload))?;
        let code = HintCode::from_char(code)?;
        let json: Json = serde_json::from_str(chars.as_str()).map_err(|_| malformed(payload))?;
        let hint = match (code, json) {
            (HintCode::PrefetchDns, Json::String(href)) => Hint::PrefetchDns { href },
            (HintCode::Preconnect, Json::String(href)) => Hint::Preconnect {
                href,
                cross_origin: None,
            },
            (HintCode::Preconnect, Json::Array(parts)) => match parts.as_slice() {
                [Json::String(href), Json::String(mode)] => Hint::Preconnect {
                    href: href.clone(),
                    cross_origin: Some(mode.clone()),
                },
                _ => return Err(malformed(payload)),
            },
            (HintCode::Preload | HintCode::Preinit, Json::Array(parts)) => match parts.as_slice() {
                [Json::String(href), Json::String(as_type)] => {
                    let (href, as_type) = (href.clone(), as_type.clone());
                    if code == HintCode::Preload {
                        Hint::Preload { href, as_type }
                    } else {
                        Hint::Preinit { href, as_type }
                    }
                }
                _ => return Err(malformed(payload)),
            },
            _ => return Err(malformed(payload)),
        };
        Ok(hint)
    }
}

fn malformed(payload: &str) -> FlightError {
    FlightError::MalformedRow {
        reason: format!("invalid hint payload `{payload}`"),
    }
}

/// 提示的接收方，通常把提示转交给宿主的资源加载层。
pub trait HintDispatcher: Send + Sync {
    /// 处理一条提示；在响应内部锁之外调用。
    fn dispatch(&self, hint: Hint);
}

impl<F> HintDispatcher for F
where
    F: Fn(Hint) + Send + Sync,
{
    fn dispatch(&self, hint: Hint) {
        self(hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_hint_kind() {
        assert_eq!(
            Hint::parse("D\"dns\"").expect("dns"),
            Hint::PrefetchDns { href: "dns".into() }
        );
        assert_eq!(
            Hint::parse("C[\"cdn\",\"anonymous\"]").expect("preconnect"),
            Hint::Preconnect {
                href: "cdn".into(),
                cross_origin: Some("anonymous".into())
            }
        );
        assert_eq!(
            Hint::parse("L[\"a.css\",\"style\"]").expect("preload"),
            Hint::Preload {
                href: "a.css".into(),
                as_type: "style".into()
            }
        );
        assert_eq!(
            Hint::parse("I[\"a.js\",\"script\"]").expect("preinit"),
            Hint::Preinit {
                href: "a.js".into(),
                as_type: "script".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_codes_and_shapes() {
        assert_eq!(
            Hint::parse("X\"a\""),
            Err(FlightError::UnknownHint { code: 'X' })
        );
        assert!(Hint::parse("L\"a.css\"").is_err());
        assert!(Hint::parse("").is_err());
    }
}
