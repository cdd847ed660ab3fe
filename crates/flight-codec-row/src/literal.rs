//! 模型负载中的字面量令牌。
//!
//! 模型行的负载是 JSON，外加一组以 `$` 开头的字符串令牌，用来表达 JSON 无法直接表达的值：
//!
//! | 令牌 | 含义 |
//! |---|---|
//! | `$$text` | 以 `$` 开头的普通字符串 `$text` |
//! | `$<hex>` | 标识符对应的完整值 |
//! | `$<hex>:a:b` | 标识符对应值的具名导出 / 属性路径 |
//! | `$@<hex>` | 指向标识符的非阻塞句柄 |
//! | `$undefined` | 显式缺省，与 `null` 区分 |
//! | `$NaN` `$Infinity` `$-Infinity` `$-0` | 非有限数与负零 |
//! | `$n<digits>` | 大整数（十进制） |
//!
//! 数组首元素恰为字符串 `$` 时表示元素元组 `["$", type, key, props]`；
//! 用户数据中的 `"$"` 会被转义为 `"$$"`，因此不会与之混淆。

use std::borrow::Cow;

use flight_core::{FlightError, RowId};
use serde_json::Value as Json;

/// 令牌前缀。
pub const MARKER: char = '$';
/// 元素元组的首元素。
pub const ELEMENT_MARKER: &str = "$";
/// 显式缺省。
pub const UNDEFINED: &str = "$undefined";
/// 非数。
pub const NAN: &str = "$NaN";
/// 正无穷。
pub const INFINITY: &str = "$Infinity";
/// 负无穷。
pub const NEG_INFINITY: &str = "$-Infinity";
/// 负零。
pub const NEG_ZERO: &str = "$-0";

const PROMISE_SIGIL: char = '@';
const BIGINT_SIGIL: char = 'n';
const PATH_SEPARATOR: char = ':';
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// 转义用户字符串：以 `$` 开头时再补一个 `$`。
pub fn escape_string(text: &str) -> Cow<'_, str> {
    if text.starts_with(MARKER) {
        Cow::Owned(format!("{MARKER}{text}"))
    } else {
        Cow::Borrowed(text)
    }
}

/// 数值编码：有限值（负零除外）直接成为 JSON 数，其余成为令牌字符串。
///
/// 可精确表示的整数以整数形式输出（`1` 而非 `1.0`）。
pub fn number(value: f64) -> Json {
    if value.is_nan() {
        return Json::from(NAN);
    }
    if value.is_infinite() {
        return Json::from(if value > 0.0 { INFINITY } else { NEG_INFINITY });
    }
    if value == 0.0 && value.is_sign_negative() {
        return Json::from(NEG_ZERO);
    }
    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        return Json::from(value as i64);
    }
    serde_json::Number::from_f64(value)
        .map(Json::Number)
        .unwrap_or_else(|| Json::from(NAN))
}

/// 大整数令牌；`digits` 须为可带负号的十进制数字串。
pub fn bigint(digits: &str) -> Result<String, FlightError> {
    if !is_decimal(digits) {
        return Err(FlightError::MalformedToken {
            token: format!("{MARKER}{BIGINT_SIGIL}{digits}"),
        });
    }
    Ok(format!("{MARKER}{BIGINT_SIGIL}{digits}"))
}

/// 完整值引用。
pub fn reference(id: RowId) -> String {
    format!("{MARKER}{id}")
}

/// 非阻塞句柄引用。
pub fn promise_reference(id: RowId) -> String {
    format!("{MARKER}{PROMISE_SIGIL}{id}")
}

/// 带路径的引用，例如整模块中的某个具名导出。
///
/// 路径段不能为空，也不能包含 `:`。
pub fn path_reference(id: RowId, path: &[&str]) -> Result<String, FlightError> {
    let mut token = reference(id);
    for segment in path {
        if segment.is_empty() || segment.contains(PATH_SEPARATOR) {
            return Err(FlightError::MalformedToken {
                token: format!("{token}{PATH_SEPARATOR}{segment}"),
            });
        }
        token.push(PATH_SEPARATOR);
        token.push_str(segment);
    }
    Ok(token)
}

/// 解析后的字符串令牌。
#[derive(Clone, Debug, PartialEq)]
pub enum Token<'a> {
    /// 普通字符串（已去除转义）。
    Text(Cow<'a, str>),
    /// 引用，`path` 为空表示完整值。
    Reference {
        /// 目标标识符。
        id: RowId,
        /// 具名导出 / 属性路径。
        path: Vec<&'a str>,
    },
    /// 非阻塞句柄。
    Promise(RowId),
    /// 显式缺省。
    Undefined,
    /// 非有限数或负零。
    Number(f64),
    /// 大整数的十进制文本。
    BigInt(&'a str),
}

/// 解析 JSON 字符串中的令牌。
///
/// # 教案式说明
/// - **意图 (Why)**：解码端在遍历模型时对每个字符串调用一次，区分普通文本与引用；
/// - **契约 (What)**：不以 `$` 开头的字符串原样返回；无法识别的 `$` 令牌返回
///   [`FlightError::MalformedToken`]，属于协议违例；
/// - **注意 (Trade-offs)**：元素标记 `"$"` 只在数组首位有意义，需由调用方在调用本函数前识别。
pub fn parse_token(text: &str) -> Result<Token<'_>, FlightError> {
    let Some(rest) = text.strip_prefix(MARKER) else {
        return Ok(Token::Text(Cow::Borrowed(text)));
    };
    let malformed = || FlightError::MalformedToken {
        token: text.to_owned(),
    };
    match text {
        UNDEFINED => return Ok(Token::Undefined),
        NAN => return Ok(Token::Number(f64::NAN)),
        INFINITY => return Ok(Token::Number(f64::INFINITY)),
        NEG_INFINITY => return Ok(Token::Number(f64::NEG_INFINITY)),
        NEG_ZERO => return Ok(Token::Number(-0.0)),
        _ => {}
    }
    if rest.starts_with(MARKER) {
        return Ok(Token::Text(Cow::Borrowed(rest)));
    }
    if let Some(id) = rest.strip_prefix(PROMISE_SIGIL) {
        return RowId::parse_hex(id)
            .map(Token::Promise)
            .map_err(|_| malformed());
    }
    if let Some(digits) = rest.strip_prefix(BIGINT_SIGIL) {
        return if is_decimal(digits) {
            Ok(Token::BigInt(digits))
        } else {
            Err(malformed())
        };
    }

    let mut segments = rest.split(PATH_SEPARATOR);
    let id = segments
        .next()
        .ok_or_else(malformed)
        .and_then(|id| RowId::parse_hex(id).map_err(|_| malformed()))?;
    let path: Vec<&str> = segments.collect();
    if path.iter().any(|segment| segment.is_empty()) {
        return Err(malformed());
    }
    Ok(Token::Reference { id, path })
}

fn is_decimal(digits: &str) -> bool {
    let unsigned = digits.strip_prefix('-').unwrap_or(digits);
    !unsigned.is_empty() && unsigned.bytes().all(|b| b.is_ascii_digit())
}
