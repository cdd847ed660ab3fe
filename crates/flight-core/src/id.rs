//! 行标识符。
//!
//! 标识符在单个流内唯一，由编码端按分配顺序单调递增发放；根值固定为 `1`。
//! 线格式使用小写十六进制文本表示。

use core::fmt;

use crate::error::FlightError;

/// 单个流内某个值槽位的标识符。
///
/// # 教案式说明
/// - **意图 (Why)**：编码端与解码端对同一槽位必须使用同一寻址方式，
///   用新类型包裹 `u64`，避免与普通数字混用；
/// - **契约 (What)**：取值恒为正；`Display` 输出小写十六进制，[`RowId::parse_hex`] 为其逆操作；
/// - **风险 (Trade-offs)**：`u64` 对单个流来说足够，溢出按协议违例处理而非回绕。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RowId(u64);

impl RowId {
    /// 根值所在的标识符。
    pub const ROOT: RowId = RowId(1);

    /// 由原始数值构造；`0` 不是合法标识符。
    pub fn new(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    /// 返回原始数值。
    pub fn get(self) -> u64 {
        self.0
    }

    /// 返回分配顺序中的下一个标识符。
    pub fn next(self) -> Result<Self, FlightError> {
        self.0
            .checked_add(1)
            .map(Self)
            .ok_or(FlightError::IdExhausted)
    }

    /// 解析线格式中的十六进制标识符。
    ///
    /// - **契约 (What)**：只接受 `[0-9a-f]`，不允许空串、前缀或大写；结果不能为 `0`；
    /// - **错误**：不满足时返回 [`FlightError::MalformedId`]。
    pub fn parse_hex(text: &str) -> Result<Self, FlightError> {
        let malformed = || FlightError::MalformedId {
            text: text.to_owned(),
        };
        if text.is_empty()
            || !text
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(malformed());
        }
        let raw = u64::from_str_radix(text, 16).map_err(|_| malformed())?;
        Self::new(raw).ok_or_else(malformed)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_lowercase_hex() {
        let id = RowId::new(255).expect("non-zero");
        assert_eq!(id.to_string(), "ff");
        assert_eq!(RowId::ROOT.to_string(), "1");
    }

    #[test]
    fn parse_hex_round_trips_display() {
        let id = RowId::new(0x1a2b).expect("non-zero");
        assert_eq!(RowId::parse_hex(&id.to_string()).expect("parse"), id);
    }

    #[test]
    fn parse_hex_rejects_zero_and_noise() {
        for text in ["", "0", "1G", "FF", "0x1", " 1", "-1"] {
            assert!(
                matches!(RowId::parse_hex(text), Err(FlightError::MalformedId { .. })),
                "`{text}` should be rejected"
            );
        }
    }

    #[test]
    fn next_detects_exhaustion() {
        let last = RowId::new(u64::MAX).expect("non-zero");
        assert!(matches!(last.next(), Err(FlightError::IdExhausted)));
    }
}
