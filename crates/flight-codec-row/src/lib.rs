#![warn(missing_docs)]

//! `flight-codec-row` 提供 Flight 行协议的分帧与字面量令牌语法。
//!
//! # 背景（Why）
//! - Flight 的线格式是“一行一个逻辑单元”：`<十六进制 id>:<标签?><负载>\n`；
//! - 编码端与解码端都需要同一套行语法与 `$` 令牌规则，放在独立 crate 中保证两端一致；
//! - 本 crate 纯粹、无状态（[`RowDecoder`] 只保存未消费的尾部字节），不做任何 I/O，也不修改引用图。
//!
//! # 使用概览（How）
//! - 编码端用 [`encode_row`] 生成单行字节，用 [`literal`] 中的辅助函数构造负载里的令牌；
//! - 解码端把任意边界切分的字节块喂给 [`RowDecoder::decode`]，拿到零或多个完整 [`Row`]，
//!   不完整的尾部留待下一块；流结束时调用 [`RowDecoder::finish`] 检查是否截断。
//!
//! # 契约说明（What）
//! - 负载中的 JSON 由 `serde_json` 输出，控制字符与换行一律转义，因此负载内不会出现裸换行；
//! - 字符串若以 `$` 开头，必须经 [`literal::escape_string`] 转义为 `$$`，否则会被当作令牌；
//! - 错误一律为 [`flight_core::FlightError`]，协议违例的错误码以 `protocol.` 开头。

pub mod literal;
mod row;

pub use crate::row::{Row, RowDecoder, RowTag, decode_rows, encode_row};
