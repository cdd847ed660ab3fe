//! # flight-server
//!
//! ## 定位（Why）
//! - Flight 行协议的编码端：把生产者给出的值图（可能含尚未结算的异步值与客户端引用）
//!   逐行写成字节流，解码端据此增量重建；
//! - 值图中互不依赖的部分各自结算、各自输出，一个慢值不会挡住其兄弟。
//!
//! ## 使用方式（How）
//! ```
//! use std::sync::Arc;
//!
//! use flight_server::{Element, Request, RequestOptions, StaticManifest, Value};
//! use futures::StreamExt;
//!
//! let request = Request::new(Arc::new(StaticManifest::new()), RequestOptions::default());
//! let stream = request.render(Value::object([(
//!     "html",
//!     Value::from(Element::new("p").child("hello")),
//! )]));
//! let rows: Vec<_> = futures::executor::block_on(stream.collect());
//! assert_eq!(
//!     String::from_utf8(rows.concat()).expect("utf8"),
//!     "1:{\"html\":[\"$\",\"p\",null,{\"children\":\"hello\"}]}\n"
//! );
//! ```
//!
//! ## 模块一览（What）
//! - [`value`]：输入值模型 [`Value`]、异步值 [`Deferred`] 与失败原因 [`Failure`]；
//! - [`client_reference`]：客户端模块与导出引用，含属性访问守卫；
//! - [`manifest`]：清单查询能力 [`ClientManifest`] 与静态实现；
//! - [`hints`]：按身份键去重的旁路提示；
//! - [`digest`]：错误回调类型 [`OnError`]；
//! - [`request`]：请求、渲染流与中止入口。

pub mod client_reference;
pub mod digest;
pub mod hints;
pub mod manifest;
pub mod request;
pub mod value;

pub use client_reference::{ClientModule, ClientReference};
pub use digest::OnError;
pub use hints::Hints;
pub use manifest::{ClientManifest, StaticManifest};
pub use request::{AbortHandle, RenderStream, Request, RequestOptions, render};
pub use value::{Deferred, Element, Failure, Settle, Value};
