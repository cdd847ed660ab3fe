#![warn(missing_docs)]

//! # flight-client
//!
//! ## 定位（Why）
//! - Flight 行协议的解码端：按到达顺序应用行，增量重建编码端的值图；
//! - 值可能先被引用、后被定义，解码端为每个标识符维护占位，定义到达后再结算，
//!   并把结果传递给所有依赖它的值。
//!
//! ## 使用方式（How）
//! ```
//! use flight_client::{Model, Read, Response, ResponseOptions};
//!
//! let response = Response::new(ResponseOptions::default());
//! let root = response.root();
//! assert!(matches!(root.read(), Read::Pending(_)));
//!
//! response.process_chunk(b"2:\"hel").expect("partial row");
//! response.process_chunk(b"lo\"\n1:{\"greeting\":\"$2\"}\n").expect("rows");
//! response.close().expect("complete stream");
//!
//! match root.read() {
//!     Read::Ready(model) => assert_eq!(model.get("greeting"), Some(&Model::from("hello"))),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```
//!
//! ## 模块一览（What）
//! - [`model`]：解码后的值 [`Model`]；
//! - [`handle`]：指向标识符的句柄 [`Handle`]，支持同步读取、回调与 `await`；
//! - [`resolver`]：注入的模块解析能力 [`ModuleResolver`]；
//! - [`hints`]：提示解析与分发 [`HintDispatcher`]；
//! - 响应 [`Response`] 与远端错误 [`RemoteError`]。

mod error;
mod graph;
pub mod handle;
pub mod hints;
pub mod model;
pub mod resolver;
mod response;

pub use error::{PRODUCTION_MESSAGE, RemoteError, RemoteErrorKind};
pub use handle::{Handle, Notify, Read};
pub use hints::{Hint, HintDispatcher};
pub use model::{ElementModel, Model};
pub use resolver::{ModuleResolver, NoModules, Resolution};
pub use response::{Response, ResponseOptions};
