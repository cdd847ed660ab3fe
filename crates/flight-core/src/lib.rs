//! # flight-core
//!
//! ## 定位与职责（Why）
//! - 为 Flight 行协议的编码端（`flight-server`）与解码端（`flight-client`）提供共享契约：
//!   行标识符、线格式中的结构化记录、错误分类与稳定错误码、配置以及日志初始化。
//! - 两端只通过本 crate 与 `flight-codec-row` 交换类型，互不依赖。
//!
//! ## 模块一览（What）
//! - [`id`]：行标识符 [`RowId`]，十六进制文本形式；
//! - [`wire`]：模块引用、错误、暂缓与提示行的负载记录；
//! - [`error`]：[`FlightError`] 与 `codes` 常量；
//! - [`config`]：[`FlightConfig`] 与运行模式 [`Mode`]；
//! - [`observability`]：`tracing` 目标常量与订阅器安装入口。

pub mod config;
pub mod error;
pub mod id;
pub mod observability;
pub mod wire;

pub use config::{FlightConfig, Mode};
pub use error::{FlightError, Result};
pub use id::RowId;
pub use wire::{ErrorPayload, HintCode, ModuleMetadata, PostponePayload};
