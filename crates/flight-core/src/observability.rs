//! 日志目标与订阅器安装。
//!
//! ## 契约（What）
//! - 编解码各层以固定 `target` 记录 `tracing` 事件，见 [`targets`]；
//! - [`install_tracing`] 组装 `fmt + EnvFilter` 订阅器并设为全局默认，只允许安装一次；
//!   `RUST_LOG` 未设置时过滤级别为 `info`。

use std::sync::OnceLock;

use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// `tracing` 事件目标。
pub mod targets {
    /// 编码端（请求、任务队列、提示表）。
    pub const SERVER: &str = "flight::server";
    /// 解码端（引用图、响应）。
    pub const CLIENT: &str = "flight::client";
    /// 行编解码。
    pub const CODEC: &str = "flight::codec";
}

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 订阅器安装失败的原因。
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// 本函数已成功执行过。
    #[error("flight tracing subscriber is already installed")]
    AlreadyInstalled,
    /// 外部已设置全局订阅器。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 设置全局订阅器失败。
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装全局 `tracing` 订阅器。
///
/// # 教案式说明
/// - **意图 (Why)**：宿主只需调用一次即可看到 Flight 各层的结构化日志；
/// - **逻辑 (How)**：先检查重复安装与外部订阅器，再以 `registry + EnvFilter + fmt` 组装并设为全局默认；
/// - **契约 (What)**：重复调用返回 [`InstallError::AlreadyInstalled`]；外部已安装时返回
///   [`InstallError::SubscriberAlreadySet`]。
pub fn install_tracing() -> Result<(), InstallError> {
    if INSTALLED.get().is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    INSTALLED
        .set(())
        .map_err(|_| InstallError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
