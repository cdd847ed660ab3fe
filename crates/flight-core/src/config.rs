//! 编解码两端共享的配置。
//!
//! ## 契约（What）
//! - [`Mode`] 决定错误行是否携带原始消息：生产模式只传摘要，开发模式额外传消息；
//! - `max_row_bytes` 限制解码端单行缓冲上限，`None` 表示不限制；
//! - 所有字段均有缺省值，TOML 中缺省的键按默认值补齐，未知键视为配置错误。

use serde::Deserialize;

use crate::error::FlightError;

/// 运行模式。
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// 面向不可信分发：错误只携带摘要。
    #[default]
    Production,
    /// 开发诊断：错误额外携带原始消息。
    Development,
}

impl Mode {
    /// 是否为开发模式。
    pub fn is_development(self) -> bool {
        matches!(self, Mode::Development)
    }
}

/// Flight 配置快照。
///
/// # 教案式说明
/// - **意图 (Why)**：把“是否泄露错误消息”“单行预算”等决策集中成一份可序列化的值，
///   宿主既可在代码里构造，也可从 TOML 文件加载；
/// - **契约 (What)**：`Default` 为生产模式且不限制行长；
/// - **风险 (Trade-offs)**：开启开发模式会把生产者错误消息发给对端，只应在受信环境使用。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FlightConfig {
    /// 运行模式。
    pub mode: Mode,
    /// 解码端单行字节上限。
    pub max_row_bytes: Option<usize>,
}

impl FlightConfig {
    /// 以开发模式构造。
    pub fn development() -> Self {
        Self {
            mode: Mode::Development,
            ..Self::default()
        }
    }

    /// 覆盖运行模式。
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// 覆盖单行字节上限。
    pub fn with_max_row_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_row_bytes = limit;
        self
    }

    /// 从 TOML 文本解析配置。
    ///
    /// ```
    /// use flight_core::{FlightConfig, Mode};
    ///
    /// let config = FlightConfig::from_toml_str("mode = \"development\"\nmax_row_bytes = 4096")
    ///     .expect("valid config");
    /// assert_eq!(config.mode, Mode::Development);
    /// assert_eq!(config.max_row_bytes, Some(4096));
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, FlightError> {
        let config: FlightConfig = toml::from_str(text).map_err(|err| FlightError::Config {
            reason: err.to_string(),
        })?;
        if config.max_row_bytes == Some(0) {
            return Err(FlightError::Config {
                reason: "max_row_bytes must be greater than zero".to_owned(),
            });
        }
        Ok(config)
    }
}
