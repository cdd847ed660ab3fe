//! 错误摘要：把生产者错误换成可以安全跨线传输的负载。

use std::{fmt, sync::Arc};

use flight_core::{ErrorPayload, Mode, observability::targets};

/// 错误回调：返回摘要，`None` 表示不附带摘要。
pub type OnError = Arc<dyn Fn(&anyhow::Error) -> Option<String> + Send + Sync>;

/// 错误上报器。
///
/// # 教案式说明
/// - **意图 (Why)**：同一个失败点只调用一次用户回调；依赖它的标识符在解码端级联失败，
///   不会再次回到编码端；
/// - **契约 (What)**：生产模式的负载只有 `digest`，开发模式额外带上错误的 `Display` 文本；
/// - **风险 (Trade-offs)**：开发模式消息只取最外层描述，不包含 `anyhow` 的上下文链。
#[derive(Clone)]
pub(crate) struct ErrorReporter {
    on_error: Option<OnError>,
    mode: Mode,
}

impl ErrorReporter {
    pub(crate) fn new(on_error: Option<OnError>, mode: Mode) -> Self {
        Self { on_error, mode }
    }

    pub(crate) fn report(&self, error: &anyhow::Error) -> ErrorPayload {
        let digest = self.on_error.as_ref().and_then(|on_error| on_error(error));
        tracing::warn!(
            target: targets::SERVER,
            error = %error,
            digest = digest.as_deref().unwrap_or(""),
            "producer failure reported"
        );
        ErrorPayload {
            digest,
            message: self.mode.is_development().then(|| error.to_string()),
        }
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }
}

impl fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("on_error", &self.on_error.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_of_message() -> OnError {
        Arc::new(|err: &anyhow::Error| Some(format!("digest(\"{err}\")")))
    }

    #[test]
    fn production_payload_hides_the_message() {
        let reporter = ErrorReporter::new(Some(digest_of_message()), Mode::Production);
        let payload = reporter.report(&anyhow::anyhow!("Game over"));
        assert_eq!(payload.digest.as_deref(), Some("digest(\"Game over\")"));
        assert_eq!(payload.message, None);
    }

    #[test]
    fn development_payload_carries_the_message() {
        let reporter = ErrorReporter::new(None, Mode::Development);
        let payload = reporter.report(&anyhow::anyhow!("Game over"));
        assert_eq!(payload.digest, None);
        assert_eq!(payload.message.as_deref(), Some("Game over"));
    }
}
