//! 日志目标常量与可选的全局订阅器安装入口。
//!
//! # 教案式说明
//! - **意图（Why）**：协商、会合、成帧各层输出的 `tracing` 事件使用稳定的 target 字符串，
//!   运维可以用 `RUST_LOG=tether::transport::unix=debug` 精确打开某一层；
//! - **契约（What）**：库代码只发事件，从不自行安装订阅器；需要一键输出的二进制或测试启用
//!   `fmt-subscriber` 特性并调用 [`install_fmt_subscriber`]。

/// 稳定的日志 target。
pub mod targets {
    pub const HANDSHAKE: &str = "tether::handshake";
    pub const TCP: &str = "tether::transport::tcp";
    pub const UNIX: &str = "tether::transport::unix";
    pub const WEBSOCKET: &str = "tether::codec::websocket";
}

#[cfg(feature = "fmt-subscriber")]
pub use install::{ObservabilityError, install_fmt_subscriber};

#[cfg(feature = "fmt-subscriber")]
mod install {
    use std::sync::OnceLock;

    use tracing::dispatcher;
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

    static INSTALLED: OnceLock<()> = OnceLock::new();

    /// 订阅器安装失败的原因。
    #[derive(Debug, thiserror::Error)]
    pub enum ObservabilityError {
        #[error("tether subscriber is already installed")]
        AlreadyInstalled,
        #[error("a global tracing subscriber has already been set")]
        SubscriberAlreadySet,
        #[error("failed to set global tracing subscriber: {0}")]
        SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
    }

    /// 安装 `registry + EnvFilter + fmt` 订阅器，仅允许成功一次。
    ///
    /// - 过滤规则取自 `RUST_LOG`，缺省为 `info`；
    /// - 重复调用返回 [`ObservabilityError::AlreadyInstalled`]；
    /// - 外部已设置全局订阅器时返回 [`ObservabilityError::SubscriberAlreadySet`]。
    pub fn install_fmt_subscriber() -> Result<(), ObservabilityError> {
        if INSTALLED.get().is_some() {
            return Err(ObservabilityError::AlreadyInstalled);
        }
        if dispatcher::has_been_set() {
            return Err(ObservabilityError::SubscriberAlreadySet);
        }

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        tracing::subscriber::set_global_default(subscriber)?;

        INSTALLED
            .set(())
            .map_err(|_| ObservabilityError::AlreadyInstalled)
    }

}
