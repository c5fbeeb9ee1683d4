//! 传输层错误域。
//!
//! # 教案级说明
//! - **意图 (Why)**：协商失败、会合失败、成帧错误与普通 IO 错误需要在日志中被精确区分，
//!   因此每个变体都携带稳定错误码（`tether.<层>.<语义>`），与底层 `io::Error` 一并保留。
//! - **契约 (What)**：本层所有可失败操作均返回 [`Result`]，不使用 panic 做控制流；
//!   调用方据此决定重试或放弃。
//! - **注意事项 (Trade-offs)**：超时类写错误（`WouldBlock`/`TimedOut`）单独识别，
//!   以便慢消费者场景下保持流开启，见 [`is_timeout_kind`]。

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{contact::Contact, header::Header};

/// 底层操作类别，用于生成稳定错误码与日志文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Bind,
    Listen,
    Accept,
    Connect,
    Read,
    Write,
    Flush,
    Shutdown,
    Configure,
}

impl Operation {
    /// 返回该操作失败时使用的稳定错误码。
    pub const fn code(self) -> &'static str {
        match self {
            Operation::Bind => "tether.transport.bind_failed",
            Operation::Listen => "tether.transport.listen_failed",
            Operation::Accept => "tether.transport.accept_failed",
            Operation::Connect => "tether.transport.connect_failed",
            Operation::Read => "tether.transport.read_failed",
            Operation::Write => "tether.transport.write_failed",
            Operation::Flush => "tether.transport.flush_failed",
            Operation::Shutdown => "tether.transport.shutdown_failed",
            Operation::Configure => "tether.transport.configure_failed",
        }
    }

    /// 返回面向日志的简短操作名。
    pub const fn label(self) -> &'static str {
        match self {
            Operation::Bind => "bind",
            Operation::Listen => "listen",
            Operation::Accept => "accept",
            Operation::Connect => "connect",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Flush => "flush",
            Operation::Shutdown => "shutdown",
            Operation::Configure => "configure",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// 载体协商与字节流层的统一错误类型。
///
/// # 教案级说明
/// - **Why**：把“协商不匹配”“会合失败”“成帧错误”“普通 IO 失败”归入同一枚举，
///   让握手驱动可以统一记录日志并把失败上报给连接的所有者。
/// - **What**：
///   - `Io`：底层系统调用失败，保留 [`Operation`] 与原始错误；
///   - `UnknownCarrier` / `HeaderMismatch`：找不到载体或首部不匹配，属于非致命的协商失败；
///   - `AckMismatch`：确认令牌与 `ACK\0` 不一致；
///   - `Rendezvous`：Unix 域套接字会合失败，附带路径与尝试次数；
///   - `NotLocal`：本地载体要求两端位于同一主机；
///   - `Protocol`：成帧或 HTTP 升级解析错误，流不可再用；
///   - `Negotiation`：其余握手阶段的失败；
///   - `StreamClosed`：连接已不再持有字节流；
///   - `Config`：配置值非法。
/// - **How**：通过 [`TransportError::code`] 获得稳定错误码，供日志字段 `code` 使用。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{op} failed: {source}")]
    Io {
        op: Operation,
        #[source]
        source: io::Error,
    },
    #[error("no carrier registered under name `{name}`")]
    UnknownCarrier { name: String },
    #[error("header {header} does not match any registered carrier")]
    HeaderMismatch { header: Header },
    #[error("acknowledgement mismatch, received {}", .received.escape_ascii())]
    AckMismatch { received: [u8; 4] },
    #[error("rendezvous on {} failed after {attempts} attempt(s): {source}", .path.display())]
    Rendezvous {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("carrier requires a local peer, local={local} remote={remote}")]
    NotLocal { local: Contact, remote: Contact },
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },
    #[error("negotiation failed: {reason}")]
    Negotiation { reason: String },
    #[error("stream is closed")]
    StreamClosed,
    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl TransportError {
    /// 将 IO 错误与操作类别绑定。
    pub fn io(op: Operation, source: io::Error) -> Self {
        TransportError::Io { op, source }
    }

    /// 构造成帧/解析错误。
    pub fn protocol(reason: impl Into<String>) -> Self {
        TransportError::Protocol {
            reason: reason.into(),
        }
    }

    /// 构造握手阶段错误。
    pub fn negotiation(reason: impl Into<String>) -> Self {
        TransportError::Negotiation {
            reason: reason.into(),
        }
    }

    /// 构造配置错误。
    pub fn config(reason: impl Into<String>) -> Self {
        TransportError::Config {
            reason: reason.into(),
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Io { op, .. } => op.code(),
            TransportError::UnknownCarrier { .. } => "tether.handshake.unknown_carrier",
            TransportError::HeaderMismatch { .. } => "tether.handshake.header_mismatch",
            TransportError::AckMismatch { .. } => "tether.handshake.ack_mismatch",
            TransportError::Rendezvous { .. } => "tether.transport.unix.rendezvous_failed",
            TransportError::NotLocal { .. } => "tether.transport.unix.not_local",
            TransportError::Protocol { .. } => "tether.codec.protocol_violation",
            TransportError::Negotiation { .. } => "tether.handshake.failed",
            TransportError::StreamClosed => "tether.transport.stream_closed",
            TransportError::Config { .. } => "tether.config.invalid",
        }
    }

    /// 判断错误是否属于超时类。
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Io { source, .. } | TransportError::Rendezvous { source, .. } => {
                is_timeout_kind(source.kind())
            }
            _ => false,
        }
    }
}

/// 超时类错误：写路径遇到它们时保持流开启。
pub fn is_timeout_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// 本层统一的结果别名。
pub type Result<T, E = TransportError> = core::result::Result<T, E>;
