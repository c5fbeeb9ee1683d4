//! HTTP/1.1 升级握手。
//!
//! # 教案级说明
//! - **意图 (Why)**：浏览器以 `GET /?ws ...` 开启连接，前 8 个字节恰好充当载体首部；
//!   首部之后的请求行剩余部分与各头部行需要在换流之前完整读完并校验；
//! - **契约 (What)**：
//!   - 应答端：[`UpgradeRequest::read_from`] 读取至空行，要求 `Upgrade: websocket`、
//!     `Connection` 含 `upgrade` 令牌（大小写不敏感）以及 `Sec-WebSocket-Key`；
//!     [`UpgradeRequest::response`] 渲染 101 响应；
//!   - 发起端：[`ClientHandshake`] 生成首部之后的请求剩余部分，并校验 101 响应与
//!     `Sec-WebSocket-Accept`；
//! - **实现 (How)**：`Sec-WebSocket-Accept = base64(SHA-1(key + GUID))`。
//!   发起端的密钥是 16 个随机字节的 base64 编码，每次握手重新抽取。

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::{RngCore, thread_rng};
use sha1::{Digest, Sha1};
use tether_core::{Contact, Operation, TransportError, TwoWayStream, TwoWayStreamExt};
use thiserror::Error;

/// RFC 6455 规定的握手 GUID。
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// 唯一支持的协议版本。
pub const WEBSOCKET_VERSION: &str = "13";

/// 请求目标中请求确认交换的查询参数。
pub const ACK_QUERY_FLAG: &str = "ack";

/// 单个请求或响应允许的头部行数。
pub const MAX_HEADER_LINES: usize = 64;

/// 升级握手错误。
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("failed to {op} upgrade lines: {source}")]
    Io {
        op: Operation,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed http line `{line}`")]
    MalformedLine { line: String },
    #[error("missing `{name}` header")]
    MissingHeader { name: &'static str },
    #[error("header `{name}` has unexpected value `{value}`")]
    InvalidHeader { name: &'static str, value: String },
    #[error("too many header lines, limit is {}", MAX_HEADER_LINES)]
    TooManyHeaders,
    #[error("unexpected upgrade status line `{line}`")]
    UnexpectedStatus { line: String },
    #[error("Sec-WebSocket-Accept mismatch, expected {expected}, received {received}")]
    AcceptMismatch { expected: String, received: String },
}

impl From<UpgradeError> for TransportError {
    fn from(err: UpgradeError) -> Self {
        match err {
            UpgradeError::Io { op, source } => TransportError::io(op, source),
            other => TransportError::protocol(other.to_string()),
        }
    }
}

/// 计算 `Sec-WebSocket-Accept`。
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// 有序头部表，名称比较大小写不敏感。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderLines(Vec<(String, String)>);

impl HeaderLines {
    /// 逐行读取头部直到空行。
    pub fn read_from<S>(stream: &mut S) -> Result<Self, UpgradeError>
    where
        S: TwoWayStream + ?Sized,
    {
        let mut headers = Vec::new();
        loop {
            let line = stream.read_line().map_err(|source| UpgradeError::Io {
                op: Operation::Read,
                source,
            })?;
            if line.is_empty() {
                return Ok(HeaderLines(headers));
            }
            if headers.len() >= MAX_HEADER_LINES {
                return Err(UpgradeError::TooManyHeaders);
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(UpgradeError::MalformedLine { line });
            };
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// 逗号分隔的令牌表中是否含有 `token`。
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|value| {
            value
                .split(',')
                .any(|item| item.trim().eq_ignore_ascii_case(token))
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn require(&self, name: &'static str) -> Result<&str, UpgradeError> {
        self.get(name).ok_or(UpgradeError::MissingHeader { name })
    }
}

/// 应答端收到的升级请求。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeRequest {
    target: String,
    headers: HeaderLines,
    key: String,
}

impl UpgradeRequest {
    /// 在 8 字节首部 `prefix` 已被读走之后，读取请求行剩余部分与头部并校验。
    pub fn read_from<S>(stream: &mut S, prefix: &str) -> Result<Self, UpgradeError>
    where
        S: TwoWayStream + ?Sized,
    {
        let rest = stream.read_line().map_err(|source| UpgradeError::Io {
            op: Operation::Read,
            source,
        })?;
        let headers = HeaderLines::read_from(stream)?;
        Self::parse(&format!("{prefix}{rest}"), headers)
    }

    /// 由完整请求行与头部表构造请求。
    pub fn parse(request_line: &str, headers: HeaderLines) -> Result<Self, UpgradeError> {
        let mut parts = request_line.split_ascii_whitespace();
        let (Some("GET"), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(UpgradeError::MalformedLine {
                line: request_line.to_owned(),
            });
        };
        if !version.starts_with("HTTP/1.") {
            return Err(UpgradeError::MalformedLine {
                line: request_line.to_owned(),
            });
        }

        let upgrade = headers.require("Upgrade")?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(UpgradeError::InvalidHeader {
                name: "Upgrade",
                value: upgrade.to_owned(),
            });
        }
        let connection = headers.require("Connection")?;
        if !headers.has_token("Connection", "upgrade") {
            return Err(UpgradeError::InvalidHeader {
                name: "Connection",
                value: connection.to_owned(),
            });
        }
        let key = headers.require("Sec-WebSocket-Key")?.to_owned();

        Ok(Self {
            target: target.to_owned(),
            headers,
            key,
        })
    }

    /// 请求目标，例如 `/?ws`。
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn headers(&self) -> &HeaderLines {
        &self.headers
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 请求目标的查询串中是否带有 `ack` 参数。
    pub fn wants_ack(&self) -> bool {
        self.target
            .split_once('?')
            .is_some_and(|(_, query)| query.split('&').any(|param| param == ACK_QUERY_FLAG))
    }

    pub fn accept(&self) -> String {
        accept_key(&self.key)
    }

    /// 渲染 101 响应；请求列出子协议时回显第一个。
    pub fn response(&self) -> String {
        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n",
            self.accept()
        );
        if let Some(protocol) = self
            .headers
            .get("Sec-WebSocket-Protocol")
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|protocol| !protocol.is_empty())
        {
            response.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
        }
        response.push_str("\r\n");
        response
    }
}

/// 发起端握手状态：保存本次请求使用的密钥以便校验响应。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientHandshake {
    key: String,
    ack: bool,
}

impl ClientHandshake {
    /// 以新抽取的 16 字节随机数作为密钥。
    pub fn new(ack: bool) -> Self {
        let mut nonce = [0u8; 16];
        thread_rng().fill_bytes(&mut nonce);
        Self::with_key(STANDARD.encode(nonce), ack)
    }

    pub fn with_key(key: impl Into<String>, ack: bool) -> Self {
        Self {
            key: key.into(),
            ack,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 首部 `GET /?ws` 之后的请求剩余部分。
    pub fn request_tail(&self, host: &Contact) -> String {
        let query = if self.ack { "&ack" } else { "" };
        let host = match host.to_socket_addr() {
            Some(addr) => addr.to_string(),
            None => format!("{}:{}", host.host(), host.port()),
        };
        format!(
            "{query} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n\
             \r\n",
            self.key
        )
    }

    /// 读取并校验 101 响应。
    pub fn read_response<S>(&self, stream: &mut S) -> Result<HeaderLines, UpgradeError>
    where
        S: TwoWayStream + ?Sized,
    {
        let status = stream.read_line().map_err(|source| UpgradeError::Io {
            op: Operation::Read,
            source,
        })?;
        let mut parts = status.split_ascii_whitespace();
        let version_ok = parts.next().is_some_and(|version| version.starts_with("HTTP/1."));
        if !version_ok || parts.next() != Some("101") {
            return Err(UpgradeError::UnexpectedStatus { line: status });
        }
        let headers = HeaderLines::read_from(stream)?;
        let expected = accept_key(&self.key);
        let received = headers.require("Sec-WebSocket-Accept")?;
        if received != expected {
            return Err(UpgradeError::AcceptMismatch {
                expected,
                received: received.to_owned(),
            });
        }
        Ok(headers)
    }
}
