//! 载体首部与确认令牌。
//!
//! 连接建立后发送的前 8 个字节标识所用载体；响应端逐字节比对已注册载体的签名集合。

use std::fmt;

/// 首部固定长度。
pub const HEADER_LEN: usize = 8;

/// 需要确认的载体在握手与每条消息之后交换的令牌。
pub const ACK_TOKEN: [u8; 4] = *b"ACK\0";

/// 8 字节载体首部。
///
/// # 教案级说明
/// - **Why**：首部既是协议指纹也是参数通道（同一载体的“带确认”变体使用不同签名），
///   因此需要一个按字节精确比较、长度固定的值类型。
/// - **What**：[`Header::from_slice`] 在长度不等于 [`HEADER_LEN`] 时返回 `None`，
///   不会越界读取；[`Header::matches`] 同样先比较长度再比较内容。
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header([u8; HEADER_LEN]);

impl Header {
    pub const fn new(bytes: [u8; HEADER_LEN]) -> Self {
        Self(bytes)
    }

    /// 从任意切片构造，长度不符时返回 `None`。
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; HEADER_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub const fn as_bytes(&self) -> &[u8; HEADER_LEN] {
        &self.0
    }

    /// 按字节精确比较；长度不同直接返回 `false`。
    pub fn matches(&self, candidate: &[u8]) -> bool {
        candidate.len() == HEADER_LEN && candidate == self.0
    }

    /// 把签名写入调用方缓冲，最多写 `min(buf.len(), HEADER_LEN)` 个字节。
    pub fn write_into(&self, buf: &mut [u8]) {
        let len = buf.len().min(HEADER_LEN);
        buf[..len].copy_from_slice(&self.0[..len]);
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Header(\"{}\")", self.0.escape_ascii())
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.escape_ascii())
    }
}
