//! WebSocket 帧编解码。
//!
//! # 教案级总览
//! - **定位 (Why)**：成帧适配流 [`crate::WebSocketStream`] 在读写消息时需要把载荷与 RFC 6455
//!   帧互相转换，本模块集中处理长度字段、掩码与 opcode 分类；
//! - **契约 (What)**：
//!   - [`make_frame`] 生成单帧二进制消息，FIN 置位、不加掩码，头部与载荷位于同一缓冲；
//!   - [`get_frame`] 从任意 `io::Read` 中读取一帧：先读 2 字节基础头部，再按需读取扩展长度、
//!     掩码键与载荷，并原地解掩码；
//!   - 关闭帧不读取载荷，直接返回固定的 10 字节退出哨兵 [`CLOSE_SENTINEL`]；
//! - **风险提示 (Trade-offs)**：解码不做重同步，任何短读都以错误返回，调用方应视流为不可用。

use std::io::{self, Read};

use bytes::{BufMut, Bytes, BytesMut};
use tether_core::{Operation, TransportError, observability::targets};
use thiserror::Error;
use tracing::trace;

/// FIN 标志位，位于首字节最高位。
pub const FLAG_FIN: u8 = 0x80;
/// MASK 标志位，位于第二字节最高位。
pub const FLAG_MASK: u8 = 0x80;

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

/// 收到关闭帧时交给上层的退出消息，上层据此走正常的关闭流程。
pub const CLOSE_SENTINEL: [u8; 10] = [0x00, 0x00, 0x00, 0x00, 0x7e, 0x00, 0x00, 0x01, 0x71, 0x00];

/// 帧的语义分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameType {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
    /// 无法识别的 opcode。
    Error,
}

impl FrameType {
    /// continuation 帧按文本处理，与单帧消息的读取路径一致。
    pub const fn from_opcode(opcode: u8) -> Self {
        match opcode {
            OPCODE_CONTINUATION | OPCODE_TEXT => FrameType::Text,
            OPCODE_BINARY => FrameType::Binary,
            OPCODE_CLOSE => FrameType::Close,
            OPCODE_PING => FrameType::Ping,
            OPCODE_PONG => FrameType::Pong,
            _ => FrameType::Error,
        }
    }

    /// 是否携带应用数据。
    pub const fn is_data(self) -> bool {
        matches!(self, FrameType::Text | FrameType::Binary)
    }
}

/// 解码得到的一帧。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameType,
    pub opcode: u8,
    pub payload: Bytes,
}

/// 帧编解码错误。
///
/// # 教案级说明
/// - **Why**：区分“底层读失败”与“对端违反协议”，前者保留原始 `io::Error` 供调用方判断超时，
///   后者只需要一条可读的原因；
/// - **What**：通过 `From` 转换为 [`TransportError`] 或 `io::Error`，分别服务于协商层与
///   [`tether_core::TwoWayStream`] 的读接口。
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to read websocket frame {stage}")]
    Io {
        stage: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("websocket payload truncated: announced {expected} bytes, received {actual}")]
    Truncated { expected: u64, actual: u64 },
    #[error("unsupported websocket opcode {opcode:#x}")]
    UnsupportedOpcode { opcode: u8 },
    /// 对端在两帧之间干净地关闭了连接。
    #[error("websocket peer closed the connection between frames")]
    Closed,
}

impl FrameError {
    fn io(stage: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| FrameError::Io { stage, source }
    }
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io { source, .. } => TransportError::io(Operation::Read, source),
            FrameError::Closed => TransportError::io(
                Operation::Read,
                io::Error::new(io::ErrorKind::UnexpectedEof, err),
            ),
            other => TransportError::protocol(other.to_string()),
        }
    }
}

impl From<FrameError> for io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io { source, .. } => source,
            FrameError::Truncated { .. } | FrameError::Closed => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err)
            }
            FrameError::UnsupportedOpcode { .. } => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}

/// 以二进制 opcode 封装一条消息。
pub fn make_frame(payload: &[u8]) -> Bytes {
    encode_frame(OPCODE_BINARY, payload, None)
}

/// 按给定 opcode 编码单帧，`mask` 为 `Some` 时设置 MASK 位并对载荷加掩码。
pub fn encode_frame(opcode: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Bytes {
    let mut frame = BytesMut::with_capacity(14 + payload.len());
    frame.put_u8(FLAG_FIN | (opcode & 0x0F));
    let mask_flag = if mask.is_some() { FLAG_MASK } else { 0 };
    encode_length(payload.len(), mask_flag, &mut frame);
    match mask {
        Some(key) => {
            frame.put_slice(&key);
            let start = frame.len();
            frame.put_slice(payload);
            apply_mask(&mut frame[start..], key);
        }
        None => frame.put_slice(payload),
    }
    frame.freeze()
}

/// 原地异或掩码；对同一缓冲施加两次得到原文。
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (index, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[index % 4];
    }
}

/// 写入长度字段：不超过 125 直接写入，不超过 65535 写 126 + u16，其余写 127 + u64，均为大端。
fn encode_length(len: usize, mask_flag: u8, out: &mut BytesMut) {
    if len <= 125 {
        out.put_u8(mask_flag | len as u8);
    } else if len <= usize::from(u16::MAX) {
        out.put_u8(mask_flag | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(mask_flag | 127);
        out.put_u64(len as u64);
    }
}

/// 从读取端解码一帧。
///
/// # 教案级说明
/// - **流程 (How)**：
///   1. 读取 2 字节基础头部，低 4 位为 opcode，第二字节最高位为 MASK；
///      首字节之前即遇到 EOF 时返回 [`FrameError::Closed`]；
///   2. 关闭帧立即返回 [`CLOSE_SENTINEL`]，不再读取后续字节；
///   3. 解析 7 位长度，126 时再读 u16，127 时再读 u64；
///   4. 带掩码时读取 4 字节掩码键，随后读取载荷并解掩码；
/// - **契约 (What)**：ping/pong 帧的载荷会被读出并随帧返回，调用方丢弃即可，
///   读取位置始终与下一帧头部对齐；
/// - **注意事项**：载荷按实际到达的字节增长缓冲，不会依据对端宣告的长度预先分配。
pub fn get_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: Read + ?Sized,
{
    let mut head = [0u8; 2];
    if read_first_byte(reader, &mut head[0])? == 0 {
        return Err(FrameError::Closed);
    }
    reader
        .read_exact(&mut head[1..])
        .map_err(FrameError::io("header"))?;
    let opcode = head[0] & 0x0F;
    let masked = head[1] & FLAG_MASK != 0;
    let kind = FrameType::from_opcode(opcode);

    if kind == FrameType::Close {
        trace!(target: targets::WEBSOCKET, "received close frame");
        return Ok(Frame {
            kind,
            opcode,
            payload: Bytes::from_static(&CLOSE_SENTINEL),
        });
    }

    let mut len = u64::from(head[1] & 0x7F);
    if len == 126 {
        let mut ext = [0u8; 2];
        reader
            .read_exact(&mut ext)
            .map_err(FrameError::io("extended length"))?;
        len = u64::from(u16::from_be_bytes(ext));
    } else if len == 127 {
        let mut ext = [0u8; 8];
        reader
            .read_exact(&mut ext)
            .map_err(FrameError::io("extended length"))?;
        len = u64::from_be_bytes(ext);
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        reader
            .read_exact(&mut key)
            .map_err(FrameError::io("mask key"))?;
        Some(key)
    } else {
        None
    };

    let mut payload = Vec::new();
    let actual = Read::take(&mut *reader, len)
        .read_to_end(&mut payload)
        .map_err(FrameError::io("payload"))? as u64;
    if actual < len {
        return Err(FrameError::Truncated {
            expected: len,
            actual,
        });
    }
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    trace!(
        target: targets::WEBSOCKET,
        opcode,
        len,
        masked,
        "decoded websocket frame"
    );
    Ok(Frame {
        kind,
        opcode,
        payload: Bytes::from(payload),
    })
}

/// 读取帧首字节，返回读到的字节数（0 表示 EOF）。
fn read_first_byte<R>(reader: &mut R, byte: &mut u8) -> Result<usize, FrameError>
where
    R: Read + ?Sized,
{
    loop {
        match reader.read(std::slice::from_mut(byte)) {
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::io("header")(err)),
        }
    }
}
