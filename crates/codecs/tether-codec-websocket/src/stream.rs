//! 成帧适配流：在字节流之上收发 WebSocket 帧，对上层呈现普通字节流。

use std::{fmt, io};

use bytes::{Buf, Bytes};
use tether_core::{
    BoxedStream, Contact, InterruptHandle, StreamIo, TwoWayStream, observability::targets,
};
use tracing::{debug, trace};

use crate::frame::{FrameError, FrameType, get_frame, make_frame};

/// WebSocket 成帧适配流。
///
/// # 教案级说明
/// - **Why**：协商完成后，WebSocket 载体用它替换原始 TCP 流，消息收发因此与普通 TCP 无异；
/// - **What**：
///   - `write` 把整个缓冲封装为一帧二进制消息，一次写出；
///   - `read` 尽量填满调用方缓冲：内部缓冲耗尽时继续拉取下一帧，非数据帧被丢弃；
///   - 关闭帧对应的退出哨兵作为数据交付，之后流报告不可用；
///   - 底层流在两帧之间干净关闭时 `read` 返回 `Ok(0)`，与普通字节流的 EOF 一致；
///   - 任何解码错误都会使流不可用，不尝试重同步。
pub struct WebSocketStream<S = BoxedStream> {
    inner: S,
    buffer: Bytes,
    happy: bool,
}

impl<S: TwoWayStream> WebSocketStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Bytes::new(),
            happy: true,
        }
    }

    /// 已解码但尚未被读取的字节数。
    pub fn buffered(&self) -> usize {
        self.buffer.remaining()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// 拉取下一帧数据；返回 `false` 表示流已结束。
    fn fill(&mut self) -> io::Result<bool> {
        loop {
            if !self.happy {
                return Ok(false);
            }
            let frame = match get_frame(&mut StreamIo::new(&mut self.inner)) {
                Ok(frame) => frame,
                Err(FrameError::Closed) => {
                    debug!(
                        target: targets::WEBSOCKET,
                        remote = %self.inner.remote_address(),
                        "websocket transport closed between frames"
                    );
                    self.happy = false;
                    return Ok(false);
                }
                Err(err) => {
                    self.happy = false;
                    return Err(err.into());
                }
            };
            match frame.kind {
                FrameType::Text | FrameType::Binary => {
                    if frame.payload.is_empty() {
                        continue;
                    }
                    self.buffer = frame.payload;
                    return Ok(true);
                }
                FrameType::Ping | FrameType::Pong => {
                    trace!(target: targets::WEBSOCKET, kind = ?frame.kind, "skipping control frame");
                }
                FrameType::Close => {
                    debug!(
                        target: targets::WEBSOCKET,
                        remote = %self.inner.remote_address(),
                        "peer closed websocket"
                    );
                    self.buffer = frame.payload;
                    self.happy = false;
                    return Ok(true);
                }
                FrameType::Error => {
                    self.happy = false;
                    return Err(FrameError::UnsupportedOpcode {
                        opcode: frame.opcode,
                    }
                    .into());
                }
            }
        }
    }
}

impl<S: TwoWayStream> TwoWayStream for WebSocketStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            if !self.buffer.has_remaining() {
                match self.fill() {
                    Ok(true) => {}
                    Ok(false) => break,
                    // 已交付的字节优先返回，错误在下一次读取时由 `happy == false` 体现为 EOF。
                    Err(_) if filled > 0 => break,
                    Err(err) => return Err(err),
                }
            }
            let n = (buf.len() - filled).min(self.buffer.remaining());
            self.buffer.copy_to_slice(&mut buf[filled..filled + n]);
            filled += n;
        }
        Ok(filled)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let frame = make_frame(buf);
        self.inner.write(&frame).inspect_err(|_| self.happy = false)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) {
        self.happy = false;
        self.inner.close();
    }

    fn is_ok(&self) -> bool {
        self.happy && self.inner.is_ok()
    }

    fn local_address(&self) -> &Contact {
        self.inner.local_address()
    }

    fn remote_address(&self) -> &Contact {
        self.inner.remote_address()
    }

    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        self.inner.interrupt_handle()
    }
}

impl<S> fmt::Debug for WebSocketStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketStream")
            .field("buffered", &self.buffer.len())
            .field("happy", &self.happy)
            .finish()
    }
}
