//! 载体协商策略。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 每种传输方式（TCP、Unix 域套接字、WebSocket……）在连接建立阶段有各自的首部签名、确认需求
//!   与“是否替换底层流”的决定，[`Carrier`] 把这些差异收敛为一组策略方法；
//! - 协商驱动 [`crate::Connection`] 只按固定顺序调用这些方法，不感知具体载体。
//!
//! ## 契约（What）
//! - [`Carrier::check_header`] 与 [`Carrier::get_header`] 是纯函数；
//! - [`Carrier::respond_to_header`] 与 [`Carrier::expect_reply_to_header`] 执行 IO，
//!   并可通过 [`ConnectionState::take_streams`] 替换底层流；
//! - 注册表中保存的是原型，实际协商总是使用 [`Carrier::create`] 得到的新实例。
//!
//! ## 逻辑（How）
//! - 默认实现覆盖最常见的行为：首部之后发送发送端名、按 `ACK\0` 令牌交换确认、索引为空操作；
//! - 组合型载体（如 WebSocket 复用 TCP）通过持有内部载体并转发调用实现，而非继承。

use crate::{
    config::CarrierOptions,
    connection::ConnectionState,
    error::{Operation, Result, TransportError},
    header::{ACK_TOKEN, HEADER_LEN},
    route::Route,
    stream::{TwoWayStream, TwoWayStreamExt},
};

/// 发送端名的长度上限（含结尾 NUL）。
pub const MAX_SENDER_NAME_LEN: usize = 4096;

/// 载体协商策略。
pub trait Carrier: Send + Sync {
    /// 载体名，与连接说明串中的名称一致。
    fn name(&self) -> &str;

    /// 生成一个处于初始配置的新实例。
    fn create(&self) -> Box<dyn Carrier>;

    /// 是否在握手及每条消息之后交换确认令牌。
    fn require_ack(&self) -> bool {
        false
    }

    fn is_connectionless(&self) -> bool {
        false
    }

    /// 是否可以被发起端主动选用。仅用于应答的载体（例如浏览器发起的 WebSocket）返回 `false`。
    fn can_offer(&self) -> bool {
        true
    }

    /// 判断 8 字节首部是否属于本载体；长度不符时返回 `false`。
    fn check_header(&self, header: &[u8]) -> bool;

    /// 写出本载体当前配置下的签名，最多写 `min(buf.len(), 8)` 字节。
    fn get_header(&self, buf: &mut [u8]);

    /// 发起端在发送首部前应用连接说明串中的限定符。
    fn configure(&mut self, options: &CarrierOptions) -> Result<()> {
        let _ = options;
        Ok(())
    }

    /// 应答端根据匹配到的首部推断配置（例如确认变体）。
    fn set_parameters(&mut self, header: &[u8]) {
        let _ = header;
    }

    /// 发起端：写出首部与发送端名。
    fn send_header(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        let mut header = [0u8; HEADER_LEN];
        self.get_header(&mut header);
        let from = state.route().from_name().to_owned();
        let stream = state.streams()?;
        stream
            .write(&header)
            .map_err(|err| TransportError::io(Operation::Write, err))?;
        write_sender_specifier(stream, &from)
    }

    /// 应答端：读取发送端名并写入路由。
    fn expect_sender_specifier(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        let from = read_sender_specifier(state.streams()?)?;
        let route = state.route().with_from_name(from);
        state.set_route(route);
        Ok(())
    }

    /// 应答端：完成会合或换流。
    fn respond_to_header(&mut self, state: &mut dyn ConnectionState) -> Result<()>;

    /// 发起端：校验应答并完成对应的会合或换流。
    fn expect_reply_to_header(&mut self, state: &mut dyn ConnectionState) -> Result<()>;

    /// 写消息前发送的元数据，默认不发送。
    fn send_index(&mut self, state: &mut dyn ConnectionState, len: usize) -> Result<()> {
        let _ = (state, len);
        Ok(())
    }

    /// 读消息前接收元数据；返回对端宣告的消息长度（若载体支持）。
    fn expect_index(&mut self, state: &mut dyn ConnectionState) -> Result<Option<usize>> {
        let _ = state;
        Ok(None)
    }

    fn send_ack(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        if !self.require_ack() {
            return Ok(());
        }
        state
            .streams()?
            .write(&ACK_TOKEN)
            .map_err(|err| TransportError::io(Operation::Write, err))
    }

    fn expect_ack(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        if !self.require_ack() {
            return Ok(());
        }
        let mut received = [0u8; 4];
        state
            .streams()?
            .read_full(&mut received)
            .map_err(|err| TransportError::io(Operation::Read, err))?;
        if received != ACK_TOKEN {
            return Err(TransportError::AckMismatch { received });
        }
        Ok(())
    }

    /// 连接关闭时释放载体自身持有的资源。
    fn close(&mut self) {}
}

/// 写出发送端名：4 字节小端长度（含 NUL）+ 名称 + NUL。
pub fn write_sender_specifier<S>(stream: &mut S, name: &str) -> Result<()>
where
    S: TwoWayStream + ?Sized,
{
    let len = u32::try_from(name.len() + 1)
        .ok()
        .filter(|len| (*len as usize) <= MAX_SENDER_NAME_LEN)
        .ok_or_else(|| TransportError::negotiation("sender name too long"))?;
    let mut frame = Vec::with_capacity(4 + name.len() + 1);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(name.as_bytes());
    frame.push(0);
    stream
        .write(&frame)
        .map_err(|err| TransportError::io(Operation::Write, err))
}

/// 读取 [`write_sender_specifier`] 写出的发送端名。
pub fn read_sender_specifier<S>(stream: &mut S) -> Result<String>
where
    S: TwoWayStream + ?Sized,
{
    let mut len = [0u8; 4];
    stream
        .read_full(&mut len)
        .map_err(|err| TransportError::io(Operation::Read, err))?;
    let len = u32::from_le_bytes(len) as usize;
    if len == 0 || len > MAX_SENDER_NAME_LEN {
        return Err(TransportError::negotiation(format!(
            "sender name length {len} out of range"
        )));
    }
    let mut name = vec![0u8; len];
    stream
        .read_full(&mut name)
        .map_err(|err| TransportError::io(Operation::Read, err))?;
    if let Some(end) = name.iter().position(|b| *b == 0) {
        name.truncate(end);
    }
    String::from_utf8(name).map_err(|_| TransportError::negotiation("sender name is not utf-8"))
}

/// 路由中的发起端名；空名称以 `anonymous` 代替，便于日志阅读。
pub fn display_sender(route: &Route) -> &str {
    match route.from_name() {
        "" => "anonymous",
        name => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ScriptedStream;

    #[test]
    fn sender_specifier_layout() {
        let mut out = ScriptedStream::new(b"");
        write_sender_specifier(&mut out, "/cam").unwrap();
        assert_eq!(out.written(), b"\x05\x00\x00\x00/cam\x00");

        let mut input = ScriptedStream::new(&out.written());
        assert_eq!(read_sender_specifier(&mut input).unwrap(), "/cam");
    }

    #[test]
    fn sender_specifier_rejects_absurd_length() {
        let mut input = ScriptedStream::new(b"\xff\xff\xff\x7f");
        let err = read_sender_specifier(&mut input).unwrap_err();
        assert_eq!(err.code(), "tether.handshake.failed");
    }

    #[test]
    fn display_sender_names_anonymous_routes() {
        assert_eq!(display_sender(&Route::default()), "anonymous");
        assert_eq!(display_sender(&Route::new("/a", "/b", "tcp")), "/a");
    }
}
