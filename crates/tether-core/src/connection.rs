//! 连接状态与握手驱动。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 载体在协商期间需要读写原始流、修改路由，甚至用会合流或成帧适配器替换原始流；
//!   [`ConnectionState`] 把这些能力以最小接口暴露给载体；
//! - [`Connection`] 以固定顺序驱动载体的各个步骤，并记录状态迁移轨迹，
//!   测试可以据此断言状态机路径。
//!
//! ## 契约（What）
//! - 发起端路径：`Idle → HeaderSent → IndexExchanged → (AckExchanged) → Established`；
//! - 应答端路径：`Idle → HeaderAwaited → RendezvousOrSwap → IndexExchanged → (AckExchanged) → Established`；
//! - 任一步失败即进入 `Failed`：连接关闭自身持有的流，不留下半安装状态，错误返回给调用方；
//!   本层不做重试。
//!
//! ## 设计权衡（Trade-offs）
//! - 连接状态 [`ConnectionLink`] 与载体分开存放，驱动调用 `carrier.step(&mut link)` 时不会出现
//!   对同一结构的重复可变借用。

use std::fmt;

use tracing::{debug, warn};

use crate::{
    carrier::{Carrier, display_sender},
    config::CarrierSpec,
    error::{Operation, Result, TransportError},
    header::HEADER_LEN,
    observability::targets,
    registry::Carriers,
    route::Route,
    stream::{BoxedStream, InterruptHandle, TwoWayStream, TwoWayStreamExt},
};

/// 首部无法识别时写回对端的提示文本。
pub const PROTOCOL_NOT_FOUND_NOTICE: &str = "* Error. Protocol not found.\r\n\
* The first 8 bytes sent to this port identify the carrier to use,\r\n\
* and the bytes received do not match any registered carrier.\r\n\
* Goodbye.\r\n";

/// 载体在协商期间可见的连接状态。
pub trait ConnectionState {
    fn route(&self) -> &Route;

    fn set_route(&mut self, route: Route);

    /// 当前持有的流；流已被取走时返回 [`TransportError::StreamClosed`]。
    fn streams(&mut self) -> Result<&mut BoxedStream>;

    /// 安装新流。此前持有的流会被关闭。
    fn take_streams(&mut self, streams: BoxedStream);

    /// 取走当前持有的流，所有权转交给调用方。
    fn give_streams(&mut self) -> Option<BoxedStream>;
}

/// [`ConnectionState`] 的标准实现：一条可选的流加一条路由。
pub struct ConnectionLink {
    stream: Option<BoxedStream>,
    route: Route,
}

impl ConnectionLink {
    pub fn new(stream: BoxedStream, route: Route) -> Self {
        Self {
            stream: Some(stream),
            route,
        }
    }

    /// 关闭并丢弃持有的流；重复调用无副作用。
    pub fn close_streams(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }

    pub fn has_streams(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_ok(&self) -> bool {
        self.stream.as_ref().is_some_and(|stream| stream.is_ok())
    }
}

impl ConnectionState for ConnectionLink {
    fn route(&self) -> &Route {
        &self.route
    }

    fn set_route(&mut self, route: Route) {
        self.route = route;
    }

    fn streams(&mut self) -> Result<&mut BoxedStream> {
        self.stream.as_mut().ok_or(TransportError::StreamClosed)
    }

    fn take_streams(&mut self, streams: BoxedStream) {
        if let Some(mut previous) = self.stream.replace(streams) {
            previous.close();
        }
    }

    fn give_streams(&mut self) -> Option<BoxedStream> {
        self.stream.take()
    }
}

/// 握手状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    Idle,
    HeaderSent,
    HeaderAwaited,
    RendezvousOrSwap,
    IndexExchanged,
    AckExchanged,
    Established,
    Failed,
}

impl HandshakeState {
    pub const fn label(self) -> &'static str {
        match self {
            HandshakeState::Idle => "idle",
            HandshakeState::HeaderSent => "header_sent",
            HandshakeState::HeaderAwaited => "header_awaited",
            HandshakeState::RendezvousOrSwap => "rendezvous_or_swap",
            HandshakeState::IndexExchanged => "index_exchanged",
            HandshakeState::AckExchanged => "ack_exchanged",
            HandshakeState::Established => "established",
            HandshakeState::Failed => "failed",
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 状态迁移轨迹，按发生顺序记录。
pub type HandshakeTrace = Vec<HandshakeState>;

/// 一条正在协商或已建立的连接。
///
/// # 教案级说明
/// - **Why**：把“选择载体 → 交换首部 → 会合/换流 → 确认”的固定流程集中在一处，
///   各载体只实现差异部分；
/// - **What**：
///   - [`Connection::initiate`] / [`Connection::respond`] 执行两端的握手；
///   - [`Connection::write_message`]、[`Connection::begin_read`]、[`Connection::read`]、
///     [`Connection::end_read`] 在建立后收发消息，并按载体要求交换索引与确认；
///   - [`Connection::close`] 幂等，若存在尚未发送的确认会先补发；
/// - **How**：每次状态迁移都写入轨迹并发出 `debug` 事件，失败时发出带错误码的 `warn` 事件。
pub struct Connection {
    link: ConnectionLink,
    carrier: Option<Box<dyn Carrier>>,
    state: HandshakeState,
    trace: HandshakeTrace,
    pending_ack: bool,
}

impl Connection {
    /// 以发起端身份包装一条刚建立的流，路由的载体字段为连接说明串。
    pub fn outgoing(stream: BoxedStream, route: Route) -> Self {
        Self::with_link(ConnectionLink::new(stream, route))
    }

    /// 以应答端身份包装一条刚接受的流。
    pub fn incoming(stream: BoxedStream, local_name: impl Into<String>) -> Self {
        Self::with_link(ConnectionLink::new(
            stream,
            Route::new("", local_name, ""),
        ))
    }

    fn with_link(link: ConnectionLink) -> Self {
        Self {
            link,
            carrier: None,
            state: HandshakeState::Idle,
            trace: vec![HandshakeState::Idle],
            pending_ack: false,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn trace(&self) -> &[HandshakeState] {
        &self.trace
    }

    pub fn route(&self) -> &Route {
        self.link.route()
    }

    pub fn carrier(&self) -> Option<&dyn Carrier> {
        self.carrier.as_deref()
    }

    /// 当前持有的流，协商成功后可能已被载体替换。
    pub fn stream(&mut self) -> Result<&mut BoxedStream> {
        self.link.streams()
    }

    /// 取走底层流；连接随后不再可用。
    pub fn into_stream(mut self) -> Option<BoxedStream> {
        self.link.give_streams()
    }

    pub fn is_ok(&self) -> bool {
        self.state == HandshakeState::Established && self.link.is_ok()
    }

    pub fn interrupt_handle(&self) -> Option<InterruptHandle> {
        self.link
            .stream
            .as_ref()
            .and_then(|stream| stream.interrupt_handle())
    }

    /// 发起端握手。
    pub fn initiate(&mut self, carriers: &Carriers) -> Result<()> {
        self.ensure_idle()?;
        let result = self.run_initiate(carriers);
        self.finish(result)
    }

    /// 应答端握手。
    pub fn respond(&mut self, carriers: &Carriers) -> Result<()> {
        self.ensure_idle()?;
        let result = self.run_respond(carriers);
        self.finish(result)
    }

    fn run_initiate(&mut self, carriers: &Carriers) -> Result<()> {
        let spec = CarrierSpec::parse(self.link.route().carrier());
        let mut carrier = carriers
            .choose_by_name(spec.name())
            .ok_or_else(|| TransportError::UnknownCarrier {
                name: spec.name().to_owned(),
            })?;
        carrier.configure(spec.options())?;

        carrier.send_header(&mut self.link)?;
        self.flush()?;
        self.transition(HandshakeState::HeaderSent, carrier.name());

        carrier.expect_reply_to_header(&mut self.link)?;
        self.transition(HandshakeState::IndexExchanged, carrier.name());

        if carrier.require_ack() {
            carrier.expect_ack(&mut self.link)?;
            self.transition(HandshakeState::AckExchanged, carrier.name());
        }
        self.carrier = Some(carrier);
        Ok(())
    }

    fn run_respond(&mut self, carriers: &Carriers) -> Result<()> {
        let mut header = [0u8; HEADER_LEN];
        self.link
            .streams()?
            .read_full(&mut header)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    TransportError::negotiation("data stream died before header arrived")
                }
                _ => TransportError::io(Operation::Read, err),
            })?;

        let Some(mut carrier) = carriers.choose_by_header(&header) else {
            let stream = self.link.streams()?;
            // 对端可能是人类用户，尽力告知后再断开。
            let _ = stream.write(PROTOCOL_NOT_FOUND_NOTICE.as_bytes());
            let _ = stream.flush();
            return Err(TransportError::HeaderMismatch {
                header: crate::header::Header::new(header),
            });
        };

        let route = self.link.route().with_carrier_name(carrier.name());
        self.link.set_route(route);
        carrier.set_parameters(&header);
        carrier.expect_sender_specifier(&mut self.link)?;
        self.transition(HandshakeState::HeaderAwaited, carrier.name());

        carrier.respond_to_header(&mut self.link)?;
        self.flush()?;
        self.transition(HandshakeState::RendezvousOrSwap, carrier.name());
        self.transition(HandshakeState::IndexExchanged, carrier.name());

        if carrier.require_ack() {
            carrier.send_ack(&mut self.link)?;
            self.flush()?;
            self.transition(HandshakeState::AckExchanged, carrier.name());
        }
        self.carrier = Some(carrier);
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state != HandshakeState::Idle {
            return Err(TransportError::negotiation(format!(
                "handshake already ran, state is {}",
                self.state
            )));
        }
        Ok(())
    }

    fn finish(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                let name = self.carrier_name();
                self.transition(HandshakeState::Established, &name);
                Ok(())
            }
            Err(err) => {
                warn!(
                    target: targets::HANDSHAKE,
                    route = %self.link.route(),
                    from = display_sender(self.link.route()),
                    state = %self.state,
                    code = err.code(),
                    error = %err,
                    "carrier negotiation failed"
                );
                self.state = HandshakeState::Failed;
                self.trace.push(HandshakeState::Failed);
                if let Some(mut carrier) = self.carrier.take() {
                    carrier.close();
                }
                self.link.close_streams();
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: HandshakeState, carrier: &str) {
        debug!(
            target: targets::HANDSHAKE,
            carrier,
            route = %self.link.route(),
            from = %self.state,
            to = %next,
            "handshake transition"
        );
        self.state = next;
        self.trace.push(next);
    }

    fn carrier_name(&self) -> String {
        self.carrier
            .as_ref()
            .map(|carrier| carrier.name().to_owned())
            .unwrap_or_default()
    }

    fn flush(&mut self) -> Result<()> {
        self.link
            .streams()?
            .flush()
            .map_err(|err| TransportError::io(Operation::Flush, err))
    }

    fn ensure_established(&self) -> Result<()> {
        if self.state != HandshakeState::Established {
            return Err(TransportError::negotiation(format!(
                "connection is not established, state is {}",
                self.state
            )));
        }
        Ok(())
    }

    /// 写出一条消息：索引 → 载荷 → 刷新 → 等待确认。
    pub fn write_message(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_established()?;
        let Some(carrier) = self.carrier.as_mut() else {
            return Err(TransportError::StreamClosed);
        };
        carrier.send_index(&mut self.link, payload.len())?;
        let stream = self.link.streams()?;
        stream
            .write(payload)
            .map_err(|err| TransportError::io(Operation::Write, err))?;
        stream
            .flush()
            .map_err(|err| TransportError::io(Operation::Flush, err))?;
        carrier.expect_ack(&mut self.link)
    }

    /// 开始读取一条消息，返回对端宣告的长度（若载体提供）。
    pub fn begin_read(&mut self) -> Result<Option<usize>> {
        self.ensure_established()?;
        let Some(carrier) = self.carrier.as_mut() else {
            return Err(TransportError::StreamClosed);
        };
        let len = carrier.expect_index(&mut self.link)?;
        self.pending_ack = true;
        Ok(len)
    }

    /// 读取消息体的若干字节。
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.link
            .streams()?
            .read(buf)
            .map_err(|err| TransportError::io(Operation::Read, err))
    }

    /// 填满缓冲，否则失败。
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<()> {
        self.link
            .streams()?
            .read_full(buf)
            .map_err(|err| TransportError::io(Operation::Read, err))
    }

    /// 结束读取：按需回送确认。
    pub fn end_read(&mut self) -> Result<()> {
        self.pending_ack = false;
        self.ensure_established()?;
        let Some(carrier) = self.carrier.as_mut() else {
            return Err(TransportError::StreamClosed);
        };
        carrier.send_ack(&mut self.link)?;
        self.flush()
    }

    /// 关闭连接；重复调用无副作用。若读取尚未确认，先补发确认。
    pub fn close(&mut self) {
        if self.pending_ack {
            self.pending_ack = false;
            if let Some(carrier) = self.carrier.as_mut() {
                let _ = carrier.send_ack(&mut self.link);
            }
        }
        if let Some(mut carrier) = self.carrier.take() {
            carrier.close();
        }
        self.link.close_streams();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("route", self.link.route())
            .field("carrier", &self.carrier_name())
            .field("state", &self.state)
            .finish()
    }
}
