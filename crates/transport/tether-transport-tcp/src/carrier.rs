use tether_core::{
    Carrier, CarrierOptions, ConnectionState, HEADER_LEN, Header, Operation, Result,
    TransportError, TwoWayStream, TwoWayStreamExt, observability::targets,
};
use tracing::trace;

pub const TCP_CARRIER_NAME: &str = "tcp";

/// 不带确认的首部。
pub const TCP_HEADER: Header = Header::new(*b"TCP_STRM");

/// 带确认的首部。
pub const TCP_ACK_HEADER: Header = Header::new(*b"TCP__ACK");

/// `tcp` 载体：连接建立后直接在原始流上收发消息。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 作为默认载体，它不替换底层流，只负责首部确认与消息边界；
/// - WebSocket 载体持有一个 `TcpCarrier` 并委托确认相关的步骤给它。
///
/// ## 契约（What）
/// - 发起端 `configure` 读取 `ack` 开关；应答端 `set_parameters` 从首部推断同一开关；
/// - 应答端在 `respond_to_header` 中回送与所选变体一致的首部，发起端在
///   `expect_reply_to_header` 中逐字节校验；
/// - 每条消息前发送 4 字节大端长度索引，接收端据此得知消息边界。
#[derive(Clone, Debug, Default)]
pub struct TcpCarrier {
    ack: bool,
}

impl TcpCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ack(ack: bool) -> Self {
        Self { ack }
    }

    fn header(&self) -> Header {
        if self.ack { TCP_ACK_HEADER } else { TCP_HEADER }
    }
}

impl Carrier for TcpCarrier {
    fn name(&self) -> &str {
        TCP_CARRIER_NAME
    }

    fn create(&self) -> Box<dyn Carrier> {
        Box::new(TcpCarrier::new())
    }

    fn require_ack(&self) -> bool {
        self.ack
    }

    fn check_header(&self, header: &[u8]) -> bool {
        TCP_HEADER.matches(header) || TCP_ACK_HEADER.matches(header)
    }

    fn get_header(&self, buf: &mut [u8]) {
        self.header().write_into(buf);
    }

    fn configure(&mut self, options: &CarrierOptions) -> Result<()> {
        self.ack = options.flag("ack");
        Ok(())
    }

    fn set_parameters(&mut self, header: &[u8]) {
        self.ack = TCP_ACK_HEADER.matches(header);
    }

    fn respond_to_header(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        state
            .streams()?
            .write(self.header().as_bytes())
            .map_err(|err| TransportError::io(Operation::Write, err))
    }

    fn expect_reply_to_header(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        let mut reply = [0u8; HEADER_LEN];
        state
            .streams()?
            .read_full(&mut reply)
            .map_err(|err| TransportError::io(Operation::Read, err))?;
        if !self.header().matches(&reply) {
            return Err(TransportError::negotiation(format!(
                "unexpected reply header {}, expected {}",
                Header::new(reply),
                self.header()
            )));
        }
        Ok(())
    }

    fn send_index(&mut self, state: &mut dyn ConnectionState, len: usize) -> Result<()> {
        let len = u32::try_from(len)
            .map_err(|_| TransportError::protocol(format!("message of {len} bytes is too large")))?;
        trace!(target: targets::TCP, len, "sending message index");
        state
            .streams()?
            .write(&len.to_be_bytes())
            .map_err(|err| TransportError::io(Operation::Write, err))
    }

    fn expect_index(&mut self, state: &mut dyn ConnectionState) -> Result<Option<usize>> {
        let mut len = [0u8; 4];
        state
            .streams()?
            .read_full(&mut len)
            .map_err(|err| TransportError::io(Operation::Read, err))?;
        let len = u32::from_be_bytes(len) as usize;
        trace!(target: targets::TCP, len, "received message index");
        Ok(Some(len))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use tether_core::{Carriers, Connection, HandshakeState, Route, memory::MemoryStream};

    fn registry() -> Carriers {
        Carriers::new().with(Box::new(TcpCarrier::new()))
    }

    fn negotiate(spec: &str) -> (Connection, Connection) {
        let (left, right) = MemoryStream::pair();
        let responder = thread::spawn(move || {
            let mut conn = Connection::incoming(Box::new(right), "/in");
            conn.respond(&registry()).expect("respond");
            conn
        });
        let mut initiator = Connection::outgoing(Box::new(left), Route::new("/out", "/in", spec));
        initiator.initiate(&registry()).expect("initiate");
        (initiator, responder.join().unwrap())
    }

    #[test]
    fn header_round_trip_and_variants() {
        let mut carrier = TcpCarrier::new();
        let mut buf = [0u8; HEADER_LEN];
        carrier.get_header(&mut buf);
        assert!(carrier.check_header(&buf));
        assert_eq!(&buf, TCP_HEADER.as_bytes());

        carrier.configure(&CarrierOptions::default().with_flag("ack")).unwrap();
        carrier.get_header(&mut buf);
        assert_eq!(&buf, TCP_ACK_HEADER.as_bytes());

        let mut responder = TcpCarrier::new();
        responder.set_parameters(&buf);
        assert!(responder.require_ack());
        responder.set_parameters(TCP_HEADER.as_bytes());
        assert!(!responder.require_ack());
    }

    #[test]
    fn get_header_respects_short_buffer() {
        let mut buf = [b'.'; 3];
        TcpCarrier::new().get_header(&mut buf);
        assert_eq!(&buf, b"TCP");
    }

    #[test]
    fn indexed_message_exchange() {
        let (mut initiator, mut responder) = negotiate("tcp+ack");
        assert!(responder.trace().contains(&HandshakeState::AckExchanged));
        let writer = thread::spawn(move || {
            initiator.write_message(b"frame-1").unwrap();
            initiator
        });
        let len = responder.begin_read().unwrap().expect("tcp announces length");
        let mut body = vec![0u8; len];
        responder.read_full(&mut body).unwrap();
        responder.end_read().unwrap();
        assert_eq!(body, b"frame-1");
        writer.join().unwrap();
    }

    #[test]
    fn route_records_sender_and_carrier() {
        let (_initiator, responder) = negotiate("");
        assert_eq!(responder.route().from_name(), "/out");
        assert_eq!(responder.route().carrier_name(), TCP_CARRIER_NAME);
        assert!(!responder.carrier().unwrap().require_ack());
    }
}
