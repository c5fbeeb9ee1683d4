use tether_core::{
    Carrier, CarrierOptions, ConnectionState, HEADER_LEN, Header, Operation, Result,
    TransportError, TwoWayStream, observability::targets,
};
use tether_transport_tcp::TcpCarrier;
use tracing::debug;

use crate::{
    WebSocketStream,
    handshake::{ClientHandshake, UpgradeRequest},
};

pub const WEBSOCKET_CARRIER_NAME: &str = "websocket";

/// 升级请求的前 8 个字节，同时也是载体首部。
pub const WEBSOCKET_REQUEST_PREFIX: &str = "GET /?ws";

pub const WEBSOCKET_HEADER: Header = Header::new(*b"GET /?ws");

/// 浏览器连接不携带发送端名，路由中以此代替。
pub const WEB_SENDER: &str = "web";

/// `websocket` 载体：完成 HTTP 升级后以成帧适配流替换原始流。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让浏览器无需任何私有协议即可接入：首部就是 HTTP 请求行的开头；
/// - 确认交换与关闭逻辑和 `tcp` 载体一致，因此持有一个 [`TcpCarrier`] 并转发这些步骤。
///
/// ## 契约（What）
/// - 应答端：`expect_sender_specifier` 读取并校验升级请求，发送端记为 `web`；
///   `respond_to_header` 写出 101 响应后换入 [`WebSocketStream`]；
/// - 发起端：`send_header` 在首部之后直接写出请求剩余部分；`expect_reply_to_header`
///   校验 101 响应与 `Sec-WebSocket-Accept` 后换流；
/// - 请求目标带 `ack` 查询参数时双方启用确认交换，对应连接说明串中的 `+ack`；
/// - 帧自带边界，不发送长度索引。
///
/// ## 注意事项（Trade-offs）
/// - `can_offer` 为 `false`：WebSocket 主要用于接受浏览器连接，不作为主动协商的候选。
#[derive(Clone, Debug, Default)]
pub struct WebSocketCarrier {
    tcp: TcpCarrier,
    request: Option<UpgradeRequest>,
    client: Option<ClientHandshake>,
}

impl WebSocketCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 应答端读到的升级请求。
    pub fn request(&self) -> Option<&UpgradeRequest> {
        self.request.as_ref()
    }

    fn swap_to_frames(state: &mut dyn ConnectionState) -> Result<()> {
        let raw = state.give_streams().ok_or(TransportError::StreamClosed)?;
        debug!(
            target: targets::WEBSOCKET,
            route = %state.route(),
            remote = %raw.remote_address(),
            "switching to websocket framing"
        );
        state.take_streams(Box::new(WebSocketStream::new(raw)));
        Ok(())
    }
}

impl Carrier for WebSocketCarrier {
    fn name(&self) -> &str {
        WEBSOCKET_CARRIER_NAME
    }

    fn create(&self) -> Box<dyn Carrier> {
        Box::new(WebSocketCarrier::new())
    }

    fn require_ack(&self) -> bool {
        self.tcp.require_ack()
    }

    fn can_offer(&self) -> bool {
        false
    }

    fn check_header(&self, header: &[u8]) -> bool {
        WEBSOCKET_HEADER.matches(header)
    }

    fn get_header(&self, buf: &mut [u8]) {
        WEBSOCKET_HEADER.write_into(buf);
    }

    fn configure(&mut self, options: &CarrierOptions) -> Result<()> {
        self.tcp.configure(options)
    }

    fn send_header(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        let mut header = [0u8; HEADER_LEN];
        self.get_header(&mut header);
        let stream = state.streams()?;
        let client = ClientHandshake::new(self.tcp.require_ack());
        let mut request = header.to_vec();
        request.extend_from_slice(client.request_tail(stream.remote_address()).as_bytes());
        stream
            .write(&request)
            .map_err(|err| TransportError::io(Operation::Write, err))?;
        self.client = Some(client);
        Ok(())
    }

    fn expect_sender_specifier(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        let request = UpgradeRequest::read_from(state.streams()?, WEBSOCKET_REQUEST_PREFIX)?;
        self.tcp = TcpCarrier::with_ack(request.wants_ack());
        debug!(
            target: targets::WEBSOCKET,
            target_path = request.target(),
            ack = request.wants_ack(),
            "upgrade request accepted"
        );
        let route = state.route().with_from_name(WEB_SENDER);
        state.set_route(route);
        self.request = Some(request);
        Ok(())
    }

    fn respond_to_header(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        let Some(request) = self.request.as_ref() else {
            return Err(TransportError::negotiation("upgrade request was not read"));
        };
        state
            .streams()?
            .write(request.response().as_bytes())
            .map_err(|err| TransportError::io(Operation::Write, err))?;
        Self::swap_to_frames(state)
    }

    fn expect_reply_to_header(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        let Some(client) = self.client.take() else {
            return Err(TransportError::negotiation("upgrade request was not sent"));
        };
        client.read_response(state.streams()?)?;
        Self::swap_to_frames(state)
    }

    fn send_ack(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        self.tcp.send_ack(state)
    }

    fn expect_ack(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        self.tcp.expect_ack(state)
    }

    fn close(&mut self) {
        self.request = None;
        self.client = None;
        self.tcp.close();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use tether_core::{
        Carriers, Connection, HandshakeState, Route, StreamIo, TwoWayStreamExt,
        memory::MemoryStream,
    };
    use tether_transport_tcp::TCP_CARRIER_NAME;

    use super::*;
    use crate::frame::{FrameType, OPCODE_PING, OPCODE_TEXT, encode_frame, get_frame};

    fn registry() -> Carriers {
        Carriers::new()
            .with(Box::new(TcpCarrier::new()))
            .with(Box::new(WebSocketCarrier::new()))
    }

    #[test]
    fn header_is_the_request_prefix() {
        let carrier = WebSocketCarrier::new();
        let mut buf = [0u8; HEADER_LEN];
        carrier.get_header(&mut buf);
        assert_eq!(&buf, WEBSOCKET_REQUEST_PREFIX.as_bytes());
        assert!(carrier.check_header(b"GET /?ws"));
        assert!(!carrier.check_header(b"GET /abc"));
        assert!(!carrier.can_offer());
        assert_eq!(registry().offerable().collect::<Vec<_>>(), [TCP_CARRIER_NAME]);
    }

    #[test]
    fn browser_client_is_upgraded() {
        let (mut browser, server) = MemoryStream::pair();
        let responder = thread::spawn(move || {
            let mut conn = Connection::incoming(Box::new(server), "/viewer");
            conn.respond(&registry()).expect("respond");
            conn
        });

        browser
            .write(
                b"GET /?ws HTTP/1.1\r\n\
Host: localhost\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\
\r\n",
            )
            .unwrap();
        assert_eq!(browser.read_line().unwrap(), "HTTP/1.1 101 Switching Protocols");
        let mut accept = None;
        loop {
            let line = browser.read_line().unwrap();
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Sec-WebSocket-Accept: ") {
                accept = Some(value.to_owned());
            }
        }
        assert_eq!(accept.as_deref(), Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

        let mut conn = responder.join().unwrap();
        use HandshakeState::*;
        assert_eq!(
            conn.trace(),
            [Idle, HeaderAwaited, RendezvousOrSwap, IndexExchanged, Established]
        );
        assert_eq!(conn.route().from_name(), WEB_SENDER);
        assert_eq!(conn.route().carrier_name(), WEBSOCKET_CARRIER_NAME);

        browser.write(&encode_frame(OPCODE_PING, b"", None)).unwrap();
        browser
            .write(&encode_frame(OPCODE_TEXT, b"hi there", Some([1, 2, 3, 4])))
            .unwrap();
        assert_eq!(conn.begin_read().unwrap(), None);
        let mut buf = [0u8; 8];
        conn.read_full(&mut buf).unwrap();
        conn.end_read().unwrap();
        assert_eq!(&buf, b"hi there");

        conn.write_message(b"reply").unwrap();
        let frame = get_frame(&mut StreamIo::new(&mut browser)).unwrap();
        assert_eq!(frame.kind, FrameType::Binary);
        assert_eq!(&frame.payload[..], b"reply");
    }

    #[test]
    fn tether_initiator_negotiates_with_ack() {
        let (left, right) = MemoryStream::pair();
        let responder = thread::spawn(move || {
            let mut conn = Connection::incoming(Box::new(right), "/sink");
            conn.respond(&registry()).expect("respond");
            conn
        });
        let mut initiator = Connection::outgoing(
            Box::new(left),
            Route::new("/source", "/sink", "websocket+ack"),
        );
        initiator.initiate(&registry()).expect("initiate");
        let mut responder = responder.join().unwrap();

        assert!(initiator.carrier().unwrap().require_ack());
        assert!(responder.carrier().unwrap().require_ack());
        assert!(initiator.trace().contains(&HandshakeState::AckExchanged));

        let writer = thread::spawn(move || {
            initiator.write_message(&[9; 300]).unwrap();
            initiator
        });
        responder.begin_read().unwrap();
        let mut body = [0u8; 300];
        responder.read_full(&mut body).unwrap();
        responder.end_read().unwrap();
        assert_eq!(body, [9; 300]);
        writer.join().unwrap();
    }

    #[test]
    fn invalid_upgrade_fails_negotiation() {
        let (mut browser, server) = MemoryStream::pair();
        browser
            .write(b"GET /?ws HTTP/1.1\r\nUpgrade: h2c\r\nConnection: Upgrade\r\n\r\n")
            .unwrap();
        let mut conn = Connection::incoming(Box::new(server), "/viewer");
        let err = conn.respond(&registry()).unwrap_err();
        assert_eq!(err.code(), "tether.codec.protocol_violation");
        assert_eq!(conn.state(), HandshakeState::Failed);
    }
}
