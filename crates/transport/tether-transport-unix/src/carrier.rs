use tether_core::{
    Carrier, CarrierOptions, ConnectionState, Contact, Header, Result, RuntimeDirConfig,
    TransportError, TwoWayStream, observability::targets,
};
use tracing::debug;

use crate::{
    UnixSockStream,
    rendezvous::{RendezvousConfig, Role},
};

pub const UNIX_CARRIER_NAME: &str = "unix_stream";

/// 不带确认的首部。
pub const UNIX_HEADER: Header = Header::new(*b"UNIX_STR");

/// 带确认的首部。
pub const UNIX_ACK_HEADER: Header = Header::new(*b"UNIX_ACK");

/// `unix_stream` 载体：在 TCP 上完成首部交换后，双方改用 Unix 域套接字通信。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 同机通信时绕过 TCP 协议栈；会合路径由原 TCP 连接的两个端口推导，
///   双方无需额外交换信息；
///
/// ## 契约（What）
/// - 两端主机不同（回环地址视为相同）时拒绝协商，返回 [`TransportError::NotLocal`]，
///   原始流保持不变，由协商驱动统一关闭；
/// - 应答端 `respond_to_header`：按接收端公式计算路径，确保运行时目录存在，`bind` + `listen` + `accept`；
/// - 发起端 `expect_reply_to_header`：按发送端公式计算路径并带重试地 `connect`；
/// - 会合成功后才通过 `take_streams` 换入新流，旧的 TCP 流随之关闭；会合失败时旧流原样保留。
#[derive(Clone, Debug)]
pub struct UnixSocketCarrier {
    ack: bool,
    config: RendezvousConfig,
}

impl UnixSocketCarrier {
    pub fn new(config: RendezvousConfig) -> Self {
        Self { ack: false, config }
    }

    pub fn config(&self) -> &RendezvousConfig {
        &self.config
    }

    fn header(&self) -> Header {
        if self.ack {
            UNIX_ACK_HEADER
        } else {
            UNIX_HEADER
        }
    }

    fn rendezvous(&self, state: &mut dyn ConnectionState, role: Role) -> Result<()> {
        let (local, remote) = {
            let stream = state.streams()?;
            (
                stream.local_address().clone(),
                stream.remote_address().clone(),
            )
        };
        if !local.is_same_host(&remote) {
            return Err(TransportError::NotLocal { local, remote });
        }
        if role == Role::Receiver {
            RuntimeDirConfig::new(self.config.runtime_dir()).ensure_exists()?;
        }

        let path = self.config.path_for(role, local.port(), remote.port());
        debug!(
            target: targets::UNIX,
            path = %path.display(),
            role = ?role,
            route = %state.route(),
            "opening unix rendezvous"
        );
        let mut stream = UnixSockStream::new(
            path,
            self.config.clone(),
            with_unix_carrier(&local),
            with_unix_carrier(&remote),
        );
        stream.open(role)?;
        state.take_streams(Box::new(stream));
        Ok(())
    }
}

fn with_unix_carrier(contact: &Contact) -> Contact {
    contact.with_carrier(UNIX_CARRIER_NAME)
}

impl Carrier for UnixSocketCarrier {
    fn name(&self) -> &str {
        UNIX_CARRIER_NAME
    }

    fn create(&self) -> Box<dyn Carrier> {
        Box::new(UnixSocketCarrier::new(self.config.clone()))
    }

    fn require_ack(&self) -> bool {
        self.ack
    }

    fn check_header(&self, header: &[u8]) -> bool {
        UNIX_HEADER.matches(header) || UNIX_ACK_HEADER.matches(header)
    }

    fn get_header(&self, buf: &mut [u8]) {
        self.header().write_into(buf);
    }

    fn configure(&mut self, options: &CarrierOptions) -> Result<()> {
        self.ack = options.flag("ack");
        Ok(())
    }

    fn set_parameters(&mut self, header: &[u8]) {
        self.ack = UNIX_ACK_HEADER.matches(header);
    }

    fn respond_to_header(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        self.rendezvous(state, Role::Receiver)
    }

    fn expect_reply_to_header(&mut self, state: &mut dyn ConnectionState) -> Result<()> {
        self.rendezvous(state, Role::Sender)
    }
}
