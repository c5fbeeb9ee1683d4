use std::net::{SocketAddr, TcpListener as StdTcpListener};

use tether_core::{Contact, Operation, Result, TransportError, observability::targets};
use tracing::debug;

use crate::{TcpByteStream, TcpSocketConfig, carrier::TCP_CARRIER_NAME};

/// 对标准库 `TcpListener` 的语义封装。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 提供“监听 → 接受连接”的最小能力，接受到的连接立即以 [`TcpByteStream`] 形式交给协商层；
/// - 监听阶段指定的 [`TcpSocketConfig`] 会应用到每条新连接，保证服务端关闭策略一致。
///
/// ## 契约 (What)
/// - `accept` 阻塞直到有新连接；返回的流已携带本地/对端地址并完成套接字配置；
/// - 配置失败的连接会被丢弃并以 [`TransportError`] 返回，监听器保持可用。
///
/// ## 注意事项 (Trade-offs)
/// - 当前实现逐个接受连接，若需并发处理，调用方应为每条连接派生线程。
#[derive(Debug)]
pub struct TcpListener {
    inner: StdTcpListener,
    local_addr: SocketAddr,
    default_config: TcpSocketConfig,
}

impl TcpListener {
    /// 绑定到指定地址并返回监听器。
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with_config(addr, TcpSocketConfig::default())
    }

    /// 绑定到指定地址并设置新连接的默认套接字配置。
    pub fn bind_with_config(addr: SocketAddr, default_config: TcpSocketConfig) -> Result<Self> {
        let inner =
            StdTcpListener::bind(addr).map_err(|err| TransportError::io(Operation::Bind, err))?;
        let local_addr = inner
            .local_addr()
            .map_err(|err| TransportError::io(Operation::Bind, err))?;
        debug!(target: targets::TCP, %local_addr, "tcp listener bound");
        Ok(Self {
            inner,
            local_addr,
            default_config,
        })
    }

    /// 监听器实际绑定的地址（端口为 0 时由内核分配）。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn contact(&self) -> Contact {
        Contact::from(self.local_addr).with_carrier(TCP_CARRIER_NAME)
    }

    pub fn default_socket_config(&self) -> &TcpSocketConfig {
        &self.default_config
    }

    /// 接受一个入站连接。
    pub fn accept(&self) -> Result<TcpByteStream> {
        self.accept_with_config(self.default_config.clone())
    }

    /// 接受一个入站连接并应用指定配置。
    pub fn accept_with_config(&self, config: TcpSocketConfig) -> Result<TcpByteStream> {
        let (socket, peer) = self
            .inner
            .accept()
            .map_err(|err| TransportError::io(Operation::Accept, err))?;
        debug!(target: targets::TCP, %peer, "tcp connection accepted");
        TcpByteStream::from_std(socket, config)
    }
}
