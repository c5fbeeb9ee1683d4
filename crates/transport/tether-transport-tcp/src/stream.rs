use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    time::Duration,
};

use socket2::SockRef;
use tether_core::{
    Contact, InterruptHandle, Operation, Result, TransportConfig, TransportError, TwoWayStream,
    error::is_timeout_kind, observability::targets,
};
use tracing::{debug, warn};

use crate::carrier::TCP_CARRIER_NAME;

/// TCP 套接字级配置项，实现对内核行为的显式控制。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将 `SO_LINGER`、`TCP_NODELAY` 与读写超时集中到一个值类型中，避免调用方直接操作
///   `socket2` 或平台相关常量；
/// - 监听器与主动连接共享同一套配置入口，保证两端关闭策略一致。
///
/// ## 核心逻辑（How）
/// - `linger` 为 `Some(dur)` 时通过 `socket2::SockRef::set_linger` 设置 `SO_LINGER`，
///   `None` 表示沿用内核默认；
/// - 读写超时交给标准库 `set_read_timeout` / `set_write_timeout`，超时后写路径返回
///   `WouldBlock`/`TimedOut`，流保持开启。
///
/// ## 契约说明（What）
/// - 所有 `with_*` 方法返回新的配置实例；
/// - **后置条件**：`apply` 返回 `Ok(())` 时全部选项已落地，任一失败即返回错误。
///
/// ## 设计取舍与注意事项（Trade-offs）
/// - `SO_LINGER` 在不同平台的精度不同（Linux 取整到秒）；设置过小可能导致发送缓冲中的数据
///   被丢弃并触发对端 `ECONNRESET`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpSocketConfig {
    linger: Option<Duration>,
    nodelay: bool,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSocketConfig {
    /// 默认配置：不设置 linger，开启 `TCP_NODELAY`，无读写超时。
    pub const fn new() -> Self {
        Self {
            linger: None,
            nodelay: true,
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// 从传输配置派生套接字配置。
    pub fn from_transport(config: &TransportConfig) -> Self {
        Self::new()
            .with_nodelay(config.tcp_nodelay)
            .with_linger(config.tcp_linger())
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        SockRef::from(stream).set_linger(self.linger)?;
        stream.set_nodelay(self.nodelay)?;
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_write_timeout(self.write_timeout)
    }
}

/// 阻塞式 TCP 字节流。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 为协商驱动提供对单个 TCP 连接的直接控制，读写语义与 [`TwoWayStream`] 完全一致；
/// - 中断只依赖 `shutdown`，不需要在流内部加锁。
///
/// ## 契约 (What)
/// - `read` 返回 `Ok(0)` 或错误后 `is_ok()` 变为 `false`；
/// - `write` 遇到超时类错误时保持流可用，其余错误使流失效；
/// - `close` 幂等：先 `shutdown(Both)` 再释放描述符；
/// - `interrupt_handle` 持有克隆出的描述符，关闭后调用只会得到被忽略的 OS 错误。
#[derive(Debug)]
pub struct TcpByteStream {
    socket: Option<TcpStream>,
    local: Contact,
    remote: Contact,
    config: TcpSocketConfig,
    ok: bool,
}

impl TcpByteStream {
    /// 以默认配置连接到目标地址。
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_config(addr, TcpSocketConfig::default())
    }

    /// 连接到目标地址并应用套接字配置。
    pub fn connect_with_config(addr: SocketAddr, config: TcpSocketConfig) -> Result<Self> {
        let socket =
            TcpStream::connect(addr).map_err(|err| TransportError::io(Operation::Connect, err))?;
        let stream = Self::from_std(socket, config)?;
        debug!(
            target: targets::TCP,
            local = %stream.local,
            remote = %stream.remote,
            "tcp connection established"
        );
        Ok(stream)
    }

    /// 包装一条已建立的标准库连接，并应用配置。
    pub fn from_std(socket: TcpStream, config: TcpSocketConfig) -> Result<Self> {
        config
            .apply(&socket)
            .map_err(|err| TransportError::io(Operation::Configure, err))?;
        let local = socket
            .local_addr()
            .map_err(|err| TransportError::io(Operation::Configure, err))?;
        let remote = socket
            .peer_addr()
            .map_err(|err| TransportError::io(Operation::Configure, err))?;
        Ok(Self {
            socket: Some(socket),
            local: Contact::from(local).with_carrier(TCP_CARRIER_NAME),
            remote: Contact::from(remote).with_carrier(TCP_CARRIER_NAME),
            config,
            ok: true,
        })
    }

    pub fn config(&self) -> &TcpSocketConfig {
        &self.config
    }

    /// 读取套接字当前的 `SO_LINGER` 值，用于核对配置是否落地。
    pub fn linger(&self) -> Result<Option<Duration>> {
        let socket = self.socket.as_ref().ok_or(TransportError::StreamClosed)?;
        SockRef::from(socket)
            .linger()
            .map_err(|err| TransportError::io(Operation::Configure, err))
    }
}

impl TwoWayStream for TcpByteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(socket) = self.socket.as_mut() else {
            self.ok = false;
            return Ok(0);
        };
        match socket.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.ok = false;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(err) => {
                if err.kind() != io::ErrorKind::Interrupted {
                    self.ok = false;
                }
                Err(err)
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let Some(socket) = self.socket.as_mut() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        };
        socket.write_all(buf).inspect_err(|err| {
            if !is_timeout_kind(err.kind()) {
                warn!(
                    target: targets::TCP,
                    remote = %self.remote,
                    error = %err,
                    "tcp write failed, stream is no longer usable"
                );
                self.ok = false;
            }
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.socket.as_mut() {
            Some(socket) => socket.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        self.ok = false;
        if let Some(socket) = self.socket.take() {
            // 对端可能已先行关闭，shutdown 的 NotConnected 错误无需上报。
            let _ = socket.shutdown(Shutdown::Both);
            debug!(target: targets::TCP, remote = %self.remote, "tcp stream closed");
        }
    }

    fn is_ok(&self) -> bool {
        self.ok && self.socket.is_some()
    }

    fn local_address(&self) -> &Contact {
        &self.local
    }

    fn remote_address(&self) -> &Contact {
        &self.remote
    }

    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        let clone = self.socket.as_ref()?.try_clone().ok()?;
        Some(InterruptHandle::new(move || {
            let _ = clone.shutdown(Shutdown::Both);
        }))
    }
}

impl Drop for TcpByteStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener as StdListener, thread};

    use super::*;
    use tether_core::TwoWayStreamExt;

    fn loopback_pair(config: TcpSocketConfig) -> (TcpByteStream, TcpByteStream) {
        let listener = StdListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("listener addr");
        let client = TcpByteStream::connect_with_config(addr, config.clone()).expect("connect");
        let (accepted, _) = listener.accept().expect("accept");
        let server = TcpByteStream::from_std(accepted, config).expect("wrap accepted");
        (client, server)
    }

    #[test]
    fn contacts_mirror_each_other() {
        let (client, server) = loopback_pair(TcpSocketConfig::default());
        assert_eq!(client.local_address(), server.remote_address());
        assert_eq!(client.remote_address(), server.local_address());
        assert_eq!(client.local_address().carrier(), TCP_CARRIER_NAME);
        assert!(client.local_address().is_same_host(client.remote_address()));
    }

    #[test]
    fn linger_is_applied() {
        let config = TcpSocketConfig::new().with_linger(Some(Duration::from_secs(1)));
        let (client, _server) = loopback_pair(config);
        assert_eq!(client.linger().unwrap(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn interrupt_unblocks_reader() {
        let (mut client, _server) = loopback_pair(TcpSocketConfig::default());
        let handle = client.interrupt_handle().expect("tcp streams are interruptible");
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 1];
            let outcome = client.read(&mut buf);
            (outcome.map(|n| n == 0).unwrap_or(true), client.is_ok())
        });
        thread::sleep(Duration::from_millis(50));
        handle.interrupt();
        assert_eq!(reader.join().unwrap(), (true, false));
    }

    #[test]
    fn close_is_idempotent_and_visible_to_peer() {
        let (mut client, mut server) = loopback_pair(TcpSocketConfig::default());
        client.write(b"bye").unwrap();
        client.close();
        client.close();
        assert!(!client.is_ok());
        assert!(client.write(b"x").is_err());

        let mut buf = [0u8; 3];
        server.read_full(&mut buf).unwrap();
        assert_eq!(&buf, b"bye");
        assert_eq!(server.read(&mut buf).unwrap(), 0);
        assert!(!server.is_ok());
    }
}
