use std::{
    fs,
    io::{self, Read, Write},
    mem::MaybeUninit,
    net::Shutdown,
    path::{Path, PathBuf},
    thread,
};

use socket2::{Domain, SockAddr, Socket, Type};
use tether_core::{
    Contact, InterruptHandle, Result, TransportError, TwoWayStream, error::is_timeout_kind,
    observability::targets,
};
use tracing::{debug, warn};

use crate::rendezvous::{RendezvousConfig, Role};

/// 会合流的生命周期阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RendezvousState {
    Unopened,
    Open,
    Closed,
}

/// 经由 Unix 域套接字会合建立的双向流。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 同一主机上的两个进程完成 TCP 协商后，改用 Unix 域套接字收发消息以减少内核协议栈开销；
/// - 会合流对上层呈现与 TCP 流完全一致的 [`TwoWayStream`] 契约。
///
/// ## 契约（What）
/// - [`UnixSockStream::open`]：
///   - 发送端最多尝试 `connect_attempts` 次 `connect()`，每次失败后等待 `retry_delay`，
///     全部失败返回 [`TransportError::Rendezvous`]；
///   - 接收端删除残留文件 → `bind` → `listen(backlog)` → 只 `accept` 一个对端，任何 OS 错误都直接失败；
///   - 路径为空时使用抽象地址（首字节为 NUL），不在文件系统中留下痕迹；
/// - 读到 0 字节或读错误（`Interrupted` 除外）后 `is_ok()` 为 `false`；
/// - `is_ok()` 以非阻塞 peek 探测对端是否已挂断，对端 `close` 后本端无需先读即报告不可用；
/// - 写遇到超时类错误时保持流开启，其余写错误立即关闭流；
/// - [`TwoWayStream::close`] 幂等：分别关闭对端与监听描述符，并由接收端删除套接字文件。
///
/// ## 注意事项（Trade-offs）
/// - 阻塞读的取消依赖 [`InterruptHandle`]：句柄持有克隆的对端描述符并调用 `shutdown`，
///   被阻塞的读取随即返回 0。
pub struct UnixSockStream {
    path: PathBuf,
    config: RendezvousConfig,
    peer: Option<Socket>,
    listener: Option<Socket>,
    owns_path: bool,
    local: Contact,
    remote: Contact,
    state: RendezvousState,
    ok: bool,
}

impl UnixSockStream {
    /// 构造未打开的会合流。`local`/`remote` 沿用原 TCP 流的端点信息。
    pub fn new(path: impl Into<PathBuf>, config: RendezvousConfig, local: Contact, remote: Contact) -> Self {
        Self {
            path: path.into(),
            config,
            peer: None,
            listener: None,
            owns_path: false,
            local,
            remote,
            state: RendezvousState::Unopened,
            ok: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> RendezvousState {
        self.state
    }

    /// 按角色完成会合。
    pub fn open(&mut self, role: Role) -> Result<()> {
        if self.state != RendezvousState::Unopened {
            return Err(TransportError::negotiation(format!(
                "rendezvous stream already {:?}",
                self.state
            )));
        }
        let address = socket_address(&self.path).map_err(|err| self.rendezvous_error(1, err))?;
        match role {
            Role::Sender => self.open_sender(&address)?,
            Role::Receiver => self.open_receiver(&address)?,
        }
        self.state = RendezvousState::Open;
        self.ok = true;
        debug!(
            target: targets::UNIX,
            path = %self.path.display(),
            role = ?role,
            "unix rendezvous established"
        );
        Ok(())
    }

    fn open_sender(&mut self, address: &SockAddr) -> Result<()> {
        let attempts = self.config.connect_attempts();
        let mut last_error = None;
        for attempt in 1..=attempts {
            let socket = Socket::new(Domain::UNIX, Type::STREAM, None)
                .map_err(|err| self.rendezvous_error(attempt, err))?;
            match socket.connect(address) {
                Ok(()) => {
                    self.peer = Some(socket);
                    return Ok(());
                }
                Err(err) => {
                    debug!(
                        target: targets::UNIX,
                        path = %self.path.display(),
                        attempt,
                        error = %err,
                        "unix rendezvous connect failed, retrying"
                    );
                    last_error = Some(err);
                    thread::sleep(self.config.retry_delay());
                }
            }
        }
        let err = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotFound));
        warn!(
            target: targets::UNIX,
            path = %self.path.display(),
            attempts,
            error = %err,
            "unix rendezvous gave up"
        );
        Err(self.rendezvous_error(attempts, err))
    }

    fn open_receiver(&mut self, address: &SockAddr) -> Result<()> {
        if !is_abstract(&self.path) {
            match fs::remove_file(&self.path) {
                Ok(()) => debug!(
                    target: targets::UNIX,
                    path = %self.path.display(),
                    "removed stale rendezvous file"
                ),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(self.rendezvous_error(1, err)),
            }
        }
        let listener =
            Socket::new(Domain::UNIX, Type::STREAM, None).map_err(|err| self.rendezvous_error(1, err))?;
        listener
            .bind(address)
            .map_err(|err| self.rendezvous_error(1, err))?;
        self.owns_path = !is_abstract(&self.path);
        listener
            .listen(self.config.backlog())
            .map_err(|err| self.rendezvous_error(1, err))?;
        let (peer, _) = listener.accept().map_err(|err| self.rendezvous_error(1, err))?;
        self.listener = Some(listener);
        self.peer = Some(peer);
        Ok(())
    }

    fn rendezvous_error(&self, attempts: u32, source: io::Error) -> TransportError {
        TransportError::Rendezvous {
            path: self.path.clone(),
            attempts,
            source,
        }
    }
}

fn is_abstract(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// 空路径映射为抽象地址（单个 NUL 字节），其余按文件系统路径处理。
fn socket_address(path: &Path) -> io::Result<SockAddr> {
    if is_abstract(path) {
        SockAddr::unix("\0")
    } else {
        SockAddr::unix(path)
    }
}

/// `Interrupted` 由调用方重试，不改变流的健康状态。
fn marks_unhealthy(kind: io::ErrorKind) -> bool {
    kind != io::ErrorKind::Interrupted
}

/// 非阻塞地窥探一个字节：读到 EOF 或硬错误说明对端已挂断，未到数据（`WouldBlock`）视为仍然存活。
fn peer_alive(peer: &Socket) -> bool {
    if peer.set_nonblocking(true).is_err() {
        return true;
    }
    let mut probe = [MaybeUninit::<u8>::uninit()];
    let alive = match peer.peek(&mut probe) {
        Ok(n) => n > 0,
        Err(err) => matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        ),
    };
    if let Err(err) = peer.set_nonblocking(false) {
        warn!(target: targets::UNIX, error = %err, "failed to restore blocking mode");
        return false;
    }
    alive
}

impl TwoWayStream for UnixSockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(peer) = self.peer.as_mut() else {
            self.ok = false;
            return Ok(0);
        };
        match peer.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.ok = false;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(err) => {
                if marks_unhealthy(err.kind()) {
                    self.ok = false;
                }
                Err(err)
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let Some(peer) = self.peer.as_mut() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        };
        match peer.write_all(buf) {
            Ok(()) => Ok(()),
            Err(err) if is_timeout_kind(err.kind()) => Err(err),
            Err(err) => {
                warn!(
                    target: targets::UNIX,
                    path = %self.path.display(),
                    error = %err,
                    "unix write failed, closing stream"
                );
                self.close();
                Err(err)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.peer.as_mut() {
            Some(peer) => peer.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        self.ok = false;
        if let Some(peer) = self.peer.take() {
            let _ = peer.shutdown(Shutdown::Both);
        }
        if let Some(listener) = self.listener.take() {
            let _ = listener.shutdown(Shutdown::Both);
        }
        if self.owns_path {
            self.owns_path = false;
            if let Err(err) = fs::remove_file(&self.path)
                && err.kind() != io::ErrorKind::NotFound
            {
                warn!(
                    target: targets::UNIX,
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove rendezvous file"
                );
            }
        }
        if self.state == RendezvousState::Open {
            debug!(target: targets::UNIX, path = %self.path.display(), "unix stream closed");
        }
        self.state = RendezvousState::Closed;
    }

    fn is_ok(&self) -> bool {
        self.ok && self.peer.as_ref().is_some_and(peer_alive)
    }

    fn local_address(&self) -> &Contact {
        &self.local
    }

    fn remote_address(&self) -> &Contact {
        &self.remote
    }

    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        let clone = self.peer.as_ref()?.try_clone().ok()?;
        Some(InterruptHandle::new(move || {
            let _ = clone.shutdown(Shutdown::Both);
        }))
    }
}

impl Drop for UnixSockStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for UnixSockStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixSockStream")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("ok", &self.ok)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::mpsc,
        time::{Duration, Instant},
    };

    use tether_core::TwoWayStreamExt;

    use super::*;

    fn contact(port: u16) -> Contact {
        Contact::new("127.0.0.1", port)
    }

    fn open_pair(dir: &Path, name: &str) -> (UnixSockStream, UnixSockStream) {
        let path = dir.join(name);
        let config = RendezvousConfig::new(dir).with_retry_delay(Duration::from_millis(20));
        let mut receiver = UnixSockStream::new(&path, config.clone(), contact(1), contact(2));
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            receiver.open(Role::Receiver).expect("receiver open");
            tx.send(()).unwrap();
            receiver
        });
        let mut sender = UnixSockStream::new(&path, config, contact(2), contact(1));
        sender.open(Role::Sender).expect("sender open");
        rx.recv().unwrap();
        (sender, handle.join().unwrap())
    }

    #[test]
    fn end_to_end_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sender, mut receiver) = open_pair(dir.path(), "a.sock");
        assert!(dir.path().join("a.sock").exists());

        sender.write(&[1, 2, 3, 4, 5]).unwrap();
        let mut buf = [0u8; 5];
        receiver.read_full(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5]);

        assert!(sender.is_ok());
        receiver.close();
        assert!(!receiver.is_ok());
        assert!(!sender.is_ok());
        assert!(!dir.path().join("a.sock").exists());
    }

    #[test]
    fn pending_data_keeps_sender_healthy_until_drained() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sender, mut receiver) = open_pair(dir.path(), "f.sock");
        receiver.write(b"bye").unwrap();
        receiver.close();
        assert!(sender.is_ok());
        let mut buf = [0u8; 3];
        sender.read_full(&mut buf).unwrap();
        assert_eq!(&buf, b"bye");
        assert!(!sender.is_ok());
        assert_eq!(sender.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn interrupted_read_does_not_poison_the_stream() {
        assert!(!marks_unhealthy(io::ErrorKind::Interrupted));
        assert!(marks_unhealthy(io::ErrorKind::ConnectionReset));
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sender, mut receiver) = open_pair(dir.path(), "b.sock");
        receiver.close();
        receiver.close();
        assert_eq!(receiver.state(), RendezvousState::Closed);
        let mut buf = [0u8; 1];
        assert_eq!(sender.read(&mut buf).unwrap(), 0);
        assert!(!sender.is_ok());
        sender.close();
        sender.close();
    }

    #[test]
    fn stale_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("c.sock"), b"stale").unwrap();
        let (mut sender, mut receiver) = open_pair(dir.path(), "c.sock");
        receiver.write(b"ok").unwrap();
        let mut buf = [0u8; 2];
        sender.read_full(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[test]
    fn sender_retry_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let config = RendezvousConfig::new(dir.path());
        let mut sender =
            UnixSockStream::new(dir.path().join("missing.sock"), config, contact(2), contact(1));
        let started = Instant::now();
        let err = sender.open(Role::Sender).unwrap_err();
        let elapsed = started.elapsed();

        match err {
            TransportError::Rendezvous { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(elapsed >= Duration::from_millis(400), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(!sender.is_ok());
    }

    #[test]
    fn interrupt_unblocks_reader() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sender, _receiver) = open_pair(dir.path(), "d.sock");
        let handle = sender.interrupt_handle().expect("open stream is interruptible");
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 1];
            let n = sender.read(&mut buf).unwrap_or(0);
            (n, sender.is_ok())
        });
        thread::sleep(Duration::from_millis(50));
        handle.interrupt();
        assert_eq!(reader.join().unwrap(), (0, false));
    }

    #[test]
    fn open_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sender, _receiver) = open_pair(dir.path(), "e.sock");
        assert!(sender.open(Role::Sender).is_err());
    }
}
