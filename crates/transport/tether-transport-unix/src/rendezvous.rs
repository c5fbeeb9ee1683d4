//! 会合路径计算与会合参数。
//!
//! # 教案级说明
//! - **意图 (Why)**：发送端与接收端必须在互不通信的情况下算出同一个套接字路径。
//!   两端都能看到同一条 TCP 连接的两个端口号，因此路径由这两个端口派生；
//! - **契约 (What)**：发送端使用 `<dir>/<remote>_<local>.sock`，接收端使用
//!   `<dir>/<local>_<remote>.sock`。同一连接上发送端的 `local` 正是接收端的 `remote`，
//!   两个公式因此得到相同路径；
//! - **注意事项 (Trade-offs)**：路径长度受 `sun_path`（通常 108 字节）限制，
//!   运行时目录过深时绑定会失败并以会合错误返回。

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tether_core::{Environment, TransportConfig};

/// 会合中的角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// 主动 `connect` 的一端，即协商的发起端。
    Sender,
    /// `bind` + `listen` + `accept` 的一端，即协商的应答端。
    Receiver,
}

/// 发送端会合路径。
pub fn sender_path(dir: &Path, local_port: u16, remote_port: u16) -> PathBuf {
    dir.join(format!("{remote_port}_{local_port}.sock"))
}

/// 接收端会合路径。
pub fn receiver_path(dir: &Path, local_port: u16, remote_port: u16) -> PathBuf {
    dir.join(format!("{local_port}_{remote_port}.sock"))
}

/// 按角色计算会合路径。
pub fn rendezvous_path(dir: &Path, role: Role, local_port: u16, remote_port: u16) -> PathBuf {
    match role {
        Role::Sender => sender_path(dir, local_port, remote_port),
        Role::Receiver => receiver_path(dir, local_port, remote_port),
    }
}

/// 会合参数：运行时目录、连接重试与监听队列长度。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RendezvousConfig {
    runtime_dir: PathBuf,
    connect_attempts: u32,
    retry_delay: Duration,
    backlog: i32,
}

impl RendezvousConfig {
    /// 使用默认重试参数（5 次、间隔 100ms、backlog 2）。
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        let defaults = TransportConfig::default();
        Self {
            runtime_dir: runtime_dir.into(),
            connect_attempts: defaults.connect_attempts,
            retry_delay: defaults.connect_retry_delay(),
            backlog: defaults.listen_backlog,
        }
    }

    /// 从传输配置派生；未显式配置运行时目录时按环境解析。
    pub fn from_transport(config: &TransportConfig, env: &dyn Environment) -> Self {
        Self {
            runtime_dir: config.runtime_dir(env).path().to_path_buf(),
            connect_attempts: config.connect_attempts.max(1),
            retry_delay: config.connect_retry_delay(),
            backlog: config.listen_backlog.max(1),
        }
    }

    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    /// 本配置下指定角色的会合路径。
    pub fn path_for(&self, role: Role, local_port: u16, remote_port: u16) -> PathBuf {
        rendezvous_path(&self.runtime_dir, role, local_port, remote_port)
    }
}
