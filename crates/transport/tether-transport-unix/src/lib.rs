#![deny(unsafe_code)]
#![doc = r#"
# tether-transport-unix

## 模块使命（Why）
- 同一主机上的两个端点先经 TCP 完成首部交换，再通过 Unix 域套接字会合并换流，
  后续消息不再经过 TCP 协议栈。

## 核心组件（What）
- [`rendezvous`]：会合路径公式与 [`RendezvousConfig`]；
- [`UnixSockStream`]：带重试的会合流，实现 [`tether_core::TwoWayStream`]；
- [`UnixSocketCarrier`]：`unix_stream` 载体，首部 `UNIX_STR` / `UNIX_ACK`。

## 注意事项（Trade-offs）
- 套接字文件由接收端创建与删除；发送端只负责带上限的重试连接。
"#]

mod carrier;
pub mod rendezvous;
mod stream;

pub use carrier::{UNIX_ACK_HEADER, UNIX_CARRIER_NAME, UNIX_HEADER, UnixSocketCarrier};
pub use rendezvous::{RendezvousConfig, Role, receiver_path, rendezvous_path, sender_path};
pub use stream::{RendezvousState, UnixSockStream};
