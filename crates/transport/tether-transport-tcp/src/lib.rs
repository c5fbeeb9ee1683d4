#![deny(unsafe_code)]
#![doc = r#"
# tether-transport-tcp

## 模块使命（Why）
- **默认载体**：为协商层提供最基础的字节通路，既是 `tcp` 载体本身，也是 WebSocket 等组合型载体的底层委托；
- **统一契约**：把 `std::net::TcpStream` 包装为 [`tether_core::TwoWayStream`]，使协商驱动无需了解套接字细节。

## 核心组件（What）
- [`TcpByteStream`]：阻塞读写、幂等关闭，中断句柄通过克隆的套接字调用 `shutdown`；
- [`TcpListener`]：绑定 + 逐个接受连接，并为每条连接应用默认 [`TcpSocketConfig`]；
- [`TcpCarrier`]：首部 `TCP_STRM` / `TCP__ACK`，应答端回送首部，消息前发送 4 字节大端长度索引。

## 注意事项（Trade-offs）
- 每条连接由单一线程驱动，本 crate 不引入异步运行时；
- 套接字选项（`SO_LINGER` 等）通过 `socket2::SockRef` 设置，失败时连接不会被交给调用方。
"#]

mod carrier;
mod listener;
mod stream;

pub use carrier::{TCP_ACK_HEADER, TCP_CARRIER_NAME, TCP_HEADER, TcpCarrier};
pub use listener::TcpListener;
pub use stream::{TcpByteStream, TcpSocketConfig};
