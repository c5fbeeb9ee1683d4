#![deny(unsafe_code)]
#![doc = "tether-core: 载体协商与双向字节流的统一契约层。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：让 TCP、Unix 域套接字、WebSocket 等载体在同一套握手状态机下完成协商，并在协商结束后把原始字节流替换为载体专属的包装流，上层读写无需感知差异。"]
#![doc = "- **What**：定义 [`Contact`]、[`Route`]、[`Header`] 等值类型，[`TwoWayStream`] 字节流契约，[`Carrier`] 协商策略 trait，[`ConnectionState`] 及其实现 [`ConnectionLink`]，握手驱动 [`Connection`] 与载体注册表 [`Carriers`]。"]
#![doc = "- **How**：全部接口为同步阻塞 IO，每条连接由单一线程驱动；取消仅通过 [`InterruptHandle`] 触发底层 `shutdown`。"]

pub mod carrier;
pub mod config;
pub mod connection;
pub mod contact;
pub mod error;
pub mod header;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod observability;
pub mod registry;
pub mod route;
pub mod stream;

pub use carrier::Carrier;
pub use config::{
    CarrierOptions, CarrierSpec, Environment, ProcessEnvironment, RuntimeDirConfig,
    TransportConfig, resolve_runtime_dir,
};
pub use connection::{Connection, ConnectionLink, ConnectionState, HandshakeState, HandshakeTrace};
pub use contact::Contact;
pub use error::{Operation, Result, TransportError};
pub use header::{ACK_TOKEN, HEADER_LEN, Header};
pub use registry::Carriers;
pub use route::Route;
pub use stream::{
    BoxedStream, Interrupt, InterruptHandle, StreamIo, TwoWayStream, TwoWayStreamExt,
};
