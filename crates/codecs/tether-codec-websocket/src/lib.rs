#![deny(unsafe_code)]
#![doc = r#"
# tether-codec-websocket

## 模块使命（Why）
- 浏览器可以直接连接 tether 端口：HTTP 升级请求的前 8 个字节 `GET /?ws` 被当作载体首部，
  握手完成后消息以 WebSocket 帧收发。

## 核心组件（What）
- [`frame`]：RFC 6455 帧编解码，发送不加掩码，接收识别掩码；
- [`WebSocketStream`]：包装字节流的成帧适配器，对上层呈现普通字节流；
- [`handshake`]：升级请求解析、101 响应渲染与发起端校验；
- [`WebSocketCarrier`]：`websocket` 载体，确认交换委托给内部的 `tcp` 载体。

## 注意事项（Trade-offs）
- 每条消息只编码为一帧；接收端接受分片，但不区分消息边界。
"#]

mod carrier;
pub mod frame;
pub mod handshake;
mod stream;

pub use carrier::{
    WEB_SENDER, WEBSOCKET_CARRIER_NAME, WEBSOCKET_HEADER, WEBSOCKET_REQUEST_PREFIX,
    WebSocketCarrier,
};
pub use frame::{CLOSE_SENTINEL, Frame, FrameError, FrameType, encode_frame, get_frame, make_frame};
pub use handshake::{ClientHandshake, UpgradeError, UpgradeRequest, accept_key};
pub use stream::WebSocketStream;
