#![deny(unsafe_code)]
#![doc = r#"
# tether

## 模块使命（Why）
- 应用只关心“连到哪里、用什么载体”，不应逐个组装 TCP 流、载体注册表与握手驱动；
  本 crate 把三类载体按固定顺序注册，并提供建立连接的两个入口。

## 核心组件（What）
- [`default_carriers`]：按 `tcp`、`unix_stream`、`websocket` 的顺序注册载体；
- [`connect`]：建立 TCP 连接并以发起端身份完成握手；
- [`listen`] / [`accept`]：监听并以应答端身份完成握手；
- 各载体 crate 以 [`tcp`]、[`unix`]、[`websocket`] 模块名再导出。

## 注意事项（Trade-offs）
- 握手失败时连接已被关闭，调用方负责是否重试；
- 运行时目录在构建注册表时解析一次，之后不再读取环境变量。
"#]

use std::net::SocketAddr;

use tracing::info;

pub use tether_codec_websocket as websocket;
pub use tether_core::{
    Carrier, CarrierOptions, CarrierSpec, Carriers, Connection, ConnectionState, Contact,
    Environment, HEADER_LEN, HandshakeState, Header, ProcessEnvironment, Result, Route,
    TransportConfig, TransportError, TwoWayStream, TwoWayStreamExt, observability,
};
pub use tether_transport_tcp as tcp;
pub use tether_transport_unix as unix;

use tcp::{TcpByteStream, TcpCarrier, TcpListener, TcpSocketConfig};
use unix::{RendezvousConfig, UnixSocketCarrier};
use websocket::WebSocketCarrier;

/// 以进程环境解析运行时目录，构建默认载体注册表。
pub fn default_carriers(config: &TransportConfig) -> Result<Carriers> {
    default_carriers_with_env(config, &ProcessEnvironment)
}

/// 与 [`default_carriers`] 相同，但从给定环境解析运行时目录。
pub fn default_carriers_with_env(
    config: &TransportConfig,
    env: &dyn Environment,
) -> Result<Carriers> {
    config.validate()?;
    let rendezvous = RendezvousConfig::from_transport(config, env);
    info!(
        target: observability::targets::HANDSHAKE,
        runtime_dir = %rendezvous.runtime_dir().display(),
        "registering default carriers"
    );
    Ok(Carriers::new()
        .with(Box::new(TcpCarrier::new()))
        .with(Box::new(UnixSocketCarrier::new(rendezvous)))
        .with(Box::new(WebSocketCarrier::new())))
}

/// 连接 `addr` 并按 `route` 的载体说明完成握手。
pub fn connect(
    addr: SocketAddr,
    route: Route,
    carriers: &Carriers,
    config: &TransportConfig,
) -> Result<Connection> {
    let stream =
        TcpByteStream::connect_with_config(addr, TcpSocketConfig::from_transport(config))?;
    let mut connection = Connection::outgoing(Box::new(stream), route);
    connection.initiate(carriers)?;
    Ok(connection)
}

/// 绑定监听地址，新连接使用配置中的套接字选项。
pub fn listen(addr: SocketAddr, config: &TransportConfig) -> Result<TcpListener> {
    TcpListener::bind_with_config(addr, TcpSocketConfig::from_transport(config))
}

/// 接受一个连接并以 `local_name` 的身份完成应答端握手。
pub fn accept(listener: &TcpListener, local_name: &str, carriers: &Carriers) -> Result<Connection> {
    let stream = listener.accept()?;
    let mut connection = Connection::incoming(Box::new(stream), local_name);
    connection.respond(carriers)?;
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, path::Path};

    use super::*;

    #[test]
    fn default_registry_order_and_offers() {
        let env = BTreeMap::from([("TETHER_RUNTIME_DIR".to_owned(), "/srv/tether".to_owned())]);
        let carriers = default_carriers_with_env(&TransportConfig::default(), &env).unwrap();
        assert_eq!(
            carriers.names().collect::<Vec<_>>(),
            ["tcp", "unix_stream", "websocket"]
        );
        assert_eq!(
            carriers.offerable().collect::<Vec<_>>(),
            ["tcp", "unix_stream"]
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = TransportConfig {
            connect_attempts: 0,
            ..TransportConfig::default()
        };
        let err = default_carriers_with_env(&config, &BTreeMap::<String, String>::new())
            .unwrap_err();
        assert_eq!(err.code(), "tether.config.invalid");
    }

    #[test]
    fn explicit_runtime_dir_wins() {
        let config = TransportConfig {
            runtime_dir: Some("/var/run/app".into()),
            ..TransportConfig::default()
        };
        let rendezvous =
            RendezvousConfig::from_transport(&config, &BTreeMap::<String, String>::new());
        assert_eq!(rendezvous.runtime_dir(), Path::new("/var/run/app"));
    }
}
