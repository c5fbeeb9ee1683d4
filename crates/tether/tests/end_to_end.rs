//! 默认注册表上的端到端场景：真实 TCP 回环 + 临时运行时目录。

use std::{fs, thread};

use proptest::prelude::*;
use tether::{
    Carriers, HandshakeState, Route, TransportConfig, TwoWayStream, accept, connect,
    default_carriers, listen,
};
use tracing_test::traced_test;

fn config_in(dir: &std::path::Path) -> TransportConfig {
    TransportConfig {
        runtime_dir: Some(dir.to_path_buf()),
        connect_attempts: 50,
        connect_retry_delay_ms: 20,
        ..TransportConfig::default()
    }
}

fn serve<T, F>(
    carriers: Carriers,
    config: &TransportConfig,
    handler: F,
) -> (std::net::SocketAddr, thread::JoinHandle<T>)
where
    T: Send + 'static,
    F: FnOnce(tether::Connection) -> T + Send + 'static,
{
    let listener = listen("127.0.0.1:0".parse().unwrap(), config).expect("listen");
    let addr = listener.local_addr();
    let handle = thread::spawn(move || {
        let connection = accept(&listener, "/server", &carriers).expect("accept");
        handler(connection)
    });
    (addr, handle)
}

#[test]
fn tcp_with_ack_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let (addr, server) = serve(default_carriers(&config).unwrap(), &config, |mut conn| {
        let len = conn.begin_read().unwrap().expect("tcp announces length");
        let mut body = vec![0u8; len];
        conn.read_full(&mut body).unwrap();
        conn.end_read().unwrap();
        (conn.route().clone(), body)
    });

    let carriers = default_carriers(&config).unwrap();
    let mut client = connect(
        addr,
        Route::new("/client", "/server", "tcp+ack"),
        &carriers,
        &config,
    )
    .expect("connect");
    assert!(client.trace().contains(&HandshakeState::AckExchanged));
    client.write_message(b"over tcp").unwrap();

    let (route, body) = server.join().unwrap();
    assert_eq!(route.from_name(), "/client");
    assert_eq!(route.carrier(), "tcp");
    assert_eq!(body, b"over tcp");
}

#[traced_test]
#[test]
fn unix_rendezvous_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let (addr, server) = serve(default_carriers(&config).unwrap(), &config, |mut conn| {
        assert_eq!(conn.begin_read().unwrap(), None);
        let mut buf = [0u8; 5];
        conn.read_full(&mut buf).unwrap();
        conn.end_read().unwrap();
        assert_eq!(conn.stream().unwrap().local_address().carrier(), "unix_stream");
        conn.close();
        (buf, conn.is_ok())
    });

    let carriers = default_carriers(&config).unwrap();
    let mut client = connect(
        addr,
        Route::new("/client", "/server", "unix_stream+ack"),
        &carriers,
        &config,
    )
    .expect("connect");
    client.write_message(&[1, 2, 3, 4, 5]).unwrap();

    let (buf, server_ok) = server.join().unwrap();
    assert_eq!(buf, [1, 2, 3, 4, 5]);
    assert!(!server_ok);
    assert!(!client.is_ok());
    client.close();
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(logs_contain("unix rendezvous established"));
}

#[test]
fn websocket_initiated_by_tether() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let (addr, server) = serve(default_carriers(&config).unwrap(), &config, |mut conn| {
        conn.begin_read().unwrap();
        let mut buf = [0u8; 70_000];
        conn.read_full(&mut buf).unwrap();
        conn.end_read().unwrap();
        (conn.route().from_name().to_owned(), buf.iter().map(|b| *b as u64).sum::<u64>())
    });

    let carriers = default_carriers(&config).unwrap();
    let mut client = connect(
        addr,
        Route::new("/client", "/server", "websocket+ack"),
        &carriers,
        &config,
    )
    .expect("connect");
    client.write_message(&vec![1u8; 70_000]).unwrap();

    let (from, sum) = server.join().unwrap();
    assert_eq!(from, "web");
    assert_eq!(sum, 70_000);
}

#[test]
fn unknown_carrier_name_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let listener = listen("127.0.0.1:0".parse().unwrap(), &config).unwrap();
    let carriers = default_carriers(&config).unwrap();
    let err = connect(
        listener.local_addr(),
        Route::new("/client", "/server", "mjpeg"),
        &carriers,
        &config,
    )
    .unwrap_err();
    assert_eq!(err.code(), "tether.handshake.unknown_carrier");
}

#[test]
fn each_carrier_accepts_only_its_own_headers() {
    let carriers = default_carriers(&TransportConfig {
        runtime_dir: Some("/tmp/tether-headers".into()),
        ..TransportConfig::default()
    })
    .unwrap();
    let names: Vec<String> = carriers.names().map(str::to_owned).collect();

    for owner in &names {
        for ack in [false, true] {
            let mut initiator = carriers.choose_by_name(owner).unwrap();
            let mut options = tether::CarrierOptions::default();
            if ack {
                options = options.with_flag("ack");
            }
            initiator.configure(&options).unwrap();
            let mut header = [0u8; tether::HEADER_LEN];
            initiator.get_header(&mut header);

            for candidate in &names {
                let checker = carriers.choose_by_name(candidate).unwrap();
                assert_eq!(
                    checker.check_header(&header),
                    candidate == owner,
                    "{candidate} checking {owner} header (ack={ack})"
                );
                assert!(!checker.check_header(&header[..7]), "{candidate} accepted 7 bytes");
                let mut long = header.to_vec();
                long.push(b' ');
                assert!(!checker.check_header(&long), "{candidate} accepted 9 bytes");
            }
        }
    }
}

proptest! {
    #[test]
    fn headers_identify_their_carrier(index in 0usize..3, ack in any::<bool>()) {
        let carriers = default_carriers(&TransportConfig {
            runtime_dir: Some("/tmp/tether-props".into()),
            ..TransportConfig::default()
        })
        .unwrap();
        let name = carriers.names().nth(index).unwrap().to_owned();
        let mut initiator = carriers.choose_by_name(&name).unwrap();
        let mut options = tether::CarrierOptions::default();
        if ack {
            options = options.with_flag("ack");
        }
        initiator.configure(&options).unwrap();

        let mut header = [0u8; tether::HEADER_LEN];
        initiator.get_header(&mut header);
        let mut responder = carriers.choose_by_header(&header).unwrap();
        prop_assert_eq!(responder.name(), name.as_str());
        responder.set_parameters(&header);
        // WebSocket 的确认开关随请求目标传递，而不是编码在首部中。
        if name != "websocket" {
            prop_assert_eq!(responder.require_ack(), ack);
        }
    }
}
