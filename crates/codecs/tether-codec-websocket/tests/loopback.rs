//! 真实 TCP 回环上的 WebSocket 协商。
//!
//! 用标准库套接字扮演浏览器：手写升级请求、发送带掩码的帧，再以关闭帧结束会话。

use std::{
    io::{BufRead, BufReader, Write},
    net::TcpStream,
    thread,
};

use tether_codec_websocket::{
    CLOSE_SENTINEL, FrameType, WebSocketCarrier, accept_key, encode_frame, frame, get_frame,
};
use tether_core::{Carriers, Connection, HandshakeState};
use tether_transport_tcp::{TcpCarrier, TcpListener};
use tracing_test::traced_test;

fn registry() -> Carriers {
    Carriers::new()
        .with(Box::new(TcpCarrier::new()))
        .with(Box::new(WebSocketCarrier::new()))
}

#[traced_test]
#[test]
fn browser_session_over_loopback() {
    let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).expect("bind");
    let addr = listener.local_addr();
    let key = "x3JJHMbDL1EzLkh9GBhXDw==";

    let browser = thread::spawn(move || {
        let mut socket = TcpStream::connect(addr).expect("connect");
        write!(
            socket,
            "GET /?ws HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n"
        )
        .unwrap();

        let mut reader = BufReader::new(socket.try_clone().unwrap());
        let mut status = String::new();
        reader.read_line(&mut status).unwrap();
        let expected_accept = format!("Sec-WebSocket-Accept: {}\r\n", accept_key(key));
        let mut saw_accept = false;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" {
                break;
            }
            saw_accept |= line == expected_accept;
        }

        socket
            .write_all(&encode_frame(frame::OPCODE_TEXT, b"hello", Some([7, 7, 7, 7])))
            .unwrap();
        let reply = get_frame(&mut reader).unwrap();
        socket
            .write_all(&encode_frame(frame::OPCODE_CLOSE, &[0x03, 0xe8], Some([1, 2, 3, 4])))
            .unwrap();
        (status, saw_accept, reply)
    });

    let stream = listener.accept().expect("accept");
    let mut conn = Connection::incoming(Box::new(stream), "/viewer");
    conn.respond(&registry()).expect("respond");
    assert_eq!(conn.state(), HandshakeState::Established);
    assert_eq!(conn.route().from_name(), "web");

    let mut greeting = [0u8; 5];
    conn.begin_read().unwrap();
    conn.read_full(&mut greeting).unwrap();
    conn.end_read().unwrap();
    assert_eq!(&greeting, b"hello");
    conn.write_message(b"welcome").unwrap();

    let mut quit = [0u8; CLOSE_SENTINEL.len()];
    conn.begin_read().unwrap();
    conn.read_full(&mut quit).unwrap();
    assert_eq!(quit, CLOSE_SENTINEL);
    assert!(!conn.is_ok());

    let (status, saw_accept, reply) = browser.join().unwrap();
    assert_eq!(status, "HTTP/1.1 101 Switching Protocols\r\n");
    assert!(saw_accept);
    assert_eq!(reply.kind, FrameType::Binary);
    assert_eq!(&reply.payload[..], b"welcome");
    assert!(logs_contain("switching to websocket framing"));
}
