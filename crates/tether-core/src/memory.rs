//! 内存字节流测试替身。
//!
//! # 教案级说明
//! - **Why**：协商驱动与成帧适配器的大部分逻辑与真实套接字无关，用内存流测试可以避免端口冲突，
//!   同时仍然覆盖阻塞读、中断唤醒与幂等关闭这些并发语义；
//! - **What**：
//!   - [`MemoryStream::pair`] 返回一对互连的双工流，行为近似一条 TCP 连接；
//!   - [`ScriptedStream`] 从固定脚本读取并记录全部写入，便于逐字节断言编解码输出；
//! - **How**：每个方向是一根由 `parking_lot::Mutex` + `Condvar` 保护的管道，关闭或中断会唤醒阻塞的读者。

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc,
        atomic::{AtomicU16, Ordering},
    },
};

use parking_lot::{Condvar, Mutex};

use crate::{
    contact::Contact,
    stream::{InterruptHandle, TwoWayStream},
};

/// 内存流使用的主机名；两端相同，因此被视为本地连接。
pub const MEMORY_HOST: &str = "memory";

static NEXT_PORT: AtomicU16 = AtomicU16::new(40_000);

#[derive(Default)]
struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
}

impl Pipe {
    fn close(&self) {
        self.state.lock().closed = true;
        self.readable.notify_all();
    }
}

/// 内存双工流的一端。
pub struct MemoryStream {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
    local: Contact,
    remote: Contact,
    ok: bool,
}

impl MemoryStream {
    /// 创建一对互连的流，端口自动分配且互不重复。
    pub fn pair() -> (MemoryStream, MemoryStream) {
        let a = NEXT_PORT.fetch_add(2, Ordering::Relaxed);
        Self::pair_with(
            Contact::new(MEMORY_HOST, a),
            Contact::new(MEMORY_HOST, a.wrapping_add(1)),
        )
    }

    /// 以给定端点创建一对流，第一个返回值的本地地址为 `first`。
    pub fn pair_with(first: Contact, second: Contact) -> (MemoryStream, MemoryStream) {
        let forward = Arc::new(Pipe::default());
        let backward = Arc::new(Pipe::default());
        let left = MemoryStream {
            incoming: Arc::clone(&backward),
            outgoing: Arc::clone(&forward),
            local: first.clone(),
            remote: second.clone(),
            ok: true,
        };
        let right = MemoryStream {
            incoming: forward,
            outgoing: backward,
            local: second,
            remote: first,
            ok: true,
        };
        (left, right)
    }
}

impl TwoWayStream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.incoming.state.lock();
        while state.buf.is_empty() && !state.closed {
            self.incoming.readable.wait(&mut state);
        }
        if state.buf.is_empty() {
            self.ok = false;
            return Ok(0);
        }
        let n = buf.len().min(state.buf.len());
        for (slot, byte) in buf.iter_mut().zip(state.buf.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.outgoing.state.lock();
        if state.closed {
            self.ok = false;
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        state.buf.extend(buf);
        drop(state);
        self.outgoing.readable.notify_all();
        Ok(())
    }

    fn close(&mut self) {
        self.ok = false;
        self.incoming.close();
        self.outgoing.close();
    }

    fn is_ok(&self) -> bool {
        self.ok
    }

    fn local_address(&self) -> &Contact {
        &self.local
    }

    fn remote_address(&self) -> &Contact {
        &self.remote
    }

    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        let incoming = Arc::clone(&self.incoming);
        let outgoing = Arc::clone(&self.outgoing);
        Some(InterruptHandle::new(move || {
            incoming.close();
            outgoing.close();
        }))
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// 读取预置脚本、记录写入的流。
pub struct ScriptedStream {
    script: Vec<u8>,
    cursor: usize,
    chunk_size: usize,
    written: Arc<Mutex<Vec<u8>>>,
    local: Contact,
    remote: Contact,
    ok: bool,
}

impl ScriptedStream {
    pub fn new(script: &[u8]) -> Self {
        Self {
            script: script.to_vec(),
            cursor: 0,
            chunk_size: usize::MAX,
            written: Arc::new(Mutex::new(Vec::new())),
            local: Contact::new(MEMORY_HOST, 1),
            remote: Contact::new(MEMORY_HOST, 2),
            ok: true,
        }
    }

    /// 每次 `read` 最多返回 `size` 字节，用于模拟分片到达。
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// 写入记录的共享句柄，在流被移交后仍可读取。
    pub fn written_handle(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.len() - self.cursor
    }
}

impl TwoWayStream for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining()).min(self.chunk_size);
        if n == 0 && !buf.is_empty() {
            self.ok = false;
            return Ok(0);
        }
        buf[..n].copy_from_slice(&self.script[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if !self.ok {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.written.lock().extend_from_slice(buf);
        Ok(())
    }

    fn close(&mut self) {
        self.ok = false;
    }

    fn is_ok(&self) -> bool {
        self.ok
    }

    fn local_address(&self) -> &Contact {
        &self.local
    }

    fn remote_address(&self) -> &Contact {
        &self.remote
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;
    use crate::stream::TwoWayStreamExt;

    #[test]
    fn pair_is_cross_connected() {
        let (mut left, mut right) = MemoryStream::pair();
        assert_eq!(left.remote_address(), right.local_address());
        left.write(b"ping").unwrap();
        let mut buf = [0u8; 4];
        right.read_full(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn interrupt_wakes_blocked_reader() {
        let (mut left, _right) = MemoryStream::pair();
        let handle = left.interrupt_handle().expect("memory streams are interruptible");
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 1];
            let n = left.read(&mut buf).unwrap();
            (n, left.is_ok())
        });
        thread::sleep(Duration::from_millis(20));
        handle.interrupt();
        assert_eq!(reader.join().unwrap(), (0, false));
    }

    #[test]
    fn close_is_idempotent_and_reaches_peer() {
        let (mut left, mut right) = MemoryStream::pair();
        left.close();
        left.close();
        assert!(!left.is_ok());
        let mut buf = [0u8; 1];
        assert_eq!(right.read(&mut buf).unwrap(), 0);
        assert!(!right.is_ok());
        assert!(right.write(b"x").is_err());
    }

    #[test]
    fn scripted_stream_records_writes() {
        let mut stream = ScriptedStream::new(b"ab");
        let sink = stream.written_handle();
        stream.write(b"hello").unwrap();
        assert_eq!(&*sink.lock(), b"hello");
        let mut buf = [0u8; 3];
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert!(!stream.is_ok());
    }
}
