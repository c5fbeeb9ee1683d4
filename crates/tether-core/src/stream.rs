//! 双向字节流契约。
//!
//! # 教案级说明
//! - **意图 (Why)**：TCP 连接、Unix 域会合流、WebSocket 成帧适配器在协商完成后必须对上层呈现
//!   同一套读写接口，协商驱动因此可以在握手中途替换底层流而不影响后续消息收发。
//! - **契约 (What)**：
//!   - [`TwoWayStream::read`] 语义与 `io::Read::read` 一致，返回 `Ok(0)` 表示对端关闭；
//!   - [`TwoWayStream::write`] 必须写完整个缓冲或返回错误；
//!   - [`TwoWayStream::close`] 幂等，可在另一线程通过 [`InterruptHandle`] 中断阻塞读之后调用；
//!   - 所有权通过 `Box<dyn TwoWayStream>` 的移动转交，见 [`BoxedStream`]。
//! - **注意事项 (Trade-offs)**：中断句柄是唯一跨线程的入口，其余方法都要求 `&mut self`，
//!   从而避免在流内部引入锁。

use std::{fmt, io, sync::Arc};

use crate::contact::Contact;

/// 独占所有权的字节流，协商期间在连接状态与载体之间移动。
pub type BoxedStream = Box<dyn TwoWayStream>;

/// 双向字节流。
pub trait TwoWayStream: Send {
    /// 读取若干字节；`Ok(0)` 表示流已结束。
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 写出整个缓冲。
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// 关闭底层资源；重复调用无副作用。
    fn close(&mut self);

    /// 流是否仍可用。读到 EOF、协议错误或关闭后返回 `false`。
    fn is_ok(&self) -> bool;

    fn local_address(&self) -> &Contact;

    fn remote_address(&self) -> &Contact;

    /// 返回可跨线程使用的中断句柄；不支持中断的流返回 `None`。
    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        None
    }

    /// 在当前线程触发中断，等价于 `interrupt_handle()?.interrupt()`。
    fn interrupt(&mut self) {
        if let Some(handle) = self.interrupt_handle() {
            handle.interrupt();
        }
    }
}

impl<T: TwoWayStream + ?Sized> TwoWayStream for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_ok(&self) -> bool {
        (**self).is_ok()
    }

    fn local_address(&self) -> &Contact {
        (**self).local_address()
    }

    fn remote_address(&self) -> &Contact {
        (**self).remote_address()
    }

    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        (**self).interrupt_handle()
    }

    fn interrupt(&mut self) {
        (**self).interrupt()
    }
}

/// 中断动作，通常由底层套接字的 `shutdown` 实现。
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

impl<F> Interrupt for F
where
    F: Fn() + Send + Sync,
{
    fn interrupt(&self) {
        self()
    }
}

/// 可克隆的中断句柄。
///
/// 句柄只持有触发 `shutdown` 所需的最小资源（例如克隆出的套接字描述符），
/// 因此在流被关闭后调用也是安全的：操作系统会返回错误，句柄内部忽略它。
#[derive(Clone)]
pub struct InterruptHandle(Arc<dyn Interrupt>);

impl InterruptHandle {
    pub fn new(action: impl Interrupt + 'static) -> Self {
        Self(Arc::new(action))
    }

    pub fn interrupt(&self) {
        self.0.interrupt();
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InterruptHandle")
    }
}

/// 单行长度上限，防止对端发送无换行的超长数据耗尽内存。
pub const MAX_LINE_LEN: usize = 8 * 1024;

/// [`TwoWayStream`] 的组合读取工具。
pub trait TwoWayStreamExt: TwoWayStream {
    /// 填满整个缓冲，否则失败。
    ///
    /// 只有这里会重试部分读；`Interrupted` 会被吞掉并继续读，提前 EOF 返回
    /// `UnexpectedEof`。
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream ended after {filled} of {} bytes", buf.len()),
                    ));
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// 读取一行（以 `\n` 结束），去掉行尾的 `\r\n` 或 `\n`。
    fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.read_full(&mut byte)?;
            if byte[0] == b'\n' {
                break;
            }
            if line.len() >= MAX_LINE_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "line exceeds maximum length",
                ));
            }
            line.push(byte[0]);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

impl<T: TwoWayStream + ?Sized> TwoWayStreamExt for T {}

/// 把 [`TwoWayStream`] 暴露为标准库 `Read`/`Write`，供编解码器复用现有读取逻辑。
pub struct StreamIo<'a, S: ?Sized>(&'a mut S);

impl<'a, S: TwoWayStream + ?Sized> StreamIo<'a, S> {
    pub fn new(stream: &'a mut S) -> Self {
        Self(stream)
    }
}

impl<S: TwoWayStream + ?Sized> io::Read for StreamIo<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<S: TwoWayStream + ?Sized> io::Write for StreamIo<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
