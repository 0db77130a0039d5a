//! Concrete I/O wrappers layered on the readiness contract (spec §4.7).
//!
//! The scheduler core only requires something implementing
//! `crate::backend::Backend`; this module is the one concrete "external
//! collaborator" Polyphony ships, built on the same `smol::Async<T>` the
//! default backend already polls for readiness. [`AsyncIo`] wraps a source
//! in `Rc<RefCell<Async<T>>>` so the same handle can sit in the backend's
//! interest list (shared, `Rc`) while still giving the owning fiber a
//! mutable path to the underlying non-blocking syscalls (`RefCell`).
//!
//! Every blocking-shaped operation here follows the same pattern: attempt
//! the non-blocking syscall; on `WouldBlock`, suspend in [`wait_io`]; retry
//! once woken. Because `wait_io` is a suspension point, a pending
//! cancellation signal surfaces there rather than being swallowed (spec
//! §4.7 "honor cancellation signals delivered during `wait_io`").

use crate::backend::IoReady;
use crate::error::Error;
use crate::scheduler::{switch_fiber, Scheduler};
use smol::Async;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::rc::Rc;

/// A shared, non-blocking I/O source registered with the scheduler's
/// backend. Cheap to `Clone` (an `Rc` bump) so the same pipe/socket/file
/// can be read from one fiber and written to from another.
pub struct AsyncIo<T: AsRawFd + 'static>(Rc<RefCell<Async<T>>>);

impl<T: AsRawFd + 'static> AsyncIo<T> {
    pub fn new(inner: Async<T>) -> Self {
        Self(Rc::new(RefCell::new(inner)))
    }
}

impl<T: AsRawFd + 'static> Clone for AsyncIo<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Suspend the current fiber until `source` is readable (or, if `writable`,
/// writable) per spec §4.7 `wait_io`. Returns immediately without
/// suspending if the source is already ready.
pub async fn wait_io<T: AsRawFd + 'static>(source: &AsyncIo<T>, writable: bool) -> crate::Result<()> {
    let fiber = Scheduler::current_fiber().expect("wait_io requires a running fiber");

    let already_ready = {
        let inner = source.0.borrow();
        if writable {
            inner.ready_writable()
        } else {
            inner.ready_readable()
        }
    };
    if already_ready {
        return Ok(());
    }

    let handle: Rc<dyn IoReady> = source.0.clone();
    let result = switch_fiber(move |s, _| {
        s.register_io(fiber, handle, writable);
    })
    .await;
    // Always deregister, whether we woke because the source became ready
    // or because a cancellation signal cut the wait short — the interest
    // is this fiber's resource to release on every exit path (spec §5
    // "Resource discipline").
    Scheduler::with(|s| s.deregister_io(fiber));
    result.map(|_| ())
}

/// Read into `buf`, retrying while the syscall reports "would block" after
/// a successful [`wait_io`]. Returns `Ok(0)` at end-of-stream (spec §7.4).
pub async fn read<T>(io: &AsyncIo<T>, buf: &mut [u8]) -> crate::Result<usize>
where
    T: Read + AsRawFd + 'static,
{
    loop {
        let attempt = io.0.borrow_mut().get_mut().read(buf);
        match attempt {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => wait_io(io, false).await?,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Write `buf` in full, retrying while the syscall reports "would block"
/// after a successful [`wait_io`].
pub async fn write<T>(io: &AsyncIo<T>, mut buf: &[u8]) -> crate::Result<()>
where
    T: Write + AsRawFd + 'static,
{
    while !buf.is_empty() {
        let attempt = io.0.borrow_mut().get_mut().write(buf);
        match attempt {
            Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero).into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => wait_io(io, true).await?,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read whatever is available after at most one suspension, returning
/// `Ok(0)` at end-of-stream rather than raising (spec §4.7 `readpartial`).
pub async fn readpartial<T>(io: &AsyncIo<T>, buf: &mut [u8]) -> crate::Result<usize>
where
    T: Read + AsRawFd + 'static,
{
    read(io, buf).await
}

/// Read until `buf` is completely filled or raise the idiomatic
/// end-of-file error if the stream ends first (spec §7.4 "raise the
/// idiomatic end-of-file error for blocking-style calls").
pub async fn read_exact<T>(io: &AsyncIo<T>, buf: &mut [u8]) -> crate::Result<()>
where
    T: Read + AsRawFd + 'static,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = read(io, &mut buf[filled..]).await?;
        if n == 0 {
            return Err(std::io::Error::new(ErrorKind::UnexpectedEof, "end of stream").into());
        }
        filled += n;
    }
    Ok(())
}

/// Read in a loop, calling `on_chunk` with each non-empty chunk, until
/// end-of-stream or a cancellation signal (spec §4.7 `read_loop`).
pub async fn read_loop<T, F>(io: &AsyncIo<T>, mut on_chunk: F) -> crate::Result<()>
where
    T: Read + AsRawFd + 'static,
    F: FnMut(&[u8]),
{
    let mut buf = [0u8; 4096];
    loop {
        let n = read(io, &mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        on_chunk(&buf[..n]);
    }
}

/// The capability a [`feed_loop`] target satisfies: a single method
/// receiving each chunk (spec §9 "Dynamic dispatch in `feed_loop`" —
/// "in a statically typed host, require the capability interface").
pub trait Feed {
    fn feed(&mut self, chunk: &[u8]);
}

impl<F: FnMut(&[u8])> Feed for F {
    fn feed(&mut self, chunk: &[u8]) {
        self(chunk)
    }
}

/// Read in a loop, feeding each chunk to `target.feed(chunk)` (spec §4.7
/// `feed_loop`, default dispatch is "call the target"). Terminates on
/// end-of-stream or cancellation.
pub async fn feed_loop<T, Target>(io: &AsyncIo<T>, mut target: Target) -> crate::Result<()>
where
    T: Read + AsRawFd + 'static,
    Target: Feed,
{
    read_loop(io, move |chunk| target.feed(chunk)).await
}

/// Line/char/byte-oriented reads over an [`AsyncIo`] (spec §6 `gets`,
/// `getc`, `getbyte`), buffering whatever a chunked [`read`] over-fetches.
pub struct LineReader<T: Read + AsRawFd + 'static> {
    io: AsyncIo<T>,
    pending: RefCell<VecDeque<u8>>,
}

impl<T: Read + AsRawFd + 'static> LineReader<T> {
    pub fn new(io: AsyncIo<T>) -> Self {
        Self {
            io,
            pending: RefCell::new(VecDeque::new()),
        }
    }

    async fn fill(&self) -> crate::Result<bool> {
        let mut chunk = [0u8; 4096];
        let n = read(&self.io, &mut chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        self.pending.borrow_mut().extend(chunk[..n].iter().copied());
        Ok(true)
    }

    /// One byte, or `None` at end-of-stream (spec §6 `getbyte`).
    pub async fn getbyte(&self) -> crate::Result<Option<u8>> {
        loop {
            if let Some(b) = self.pending.borrow_mut().pop_front() {
                return Ok(Some(b));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    /// One UTF-8 character, or `None` at end-of-stream (spec §6 `getc`).
    pub async fn getc(&self) -> crate::Result<Option<char>> {
        let Some(first) = self.getbyte().await? else {
            return Ok(None);
        };
        let len = utf8_sequence_len(first);
        let mut bytes = vec![first];
        for _ in 1..len {
            match self.getbyte().await? {
                Some(b) => bytes.push(b),
                None => break,
            }
        }
        Ok(std::str::from_utf8(&bytes).ok().and_then(|s| s.chars().next()))
    }

    /// One line, including its trailing `\n` if the stream had one, or
    /// `None` at end-of-stream with nothing left to return (spec §6
    /// `gets`).
    pub async fn gets(&self) -> crate::Result<Option<String>> {
        let mut line = Vec::new();
        loop {
            match self.getbyte().await? {
                Some(b'\n') => {
                    line.push(b'\n');
                    break;
                }
                Some(b) => line.push(b),
                None => {
                    if line.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

fn utf8_sequence_len(first_byte: u8) -> usize {
    if first_byte & 0x80 == 0 {
        1
    } else if first_byte & 0xE0 == 0xC0 {
        2
    } else if first_byte & 0xF0 == 0xE0 {
        3
    } else if first_byte & 0xF8 == 0xF0 {
        4
    } else {
        1
    }
}

/// A connected, bidirectional pipe-like pair backed by a Unix socket pair
/// (spec §8 scenario S6: "Pipe writer writes 'hello' then closes; reader
/// `read` returns 'hello'").
pub fn pipe() -> std::io::Result<(AsyncIo<std::os::unix::net::UnixStream>, AsyncIo<std::os::unix::net::UnixStream>)> {
    let (a, b) = std::os::unix::net::UnixStream::pair()?;
    Ok((AsyncIo::new(Async::new(a)?), AsyncIo::new(Async::new(b)?)))
}
