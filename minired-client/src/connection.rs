//! # Connection
//!
//! Purpose: Own one TCP socket plus its outbound command queue and drive
//! write-then-read request/response cycles.
//!
//! ## Design Principles
//! 1. **Explicit Modes**: A connection is blocking (optional per-call
//!    timeout) or non-blocking; `WouldBlock` means "retry" in the latter and
//!    "timed out" in the former.
//! 2. **Transparent Retries**: `Interrupted` is always retried and never
//!    surfaces to callers. A non-blocking write that finds the socket full
//!    waits for space, at most `WRITE_STALL_TIMEOUT` per stall.
//! 3. **Sticky Diagnostics**: Failures are returned as `Err` and mirrored into
//!    `last_error` for logging.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use minired_common::{Error, LastError, Result};
use tracing::debug;

use crate::command::{Arg, CommandWriter};
use crate::config::ClientConfig;
use crate::reader::ReplyReader;

/// Longest a non-blocking write waits for the socket to accept more bytes.
pub const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Single TCP connection to a RESP server.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    blocking: bool,
    writer: CommandWriter,
    last_error: Option<LastError>,
}

impl Connection {
    /// Connects without a timeout.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_timeout(host, port, None)
    }

    /// Connects, giving each resolved address at most `timeout`.
    pub fn connect_timeout(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let stream = open_stream(host, port, timeout)?;
        Ok(Connection {
            stream: Some(stream),
            blocking: true,
            writer: CommandWriter::new(),
            last_error: None,
        })
    }

    /// Connects using `config`, applying its I/O timeout.
    pub fn with_config(config: &ClientConfig) -> Result<Self> {
        let mut conn = Self::connect_timeout(&config.host, config.port, config.connect_timeout)?;
        if let Some(timeout) = config.io_timeout {
            conn.set_timeout(timeout)?;
        }
        Ok(conn)
    }

    /// Replaces the socket with a fresh blocking connection.
    ///
    /// Queued commands belonged to the old socket and are dropped.
    pub fn reconnect(&mut self, host: &str, port: u16, timeout: Option<Duration>) -> Result<()> {
        self.disconnect();
        self.writer.clear();
        self.blocking = true;
        let stream = open_stream(host, port, timeout);
        let stream = self.record(stream)?;
        self.stream = Some(stream);
        self.last_error = None;
        Ok(())
    }

    /// Closes the socket. Further I/O fails until `reconnect`.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(fd = stream.as_raw_fd(), "connection closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Raw descriptor of the live socket.
    pub fn fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Sets the read/write timeout. Only meaningful in blocking mode; a
    /// non-blocking connection ignores it.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if !self.blocking {
            return Ok(());
        }
        let result = self.stream().and_then(|stream| {
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;
            Ok(())
        });
        self.record(result)
    }

    /// Switches the socket to non-blocking mode.
    pub fn set_nonblocking(&mut self) -> Result<()> {
        let result = self
            .stream()
            .and_then(|stream| stream.set_nonblocking(true).map_err(Error::Io));
        self.record(result)?;
        self.blocking = false;
        Ok(())
    }

    /// Most recent failure, for diagnostics.
    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    /// Queues a command built from `template`.
    pub fn append_command(&mut self, template: &str, args: &[Arg<'_>]) -> Result<()> {
        let result = self.writer.append(template, args);
        self.record(result)
    }

    /// Queues a command from pre-split arguments.
    pub fn append_argv<A: AsRef<[u8]>>(&mut self, argv: &[A]) -> Result<()> {
        let result = self.writer.append_argv(argv);
        self.record(result)
    }

    /// Commands queued since the last flush.
    pub fn pipeline_depth(&self) -> usize {
        self.writer.depth()
    }

    /// Encoded bytes waiting to be written.
    pub fn pending(&self) -> &[u8] {
        self.writer.pending()
    }

    /// Writes the whole outbound queue, then clears it.
    ///
    /// The queue is cleared on hard errors too; the connection is unusable
    /// at that point. A non-blocking socket that stays full for
    /// `WRITE_STALL_TIMEOUT` fails with a `TimedOut` I/O error.
    pub fn flush_outbound(&mut self) -> Result<()> {
        if self.writer.is_empty() {
            return Ok(());
        }
        let result = self.write_pending();
        self.writer.clear();
        self.record(result)
    }

    fn write_pending(&mut self) -> Result<()> {
        let blocking = self.blocking;
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let data = self.writer.pending();
        let mut written = 0;
        while written < data.len() {
            match stream.write(&data[written..]) {
                Ok(0) => return Err(Error::Io(io::ErrorKind::WriteZero.into())),
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock && !blocking => {
                    wait_writable(stream.as_raw_fd(), WRITE_STALL_TIMEOUT)?;
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
        debug!(fd = stream.as_raw_fd(), bytes = written, "outbound flushed");
        Ok(())
    }

    /// Sends queued commands and starts a reply cycle on `reader`.
    ///
    /// Returns the number of commands sent. In blocking mode leftover input
    /// from an earlier exchange is discarded first.
    pub fn exec(&mut self, reader: &mut ReplyReader) -> Result<usize> {
        self.last_error = None;
        if self.writer.is_empty() {
            return self.record(Err(Error::NoPendingCommands));
        }
        let depth = self.writer.depth();
        self.flush_outbound()?;
        if self.blocking {
            reader.reset();
        }
        reader.begin_cycle();
        Ok(depth)
    }

    /// Reads once into `buf`.
    ///
    /// Returns `Ok(0)` when a non-blocking socket has no data yet. End of
    /// stream is `Error::Eof`.
    pub(crate) fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let blocking = self.blocking;
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        loop {
            match stream.read(buf) {
                Ok(0) => return Err(Error::Eof),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock && !blocking => return Ok(0),
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    fn stream(&self) -> Result<&TcpStream> {
        self.stream.as_ref().ok_or_else(not_connected)
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.last_error = Some(LastError::new(err));
        }
        result
    }
}

fn not_connected() -> Error {
    Error::Io(io::ErrorKind::NotConnected.into())
}

/// Blocks until `fd` can take more bytes or `timeout` passes.
fn wait_writable(fd: RawFd, timeout: Duration) -> Result<()> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    loop {
        // SAFETY: `pollfd` is valid for the duration of the call and the count is 1.
        let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
        if rc > 0 {
            return Ok(());
        }
        if rc == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "socket stayed full while flushing",
            )));
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(Error::Io(err));
        }
    }
}

fn open_stream(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                // Requests are small; do not wait to coalesce them.
                stream.set_nodelay(true)?;
                debug!(%addr, fd = stream.as_raw_fd(), "connected");
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(Error::Io(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "host resolved to no addresses")
    })))
}
