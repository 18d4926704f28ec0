//! # Event-Driven Client
//!
//! Purpose: Keep one connection alive on top of the reactor, push every
//! reply to a consumer callback and reconnect on its own after failures.
//!
//! ## Design Principles
//! 1. **Two-State Machine**: Connected or Disconnected. Any read error, EOF
//!    or framing error moves to Disconnected and deregisters the socket.
//! 2. **Periodic Recovery**: A timer fires every `reconnect_interval` for the
//!    life of the client and only acts while Disconnected.
//! 3. **Shared Context**: Reactor handlers hold an `Rc` to the client state;
//!    the state never owns the loop, so there is no reference cycle.
//! 4. **Never Block in Handlers**: The socket is non-blocking while the loop
//!    runs; only (re)connect and `AUTH` use blocking I/O.
//!
//! ## State Machine
//!
//! ```text
//!  connect ──► Connected ── EOF / IO / protocol error ──► Disconnected
//!                  ▲                                          │
//!                  └──── timer: reconnect, AUTH, hook ◄───────┘
//! ```

use std::cell::RefCell;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use minired_common::{Error, Result};
use minired_reactor::{file_handler, EventLoop, FileHandler, Ready, StopHandle, TimerAction, TimerId};
use tracing::{error, info, warn};

use crate::command::Arg;
use crate::config::AsyncConfig;
use crate::connection::Connection;
use crate::reader::ReplyReader;
use crate::reply::{Reply, Value};

/// Invoked once per reply received while the loop runs.
pub type ReplyCallback = Box<dyn FnMut(&mut Connection, &Reply)>;

/// Invoked after a successful reconnect, before reads resume. Commands it
/// queues on the connection are sent right away.
pub type ReconnectCallback = Box<dyn FnMut(&mut Connection)>;

struct State {
    conn: Connection,
    reader: ReplyReader,
    config: AsyncConfig,
    connected: bool,
}

struct Inner {
    state: RefCell<State>,
    on_reply: RefCell<Option<ReplyCallback>>,
    on_reconnect: RefCell<Option<ReconnectCallback>>,
}

/// Reactor-driven client with automatic reconnection.
pub struct AsyncClient {
    event_loop: EventLoop,
    inner: Rc<Inner>,
    reconnect_timer: Option<TimerId>,
}

impl AsyncClient {
    /// Connects (blocking, bounded by `connect_timeout`) and authenticates
    /// when a password is configured.
    pub fn connect(config: AsyncConfig) -> Result<Self> {
        let event_loop = EventLoop::new(config.setsize)?;
        let mut conn =
            Connection::connect_timeout(&config.host, config.port, Some(config.connect_timeout))?;
        let mut reader = ReplyReader::with_max_buffer(config.reader_max_buffer);
        if let Some(password) = &config.password {
            authenticate(&mut conn, &mut reader, password)?;
        }
        info!(host = %config.host, port = config.port, "async client connected");

        Ok(AsyncClient {
            event_loop,
            inner: Rc::new(Inner {
                state: RefCell::new(State {
                    conn,
                    reader,
                    config,
                    connected: true,
                }),
                on_reply: RefCell::new(None),
                on_reconnect: RefCell::new(None),
            }),
            reconnect_timer: None,
        })
    }

    pub fn set_read_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Connection, &Reply) + 'static,
    {
        *self.inner.on_reply.borrow_mut() = Some(Box::new(callback));
    }

    pub fn set_reconnect_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Connection) + 'static,
    {
        *self.inner.on_reconnect.borrow_mut() = Some(Box::new(callback));
    }

    /// False exactly while the socket is known to be dead.
    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().connected
    }

    pub fn config(&self) -> AsyncConfig {
        self.inner.state.borrow().config.clone()
    }

    /// Queues a command on the connection.
    pub fn append_command(&mut self, template: &str, args: &[Arg<'_>]) -> Result<()> {
        self.inner.state.borrow_mut().conn.append_command(template, args)
    }

    pub fn append_argv<A: AsRef<[u8]>>(&mut self, argv: &[A]) -> Result<()> {
        self.inner.state.borrow_mut().conn.append_argv(argv)
    }

    /// Sends queued commands. Returns how many were sent.
    pub fn exec(&mut self) -> Result<usize> {
        let mut state = self.inner.state.borrow_mut();
        let State { conn, reader, .. } = &mut *state;
        conn.exec(reader)
    }

    /// Pulls one reply outside the loop (e.g. before `run`).
    pub fn get_reply(&mut self) -> Result<Option<Value>> {
        let mut state = self.inner.state.borrow_mut();
        let State { conn, reader, .. } = &mut *state;
        Ok(reader.get_reply(conn)?.map(Reply::to_value))
    }

    /// Switches the socket to non-blocking mode, registers it for reads and
    /// arms the reconnect timer. Idempotent.
    pub fn start(&mut self) -> Result<()> {
        if self.reconnect_timer.is_some() {
            return Ok(());
        }
        let interval = {
            let mut state = self.inner.state.borrow_mut();
            if state.connected {
                state.conn.set_nonblocking()?;
                let fd = state.conn.fd().ok_or_else(not_connected)?;
                self.event_loop
                    .add_file_event(fd, Ready::READABLE, read_handler(&self.inner))?;
            }
            state.config.reconnect_interval
        };

        let inner = Rc::clone(&self.inner);
        let id = self
            .event_loop
            .add_timer(interval, move |el, _| reconnect_tick(&inner, el));
        self.reconnect_timer = Some(id);
        Ok(())
    }

    /// Runs the event loop until stopped.
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        self.event_loop.run()
    }

    /// Runs one loop iteration, waiting at most `max_wait`.
    pub fn poll_once(&mut self, max_wait: Option<Duration>) -> Result<usize> {
        self.start()?;
        self.event_loop.poll_once(max_wait)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.event_loop.stop_handle()
    }

    /// The underlying loop, for registering extra timers or descriptors.
    pub fn event_loop_mut(&mut self) -> &mut EventLoop {
        &mut self.event_loop
    }
}

fn read_handler(inner: &Rc<Inner>) -> FileHandler {
    let inner = Rc::clone(inner);
    file_handler(move |el, fd, _| on_readable(&inner, el, fd))
}

/// Drains every complete reply; any failure drops the connection, and so
/// does a read callback that disconnects it.
fn on_readable(inner: &Inner, el: &mut EventLoop, fd: RawFd) {
    let mut state = inner.state.borrow_mut();
    let State {
        conn,
        reader,
        connected,
        ..
    } = &mut *state;

    reader.begin_cycle();
    let failure = loop {
        if !conn.is_connected() {
            break None;
        }
        match reader.get_reply(conn) {
            Ok(Some(reply)) => {
                if let Some(callback) = inner.on_reply.borrow_mut().as_mut() {
                    callback(conn, reply);
                }
            }
            Ok(None) if conn.is_connected() => return,
            Ok(None) => break None,
            Err(err) => break Some(err),
        }
    };

    match &failure {
        Some(Error::Eof) => warn!(fd, "server closed the connection"),
        Some(err @ Error::Protocol(_)) => {
            error!(fd, error = %err, "reply stream out of sync, dropping connection")
        }
        Some(err) => warn!(fd, error = %err, "connection lost"),
        None => info!(fd, "connection closed by read callback"),
    }
    if let Err(err) = el.remove_file_event(fd, Ready::READABLE) {
        warn!(fd, error = %err, "failed to deregister socket");
    }
    conn.disconnect();
    reader.reset();
    *connected = false;
}

fn reconnect_tick(inner: &Rc<Inner>, el: &mut EventLoop) -> TimerAction {
    let (connected, interval) = {
        let state = inner.state.borrow();
        (state.connected, state.config.reconnect_interval)
    };
    if !connected {
        let mut state = inner.state.borrow_mut();
        match reestablish(inner, &mut state, el) {
            Ok(()) => {
                state.connected = true;
                info!(host = %state.config.host, port = state.config.port, "reconnected");
            }
            Err(err) => {
                state.conn.disconnect();
                warn!(error = %err, retry_in = ?interval, "reconnect failed");
            }
        }
    }
    TimerAction::Requeue(interval)
}

fn reestablish(inner: &Rc<Inner>, state: &mut State, el: &mut EventLoop) -> Result<()> {
    let State {
        conn,
        reader,
        config,
        ..
    } = state;

    conn.reconnect(&config.host, config.port, Some(config.connect_timeout))?;
    reader.reset();
    if let Some(password) = &config.password {
        authenticate(conn, reader, password)?;
    }
    if let Some(callback) = inner.on_reconnect.borrow_mut().as_mut() {
        callback(conn);
    }
    conn.flush_outbound()?;
    conn.set_nonblocking()?;
    let fd = conn.fd().ok_or_else(not_connected)?;
    el.add_file_event(fd, Ready::READABLE, read_handler(inner))?;
    Ok(())
}

/// Sends `AUTH` on a blocking connection; only `+OK` is accepted.
fn authenticate(conn: &mut Connection, reader: &mut ReplyReader, password: &str) -> Result<()> {
    conn.append_command("AUTH %s", &[Arg::Str(password)])?;
    conn.exec(reader)?;
    match reader.get_reply(conn)? {
        Some(reply) if reply.is_status("OK") => Ok(()),
        Some(reply) => Err(Error::Auth(format!("server replied {:?}", reply))),
        None => Err(Error::Auth("no reply to AUTH".into())),
    }
}

fn not_connected() -> Error {
    Error::Io(io::ErrorKind::NotConnected.into())
}
