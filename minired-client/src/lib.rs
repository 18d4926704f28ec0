//! # MiniRed Client
//!
//! Purpose: Provide a small Redis (RESP) client runtime with a blocking
//! request/response mode and an event-driven mode that reconnects on its own.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: Replies are parsed as bytes arrive and parsing
//!    resumes exactly where it stopped.
//! 2. **Buffer Reuse**: Outbound queues, input buffers and reply storage keep
//!    their capacity between messages.
//! 3. **Explicit Errors**: Every fallible call returns `Result`; nothing
//!    unwinds and `WouldBlock`/`Interrupted` never leak out.
//! 4. **Single Threaded**: The async client runs on the calling thread; its
//!    callbacks must not block.
//!
//! ## Example
//!
//! ```no_run
//! use minired_client::{Arg, Client};
//!
//! let mut client = Client::connect("127.0.0.1", 6379)?;
//! client.command("SET %s %b", &[Arg::Str("key"), Arg::Bytes(b"value")])?;
//! let value = client.command("GET %s", &["key".into()])?;
//! assert_eq!(value.as_bytes(), Some(&b"value"[..]));
//! # Ok::<(), minired_client::Error>(())
//! ```

mod async_client;
mod client;
mod command;
mod config;
mod connection;
mod reader;
mod reply;

pub use async_client::{AsyncClient, ReconnectCallback, ReplyCallback};
pub use client::Client;
pub use command::{format_command, Arg, CommandWriter};
pub use config::{
    AsyncConfig, ClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READER_MAX_BUFFER,
    DEFAULT_RECONNECT_INTERVAL, DEFAULT_SETSIZE,
};
pub use connection::{Connection, WRITE_STALL_TIMEOUT};
pub use minired_common::{Error, ErrorKind, GrowBuffer, LastError, Result};
pub use minired_reactor::{EventLoop, StopHandle, TimerAction, TimerId};
pub use reader::ReplyReader;
pub use reply::{Reply, ReplyKind, Value};
