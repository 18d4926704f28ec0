//! # Blocking Client API
//!
//! Purpose: Bundle one `Connection` and one `ReplyReader` behind a compact
//! request/response API.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides queueing, flushing and reply cycles.
//! 2. **Owned Results**: Replies are returned as `Value` so callers can keep
//!    them past the next command.
//! 3. **Escape Hatches**: The underlying connection and reader stay reachable
//!    for pipelining.

use minired_common::{Error, Result};
use tracing::debug;

use crate::command::Arg;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::reader::ReplyReader;
use crate::reply::Value;

/// Blocking RESP client over a single connection.
#[derive(Debug)]
pub struct Client {
    conn: Connection,
    reader: ReplyReader,
}

impl Client {
    /// Connects with default settings.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let config = ClientConfig {
            host: host.to_string(),
            port,
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Connects using a custom configuration.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let conn = Connection::with_config(&config)?;
        debug!(host = %config.host, port = config.port, "client connected");
        Ok(Client {
            conn,
            reader: ReplyReader::with_max_buffer(config.reader_max_buffer),
        })
    }

    /// Sends one command and waits for its reply.
    ///
    /// Server error replies come back as `Value::Error`.
    pub fn command(&mut self, template: &str, args: &[Arg<'_>]) -> Result<Value> {
        self.conn.append_command(template, args)?;
        self.conn.exec(&mut self.reader)?;
        self.next_reply()
    }

    /// Sends pre-split arguments and waits for the reply.
    pub fn command_argv<A: AsRef<[u8]>>(&mut self, argv: &[A]) -> Result<Value> {
        self.conn.append_argv(argv)?;
        self.conn.exec(&mut self.reader)?;
        self.next_reply()
    }

    /// Sends every queued command and collects one reply per command.
    pub fn pipeline(&mut self) -> Result<Vec<Value>> {
        let depth = self.conn.exec(&mut self.reader)?;
        let mut replies = Vec::with_capacity(depth);
        for _ in 0..depth {
            replies.push(self.next_reply()?);
        }
        Ok(replies)
    }

    /// Queues a command for `pipeline`.
    pub fn queue(&mut self, template: &str, args: &[Arg<'_>]) -> Result<()> {
        self.conn.append_command(template, args)
    }

    /// Sends `PING` and returns the reply.
    pub fn ping(&mut self) -> Result<Value> {
        self.command("PING", &[])
    }

    /// Authenticates; anything but `+OK` is `Error::Auth`.
    pub fn auth(&mut self, password: &str) -> Result<()> {
        match self.command("AUTH %s", &[Arg::Str(password)])? {
            Value::Status(status) if status.as_ref() == b"OK" => Ok(()),
            Value::Error(message) => Err(Error::Auth(String::from_utf8_lossy(&message).into_owned())),
            other => Err(Error::Auth(format!("unexpected reply {:?}", other))),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn reader_mut(&mut self) -> &mut ReplyReader {
        &mut self.reader
    }

    /// Next reply: buffered first, otherwise read from the socket.
    fn next_reply(&mut self) -> Result<Value> {
        if let Some(reply) = self.reader.try_parse()? {
            return Ok(reply.to_value());
        }
        self.reader.begin_cycle();
        match self.reader.get_reply(&mut self.conn)? {
            Some(reply) => Ok(reply.to_value()),
            None => Err(Error::protocol("connection returned no reply")),
        }
    }
}
