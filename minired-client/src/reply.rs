//! # Reply Model
//!
//! Purpose: Represent parsed RESP replies in storage that a reader can refill
//! in place, plus an owned tree for callers that keep replies around.
//!
//! ## Design Principles
//! 1. **Retained Storage**: A `Reply` keeps its string bytes and its element
//!    slots between parses; refills clear and reuse them.
//! 2. **Grow-Only Slots**: The element vector is resized up to the largest
//!    array seen and never shrunk, so `total() >= len()`.
//! 3. **Owned Escape Hatch**: `to_value` copies a borrowed reply into a
//!    `Value` backed by `Bytes`.

use std::fmt;

use bytes::Bytes;
use minired_common::{Error, Result};

/// Reply type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplyKind {
    /// `-ERR ...`
    Error,
    /// `+OK`
    Status,
    /// `:42`
    Integer,
    /// `$5\r\nhello`
    Bulk,
    /// `$-1` or `*-1`
    #[default]
    Nil,
    /// `*N`
    Array,
}

/// Parsed reply whose storage is owned by the reader that produced it.
#[derive(Clone, Default)]
pub struct Reply {
    kind: ReplyKind,
    integer: i64,
    data: Vec<u8>,
    elements: usize,
    slots: Vec<Reply>,
}

impl Reply {
    pub fn new() -> Self {
        Reply::default()
    }

    pub fn kind(&self) -> ReplyKind {
        self.kind
    }

    pub fn is_nil(&self) -> bool {
        self.kind == ReplyKind::Nil
    }

    pub fn is_error(&self) -> bool {
        self.kind == ReplyKind::Error
    }

    /// Payload of Error, Status and Bulk replies.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.kind {
            ReplyKind::Error | ReplyKind::Status | ReplyKind::Bulk => Some(&self.data),
            _ => None,
        }
    }

    /// Payload as UTF-8 text, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        (self.kind == ReplyKind::Integer).then_some(self.integer)
    }

    /// Valid elements of an Array reply; empty for other kinds.
    pub fn elements(&self) -> &[Reply] {
        &self.slots[..self.elements]
    }

    /// Number of valid elements.
    pub fn len(&self) -> usize {
        self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }

    /// Element slots retained for reuse, valid or not.
    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// Returns true for a Status reply carrying exactly `text`.
    pub fn is_status(&self, text: &str) -> bool {
        self.kind == ReplyKind::Status && self.data == text.as_bytes()
    }

    /// Copies this reply into an owned value.
    pub fn to_value(&self) -> Value {
        match self.kind {
            ReplyKind::Error => Value::Error(Bytes::copy_from_slice(&self.data)),
            ReplyKind::Status => Value::Status(Bytes::copy_from_slice(&self.data)),
            ReplyKind::Integer => Value::Integer(self.integer),
            ReplyKind::Bulk => Value::Bulk(Bytes::copy_from_slice(&self.data)),
            ReplyKind::Nil => Value::Nil,
            ReplyKind::Array => Value::Array(self.elements().iter().map(Reply::to_value).collect()),
        }
    }

    // ---- refill helpers used by the reader ----

    pub(crate) fn set_line(&mut self, kind: ReplyKind, text: &[u8]) {
        self.kind = kind;
        self.elements = 0;
        self.data.clear();
        self.data.extend_from_slice(text);
    }

    pub(crate) fn set_integer(&mut self, value: i64) {
        self.kind = ReplyKind::Integer;
        self.elements = 0;
        self.integer = value;
        self.data.clear();
    }

    pub(crate) fn set_bulk(&mut self, payload: &[u8]) {
        self.set_line(ReplyKind::Bulk, payload);
    }

    /// Marks the reply Nil; retained string bytes are cleared, not freed.
    pub(crate) fn set_nil(&mut self) {
        self.kind = ReplyKind::Nil;
        self.elements = 0;
        self.data.clear();
    }

    /// Starts an array of `count` elements, growing the slot vector if needed.
    pub(crate) fn begin_array(&mut self, count: usize) -> Result<()> {
        self.kind = ReplyKind::Array;
        self.data.clear();
        self.elements = 0;
        if count > self.slots.len() {
            self.slots
                .try_reserve_exact(count - self.slots.len())
                .map_err(|_| Error::OutOfMemory)?;
            self.slots.resize_with(count, Reply::default);
        }
        self.elements = count;
        Ok(())
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Reply {
        &mut self.slots[index]
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ReplyKind::Error => write!(f, "Error({:?})", String::from_utf8_lossy(&self.data)),
            ReplyKind::Status => write!(f, "Status({:?})", String::from_utf8_lossy(&self.data)),
            ReplyKind::Integer => write!(f, "Integer({})", self.integer),
            ReplyKind::Bulk => write!(f, "Bulk({:?})", String::from_utf8_lossy(&self.data)),
            ReplyKind::Nil => f.write_str("Nil"),
            ReplyKind::Array => f.debug_list().entries(self.elements()).finish(),
        }
    }
}

/// Owned RESP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Error(Bytes),
    Status(Bytes),
    Integer(i64),
    Bulk(Bytes),
    Nil,
    Array(Vec<Value>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Payload of Error, Status and Bulk values.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Error(b) | Value::Status(b) | Value::Bulk(b) => Some(b),
            _ => None,
        }
    }
}
