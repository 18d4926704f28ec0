//! # Reply Reader
//!
//! Purpose: Incrementally parse RESP replies from bytes that arrive in
//! arbitrary fragments, one reply per call.
//!
//! ## Design Principles
//! 1. **Resumable State Machine**: Parsing advances in atomic steps (a type
//!    byte, a line, a bulk payload). A step that lacks bytes consumes nothing
//!    and the next attempt resumes at the same step, even mid-array.
//! 2. **No Re-Scanning**: The CR/LF search remembers how far it got.
//! 3. **Storage Reuse**: The reply and its element slots are refilled in
//!    place; the input buffer is compacted rather than reallocated.
//! 4. **Bounded Memory**: An idle buffer whose spare capacity exceeds
//!    `max_buffer` is replaced by a fresh one.
//!
//! ## Cursor Invariant
//!
//! ```text
//! input: [ consumed | current reply (partial) | unparsed ]
//!                   ^ reply_start            ^ pos        ^ input.len()
//! reply_start <= pos <= input.len()
//! ```

use minired_common::{Error, GrowBuffer, LastError, Result};
use tracing::{trace, warn};

use crate::config::DEFAULT_READER_MAX_BUFFER;
use crate::connection::Connection;
use crate::reply::{Reply, ReplyKind};

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Error,
    Status,
    Integer,
}

/// Sub-step inside one array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementStep {
    Type,
    Line(LineKind),
    BulkHeader,
    BulkBody { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Line(LineKind),
    BulkHeader,
    BulkBody { len: usize },
    ArrayHeader,
    Element { index: usize, step: ElementStep },
}

/// Incremental RESP reply parser with a retained input buffer.
#[derive(Debug)]
pub struct ReplyReader {
    input: GrowBuffer,
    pos: usize,
    reply_start: usize,
    // Where the next CR/LF search starts.
    scan: usize,
    reads: usize,
    max_buffer: usize,
    stage: Stage,
    reply: Reply,
    last_error: Option<LastError>,
}

impl Default for ReplyReader {
    fn default() -> Self {
        ReplyReader::new()
    }
}

impl ReplyReader {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_READER_MAX_BUFFER)
    }

    /// Creates a reader whose idle buffer is released once its spare
    /// capacity exceeds `max_buffer` bytes (0 disables the check).
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        ReplyReader {
            input: GrowBuffer::new(),
            pos: 0,
            reply_start: 0,
            scan: 0,
            reads: 0,
            max_buffer,
            stage: Stage::Idle,
            reply: Reply::new(),
            last_error: None,
        }
    }

    /// Appends raw bytes received from the server.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.compact();
        if self.input.is_empty() && self.max_buffer != 0 && self.input.free() > self.max_buffer {
            trace!(free = self.input.free(), "releasing oversized reader buffer");
            self.input = GrowBuffer::new();
        }
        self.input.append(bytes)
    }

    /// Parses the next complete reply from buffered bytes only.
    pub fn try_parse(&mut self) -> Result<Option<&Reply>> {
        match self.parse_step() {
            Ok(true) => {
                self.finish_reply();
                Ok(Some(&self.reply))
            }
            Ok(false) => Ok(None),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Returns the next reply, reading from `conn` as needed.
    ///
    /// The first call of a cycle (see `begin_cycle`) reads once before
    /// parsing. Later calls parse what is buffered and return `Ok(None)` when
    /// no bytes are left. A reply cut short triggers further reads until it
    /// completes or a non-blocking socket has nothing more.
    pub fn get_reply(&mut self, conn: &mut Connection) -> Result<Option<&Reply>> {
        self.last_error = None;
        if self.reads == 0 {
            self.fill(conn)?;
        }
        loop {
            match self.parse_step() {
                Ok(true) => {
                    self.finish_reply();
                    return Ok(Some(&self.reply));
                }
                Ok(false) => {
                    if self.at_boundary() {
                        return Ok(None);
                    }
                    if self.fill(conn)? == 0 {
                        return Ok(None);
                    }
                }
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    /// Reads whatever the socket has into the buffer. Returns bytes added.
    pub fn fill_from(&mut self, conn: &mut Connection) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        loop {
            let n = conn.read_some(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.feed(&chunk[..n])?;
            total += n;
            // A blocking socket would stall here waiting for more.
            if n < chunk.len() || conn.is_blocking() {
                break;
            }
        }
        Ok(total)
    }

    fn fill(&mut self, conn: &mut Connection) -> Result<usize> {
        self.reads += 1;
        match self.fill_from(conn) {
            Ok(n) => Ok(n),
            Err(err) => {
                self.last_error = Some(LastError::new(&err));
                Err(err)
            }
        }
    }

    /// Starts a new read cycle; the next `get_reply` reads once first.
    pub fn begin_cycle(&mut self) {
        self.reads = 0;
        self.last_error = None;
    }

    /// Drops buffered input and any partial parse. Reply storage is kept.
    pub fn reset(&mut self) {
        self.input.clear();
        self.pos = 0;
        self.reply_start = 0;
        self.scan = 0;
        self.reads = 0;
        self.stage = Stage::Idle;
        self.last_error = None;
    }

    /// Bytes buffered but not yet consumed by a completed reply.
    pub fn buffered_len(&self) -> usize {
        self.input.len() - self.reply_start
    }

    /// Reads performed in the current cycle.
    pub fn read_count(&self) -> usize {
        self.reads
    }

    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    /// The most recently completed reply.
    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    /// Counts complete top-level replies buffered after the current one
    /// without consuming them. Stops at the first incomplete or malformed
    /// reply.
    pub fn buffered_reply_count(&self) -> usize {
        let data = &self.input.as_bytes()[self.reply_start..];
        let mut at = 0;
        let mut count = 0;
        while let Some(next) = skip_reply(data, at) {
            at = next;
            count += 1;
        }
        count
    }

    fn at_boundary(&self) -> bool {
        self.stage == Stage::Idle && self.pos >= self.input.len()
    }

    fn finish_reply(&mut self) {
        self.stage = Stage::Idle;
        self.reply_start = self.pos;
        self.scan = self.pos;
        trace!(kind = ?self.reply.kind(), elements = self.reply.len(), "reply parsed");
    }

    fn fail(&mut self, err: Error) -> Error {
        warn!(error = %err, "discarding reader input");
        self.reset();
        self.last_error = Some(LastError::new(&err));
        err
    }

    /// Moves unconsumed bytes to the front of the buffer.
    fn compact(&mut self) {
        if self.reply_start == 0 {
            return;
        }
        let shift = self.reply_start;
        self.input.discard_front(shift);
        self.pos -= shift;
        self.scan = self.scan.saturating_sub(shift);
        self.reply_start = 0;
    }

    /// Advances the state machine. Returns true once a reply is complete.
    fn parse_step(&mut self) -> Result<bool> {
        loop {
            match self.stage {
                Stage::Idle => {
                    let Some(tag) = self.input.as_bytes().get(self.pos).copied() else {
                        return Ok(false);
                    };
                    self.stage = match tag {
                        b'*' => Stage::ArrayHeader,
                        b'$' => Stage::BulkHeader,
                        other => Stage::Line(line_kind(other)?),
                    };
                    self.pos += 1;
                }
                Stage::Line(kind) => {
                    let Some((start, end)) = self.read_line() else {
                        return Ok(false);
                    };
                    let line = &self.input.as_bytes()[start..end];
                    fill_line(&mut self.reply, kind, line)?;
                    return Ok(true);
                }
                Stage::BulkHeader => {
                    let Some(len) = self.read_length()? else {
                        return Ok(false);
                    };
                    match len {
                        None => {
                            self.reply.set_nil();
                            return Ok(true);
                        }
                        Some(len) => self.stage = Stage::BulkBody { len },
                    }
                }
                Stage::BulkBody { len } => {
                    let Some((start, end)) = self.read_bulk(len)? else {
                        return Ok(false);
                    };
                    self.reply.set_bulk(&self.input.as_bytes()[start..end]);
                    return Ok(true);
                }
                Stage::ArrayHeader => {
                    let Some(count) = self.read_length()? else {
                        return Ok(false);
                    };
                    match count {
                        None => {
                            self.reply.set_nil();
                            return Ok(true);
                        }
                        Some(0) => {
                            self.reply.begin_array(0)?;
                            return Ok(true);
                        }
                        Some(count) => {
                            self.reply.begin_array(count)?;
                            self.stage = Stage::Element {
                                index: 0,
                                step: ElementStep::Type,
                            };
                        }
                    }
                }
                Stage::Element { index, step } => {
                    if !self.element_step(index, step)? {
                        return Ok(false);
                    }
                    if let Stage::Element {
                        index: next,
                        step: ElementStep::Type,
                    } = self.stage
                    {
                        if next == self.reply.len() {
                            return Ok(true);
                        }
                    }
                }
            }
        }
    }

    /// Runs one sub-step of array element `index`. Returns false when more
    /// bytes are needed.
    fn element_step(&mut self, index: usize, step: ElementStep) -> Result<bool> {
        let next = match step {
            ElementStep::Type => {
                let Some(tag) = self.input.as_bytes().get(self.pos).copied() else {
                    return Ok(false);
                };
                let step = match tag {
                    b'$' => ElementStep::BulkHeader,
                    b'*' => return Err(Error::protocol("nested arrays are not supported")),
                    other => ElementStep::Line(line_kind(other)?),
                };
                self.pos += 1;
                Stage::Element { index, step }
            }
            ElementStep::Line(kind) => {
                let Some((start, end)) = self.read_line() else {
                    return Ok(false);
                };
                let line = &self.input.as_bytes()[start..end];
                fill_line(self.reply.slot_mut(index), kind, line)?;
                next_element(index)
            }
            ElementStep::BulkHeader => {
                let Some(len) = self.read_length()? else {
                    return Ok(false);
                };
                match len {
                    None => {
                        self.reply.slot_mut(index).set_nil();
                        next_element(index)
                    }
                    Some(len) => Stage::Element {
                        index,
                        step: ElementStep::BulkBody { len },
                    },
                }
            }
            ElementStep::BulkBody { len } => {
                let Some((start, end)) = self.read_bulk(len)? else {
                    return Ok(false);
                };
                self.reply
                    .slot_mut(index)
                    .set_bulk(&self.input.as_bytes()[start..end]);
                next_element(index)
            }
        };
        self.stage = next;
        Ok(true)
    }

    /// Finds the next CRLF-terminated line at `pos`. Returns its span and
    /// advances past the terminator.
    fn read_line(&mut self) -> Option<(usize, usize)> {
        let data = self.input.as_bytes();
        let from = self.scan.max(self.pos);
        match find_crlf(data, from) {
            Some(cr) => {
                let start = self.pos;
                self.pos = cr + 2;
                self.scan = self.pos;
                Some((start, cr))
            }
            None => {
                // A trailing CR may still be followed by LF.
                self.scan = data.len().saturating_sub(1).max(self.pos);
                None
            }
        }
    }

    /// Reads a length line. `Some(None)` is a negative (nil) length.
    fn read_length(&mut self) -> Result<Option<Option<usize>>> {
        let Some((start, end)) = self.read_line() else {
            return Ok(None);
        };
        let value = parse_int(&self.input.as_bytes()[start..end])?;
        if value < 0 {
            return Ok(Some(None));
        }
        let len = usize::try_from(value).map_err(|_| Error::protocol("length out of range"))?;
        Ok(Some(Some(len)))
    }

    /// Takes `len` payload bytes plus CRLF at `pos`, if all present.
    fn read_bulk(&mut self, len: usize) -> Result<Option<(usize, usize)>> {
        let start = self.pos;
        let end = start
            .checked_add(len)
            .ok_or_else(|| Error::protocol("bulk length out of range"))?;
        let data = self.input.as_bytes();
        if data.len() < end + 2 {
            return Ok(None);
        }
        if &data[end..end + 2] != b"\r\n" {
            return Err(Error::protocol("bulk payload does not match its length"));
        }
        self.pos = end + 2;
        self.scan = self.pos;
        Ok(Some((start, end)))
    }
}

fn next_element(index: usize) -> Stage {
    Stage::Element {
        index: index + 1,
        step: ElementStep::Type,
    }
}

fn line_kind(tag: u8) -> Result<LineKind> {
    match tag {
        b'-' => Ok(LineKind::Error),
        b'+' => Ok(LineKind::Status),
        b':' => Ok(LineKind::Integer),
        other => Err(Error::protocol(format!(
            "unknown reply type byte 0x{:02x}",
            other
        ))),
    }
}

fn fill_line(reply: &mut Reply, kind: LineKind, line: &[u8]) -> Result<()> {
    match kind {
        LineKind::Error => reply.set_line(ReplyKind::Error, line),
        LineKind::Status => reply.set_line(ReplyKind::Status, line),
        LineKind::Integer => reply.set_integer(parse_int(line)?),
    }
    Ok(())
}

fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}

/// Parses an optionally signed decimal integer.
fn parse_int(data: &[u8]) -> Result<i64> {
    let (negative, digits) = match data.first() {
        Some(b'-') => (true, &data[1..]),
        Some(b'+') => (false, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(Error::protocol("empty integer"));
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(Error::protocol(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(data)
            )));
        }
        let digit = (b - b'0') as i64;
        value = value
            .checked_mul(10)
            .and_then(|v| if negative { v.checked_sub(digit) } else { v.checked_add(digit) })
            .ok_or_else(|| Error::protocol("integer overflow"))?;
    }
    Ok(value)
}

/// Returns the offset just past the complete reply starting at `at`.
fn skip_reply(data: &[u8], at: usize) -> Option<usize> {
    match *data.get(at)? {
        b'+' | b'-' | b':' => find_crlf(data, at + 1).map(|cr| cr + 2),
        b'$' => skip_bulk(data, at),
        b'*' => {
            let cr = find_crlf(data, at + 1)?;
            let count = parse_int(&data[at + 1..cr]).ok()?;
            let mut next = cr + 2;
            for _ in 0..count.max(0) {
                next = match *data.get(next)? {
                    b'$' => skip_bulk(data, next)?,
                    b'+' | b'-' | b':' => find_crlf(data, next + 1)? + 2,
                    _ => return None,
                };
            }
            Some(next)
        }
        _ => None,
    }
}

fn skip_bulk(data: &[u8], at: usize) -> Option<usize> {
    let cr = find_crlf(data, at + 1)?;
    let len = parse_int(&data[at + 1..cr]).ok()?;
    if len < 0 {
        return Some(cr + 2);
    }
    let end = (cr + 2).checked_add(len as usize)?.checked_add(2)?;
    (end <= data.len()).then_some(end)
}
