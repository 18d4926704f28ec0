//! # Growable Byte Buffer
//!
//! Purpose: Wire-level accumulation and transmission buffer shared by the
//! command writer (outbound queue) and the reply reader (inbound bytes).
//!
//! ## Design Principles
//! 1. **Geometric Growth**: When free space runs out the allocation becomes
//!    `(len + needed) * 2`, so a reply split over many socket reads costs
//!    O(1) amortized per appended byte.
//! 2. **Logical Clear**: `clear` keeps the allocation; high-water-mark
//!    buffers are not reallocated on every message.
//! 3. **Sentinel Byte**: `bytes[len] == 0` always holds, so the contents can be
//!    handed to text inspection without bounds surprises.
//! 4. **No Half-Grown State**: Allocation failure reports `OutOfMemory` and
//!    leaves the buffer exactly as it was.
//!
//! ## Memory Layout
//!
//! ```text
//! data: [ payload (len) | 0 | free bytes ... ]
//!        ^                ^
//!        0                len
//! data.len() == len + 1 + free
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// Length-tracked, null-terminated, geometrically growing byte buffer.
pub struct GrowBuffer {
    // Always initialized up to its full length; the slot at `len` is the sentinel.
    data: Vec<u8>,
    len: usize,
}

impl GrowBuffer {
    /// Creates an empty buffer with no free space.
    pub fn new() -> Self {
        GrowBuffer {
            data: vec![0],
            len: 0,
        }
    }

    /// Creates an empty buffer with `free` bytes of room.
    pub fn with_capacity(free: usize) -> Self {
        GrowBuffer {
            data: vec![0; free + 1],
            len: 0,
        }
    }

    /// Creates a buffer holding a copy of `bytes` and no free space.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut data = Vec::with_capacity(bytes.len() + 1);
        data.extend_from_slice(bytes);
        data.push(0);
        GrowBuffer {
            data,
            len: bytes.len(),
        }
    }

    /// Number of valid bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no valid bytes are held.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes that can be appended without reallocating.
    #[inline]
    pub fn free(&self) -> usize {
        self.data.len() - 1 - self.len
    }

    /// Total retained capacity (`len + free`), excluding the sentinel.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len() - 1
    }

    /// Valid bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Valid bytes followed by the sentinel zero.
    #[inline]
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.data[..=self.len]
    }

    /// Guarantees at least `additional` free bytes.
    ///
    /// No-op when enough room exists; otherwise grows the allocation to
    /// `(len + additional) * 2` bytes plus the sentinel.
    pub fn ensure_free(&mut self, additional: usize) -> Result<()> {
        if self.free() >= additional {
            return Ok(());
        }
        let new_capacity = self
            .len
            .checked_add(additional)
            .and_then(|n| n.checked_mul(2))
            .ok_or(Error::OutOfMemory)?;
        let total = new_capacity + 1;
        self.data
            .try_reserve_exact(total - self.data.len())
            .map_err(|_| Error::OutOfMemory)?;
        self.data.resize(total, 0);
        Ok(())
    }

    /// Appends `bytes` after the current contents.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_free(bytes.len())?;
        let end = self.len + bytes.len();
        self.data[self.len..end].copy_from_slice(bytes);
        self.len = end;
        self.data[end] = 0;
        Ok(())
    }

    /// Replaces the full contents with `bytes`, reusing the allocation when
    /// the retained capacity suffices.
    pub fn overwrite(&mut self, bytes: &[u8]) -> Result<()> {
        if self.capacity() < bytes.len() {
            self.ensure_free(bytes.len() - self.len)?;
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        self.data[self.len] = 0;
        Ok(())
    }

    /// Drops the contents but keeps the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
        self.data[0] = 0;
    }

    /// Removes the first `n` bytes, shifting the remainder to the front.
    pub fn discard_front(&mut self, n: usize) {
        let n = n.min(self.len);
        if n == 0 {
            return;
        }
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
        self.data[self.len] = 0;
    }
}

impl Default for GrowBuffer {
    fn default() -> Self {
        GrowBuffer::new()
    }
}

impl Clone for GrowBuffer {
    // A duplicate holds exactly the valid bytes, like `from_slice`.
    fn clone(&self) -> Self {
        GrowBuffer::from_slice(self.as_bytes())
    }
}

impl AsRef<[u8]> for GrowBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for GrowBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for GrowBuffer {}

impl PartialOrd for GrowBuffer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GrowBuffer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl Hash for GrowBuffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for GrowBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrowBuffer")
            .field("len", &self.len)
            .field("free", &self.free())
            .field("bytes", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

impl fmt::Write for GrowBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append(s.as_bytes()).map_err(|_| fmt::Error)
    }
}
