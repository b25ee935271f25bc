//! Single-owner receive buffers
//!
//! An [`RxBuffer`] is allocated for exactly one inbound message, moved to
//! whoever consumes the message, and released when dropped. A shared
//! [`BufferLedger`] counts allocations and releases so leaks and double
//! releases are observable.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::BufferError;

/// Allocation and release counters shared by every buffer of one owner
#[derive(Debug, Clone, Default)]
pub struct BufferLedger {
    allocated: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl BufferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Buffers allocated but not yet released
    pub fn outstanding(&self) -> usize {
        self.allocated().saturating_sub(self.released())
    }
}

/// Owned, fixed-capacity buffer for one inbound message
pub struct RxBuffer {
    data: Vec<u8>,
    declared_len: usize,
    ledger: BufferLedger,
}

impl RxBuffer {
    /// Allocate room for a message of `declared_len` bytes
    pub fn allocate(declared_len: usize, ledger: &BufferLedger) -> Result<Self, BufferError> {
        let mut data = Vec::new();
        data.try_reserve_exact(declared_len)
            .map_err(|_| BufferError::AllocationFailed {
                requested: declared_len,
            })?;

        ledger.allocated.fetch_add(1, Ordering::SeqCst);

        Ok(Self {
            data,
            declared_len,
            ledger: ledger.clone(),
        })
    }

    /// Allocate and fill in one step
    pub fn copy_from(payload: &[u8], ledger: &BufferLedger) -> Result<Self, BufferError> {
        let mut buffer = Self::allocate(payload.len(), ledger)?;
        buffer.extend_from_slice(payload)?;
        Ok(buffer)
    }

    /// Append bytes; never grows past the declared length
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let attempted = self.data.len() + bytes.len();
        if attempted > self.declared_len {
            return Err(BufferError::Overflow {
                capacity: self.declared_len,
                attempted,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Bytes filled so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn declared_len(&self) -> usize {
        self.declared_len
    }

    pub fn is_complete(&self) -> bool {
        self.data.len() == self.declared_len
    }
}

impl Drop for RxBuffer {
    fn drop(&mut self) {
        self.ledger.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for RxBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxBuffer")
            .field("len", &self.data.len())
            .field("declared_len", &self.declared_len)
            .field("data", &hex::encode(&self.data))
            .finish()
    }
}
