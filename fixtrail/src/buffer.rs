//! Ordered storage for the fixes of the active tracking session.

use std::mem;

use crate::error::BufferError;
use crate::Fix;

/// Append-only, strictly ordered fix buffer.
///
/// Every appended fix must carry the next sequence number (the current
/// length), so the contents are always gap-free and strictly increasing.
#[derive(Debug, Clone, Default)]
pub struct SessionBuffer {
    fixes: Vec<Fix>,
}

impl SessionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an accepted fix.
    ///
    /// Fails with [`BufferError::OutOfOrder`] unless `fix.sequence` equals
    /// the number of fixes already held.
    pub fn append(&mut self, fix: Fix) -> Result<(), BufferError> {
        let expected = self.fixes.len() as u64;
        if fix.sequence != expected {
            return Err(BufferError::OutOfOrder {
                expected,
                got: fix.sequence,
            });
        }
        self.fixes.push(fix);
        Ok(())
    }

    /// Copy of the current contents in sequence order.
    pub fn snapshot(&self) -> Vec<Fix> {
        self.fixes.clone()
    }

    /// Take all fixes out, leaving the buffer empty.
    pub fn flush_and_clear(&mut self) -> Vec<Fix> {
        mem::take(&mut self.fixes)
    }

    pub fn last(&self) -> Option<&Fix> {
        self.fixes.last()
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }
}
