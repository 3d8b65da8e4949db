//! Per-kind id auto-assignment
//!
//! Ids are handed out sequentially from 1. A reservation moves the cursor
//! past `[1, first_free_id)` so legacy ids below the boundary can be
//! recreated verbatim without ever colliding with auto-assigned ones.

use cnxrepo_core::{RepoError, Result};

/// Sequential id allocator for one entity kind
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
    reserved_below: u64,
    lowest_allocated: Option<u64>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Create an allocator with nothing reserved
    pub fn new() -> Self {
        IdAllocator {
            next: 1,
            reserved_below: 1,
            lowest_allocated: None,
        }
    }

    /// Next candidate id; the caller skips candidates that are taken
    pub fn next_candidate(&mut self) -> Result<u64> {
        let id = self.next;
        self.next = self
            .next
            .checked_add(1)
            .ok_or_else(|| RepoError::storage("id space exhausted"))?;
        Ok(id)
    }

    /// Record that `id` was handed out
    pub fn mark_allocated(&mut self, id: u64) {
        self.lowest_allocated = Some(self.lowest_allocated.map_or(id, |low| low.min(id)));
    }

    /// Reserve `[1, first_free_id)`
    ///
    /// Returns `true` if the reservation changed.
    pub fn reserve(&mut self, first_free_id: u64) -> Result<bool> {
        if first_free_id <= self.reserved_below {
            return Ok(false);
        }
        if let Some(low) = self.lowest_allocated {
            if low < first_free_id {
                return Err(RepoError::StateMismatch {
                    id: format!("reserved range [1, {})", first_free_id),
                    expected: "no auto-assigned ids in range".to_string(),
                    actual: format!("id {} already assigned", low),
                });
            }
        }
        self.reserved_below = first_free_id;
        self.next = self.next.max(first_free_id);
        Ok(true)
    }

    /// Whether `id` lies inside the reserved range
    pub fn is_reserved(&self, id: u64) -> bool {
        id >= 1 && id < self.reserved_below
    }

    /// Current reservation boundary (1 when nothing is reserved)
    pub fn reserved_below(&self) -> u64 {
        self.reserved_below
    }
}
