//! Allocation of small integer identifiers.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::ops::Range;

/// A pool of small, reusable integer identifiers.
///
/// Freed identifiers are handed out again before new ones are minted, smallest
/// first, so that the identifier space stays compact over a long session.
/// Contiguous runs of freed identifiers are kept as a half-open range rather
/// than individual heap entries.
///
/// Freeing an identifier that is already free is not detected.
#[derive(Debug, Clone)]
pub struct IntIdentifierPool {
    /// The next never-allocated identifier.
    next: u64,
    /// A compacted block of free identifiers.
    reuse: Range<u64>,
    /// Free identifiers outside `reuse`.
    free: BinaryHeap<Reverse<u64>>,
}

impl Default for IntIdentifierPool {
    fn default() -> Self {
        Self::new()
    }
}

impl IntIdentifierPool {
    /// Create a pool whose first identifier is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a pool whose first identifier is `first`.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: first,
            reuse: first..first,
            free: BinaryHeap::new(),
        }
    }

    /// Allocate the smallest available identifier.
    pub fn alloc(&mut self) -> u64 {
        let heap_min = self.free.peek().map(|Reverse(id)| *id);
        match heap_min {
            Some(id) if self.reuse.is_empty() || id < self.reuse.start => {
                self.free.pop();
                id
            }
            _ if !self.reuse.is_empty() => {
                let id = self.reuse.start;
                self.reuse.start += 1;
                id
            }
            _ => {
                let id = self.next;
                self.next += 1;
                id
            }
        }
    }

    /// Return an identifier to the pool.
    pub fn free(&mut self, id: u64) {
        self.free.push(Reverse(id));
        if self.reuse.is_empty()
            && let Some(&Reverse(min)) = self.free.peek()
        {
            self.reuse = min..min;
        }
        while let Some(&Reverse(min)) = self.free.peek() {
            if min != self.reuse.end {
                break;
            }
            self.free.pop();
            self.reuse.end += 1;
        }
        if self.reuse.end == self.next {
            self.next = self.reuse.start;
            self.reuse = self.next..self.next;
        }
    }

    /// Number of identifiers currently free for reuse.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len() + (self.reuse.end - self.reuse.start) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_fresh_ids_increase() {
        let mut pool = IntIdentifierPool::new();
        assert_eq!(pool.alloc(), 1);
        assert_eq!(pool.alloc(), 2);
        assert_eq!(pool.alloc(), 3);
    }

    #[test]
    fn test_freed_id_is_reused_first() {
        let mut pool = IntIdentifierPool::new();
        let ids: Vec<u64> = (0..5).map(|_| pool.alloc()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        pool.free(3);
        assert_eq!(pool.alloc(), 3);
        assert_eq!(pool.alloc(), 6);
    }

    #[test]
    fn test_freed_ids_return_in_ascending_order() {
        let mut pool = IntIdentifierPool::new();
        for _ in 0..10 {
            pool.alloc();
        }
        pool.free(7);
        pool.free(2);
        pool.free(5);
        pool.free(3);
        assert_eq!(pool.alloc(), 2);
        assert_eq!(pool.alloc(), 3);
        assert_eq!(pool.alloc(), 5);
        assert_eq!(pool.alloc(), 7);
        assert_eq!(pool.alloc(), 11);
    }

    #[test]
    fn test_contiguous_frees_compact_into_range() {
        let mut pool = IntIdentifierPool::new();
        for _ in 0..10 {
            pool.alloc();
        }
        pool.free(4);
        pool.free(5);
        pool.free(6);
        assert_eq!(pool.free_count(), 3);
        assert_eq!(pool.reuse, 4..7);
        assert!(pool.free.is_empty());
    }

    #[test]
    fn test_freeing_tail_shrinks_fresh_counter() {
        let mut pool = IntIdentifierPool::new();
        for _ in 0..3 {
            pool.alloc();
        }
        pool.free(3);
        pool.free(2);
        pool.free(1);
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.alloc(), 1);
    }

    #[test]
    fn test_no_duplicate_live_ids() {
        let mut pool = IntIdentifierPool::new();
        let mut live = HashSet::new();
        // A deterministic mix of allocations and frees.
        for step in 0u64..400 {
            if step % 3 == 2 && !live.is_empty() {
                let victim = *live.iter().min_by_key(|id| (**id * 7919) % 13).unwrap_or(&0);
                live.remove(&victim);
                pool.free(victim);
            } else {
                let id = pool.alloc();
                assert!(live.insert(id), "id {id} allocated twice");
            }
        }
    }

    #[test]
    fn test_alloc_prefers_smallest_free_value() {
        let mut pool = IntIdentifierPool::new();
        for _ in 0..10 {
            pool.alloc();
        }
        pool.free(8);
        pool.free(9);
        pool.free(1);
        assert_eq!(pool.alloc(), 1);
        assert_eq!(pool.alloc(), 8);
        assert_eq!(pool.alloc(), 9);
    }
}
