//! TCP port allocator (spec §4.1).
//!
//! Grounded on the port-allocation half of `ProcessGroup` in
//! `ManuMario0-trading-lab`'s system-orchestrator process manager: a
//! single mutex around the allocated set, sequential search from `base`.

use std::collections::HashSet;
use std::net::TcpListener;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Allocation snapshot for `Stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortStats {
    pub total: u32,
    pub allocated: u32,
    pub available: u32,
}

struct Inner {
    base: u16,
    max: u16,
    allocated: HashSet<u16>,
}

/// Hands out an unused TCP port from `[base, max]` and reclaims it on release.
pub struct PortAllocator {
    inner: Mutex<Inner>,
}

impl PortAllocator {
    pub fn new(base: u16, max: u16) -> Self {
        Self {
            inner: Mutex::new(Inner { base, max, allocated: HashSet::new() }),
        }
    }

    /// Returns a port that is not in the allocated set and that can currently
    /// be bound on loopback. Marks it allocated before returning. The
    /// check-then-use window is not fully closed here: the caller's bind
    /// inside the inference process resolves the remaining race.
    pub fn next_port(&self) -> Result<u16> {
        let mut inner = self.inner.lock();
        let (base, max) = (inner.base, inner.max);
        for candidate in base..=max {
            if inner.allocated.contains(&candidate) {
                continue;
            }
            if TcpListener::bind(("127.0.0.1", candidate)).is_ok() {
                inner.allocated.insert(candidate);
                return Ok(candidate);
            }
        }
        Err(Error::PortExhausted { base, max })
    }

    /// Idempotent: releasing an unallocated port is a no-op.
    pub fn release(&self, port: u16) {
        self.inner.lock().allocated.remove(&port);
    }

    pub fn is_allocated(&self, port: u16) -> bool {
        self.inner.lock().allocated.contains(&port)
    }

    pub fn stats(&self) -> PortStats {
        let inner = self.inner.lock();
        let total = (inner.max - inner.base + 1) as u32;
        let allocated = inner.allocated.len() as u32;
        PortStats { total, allocated, available: total.saturating_sub(allocated) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_allocation_and_exhaustion() {
        let alloc = PortAllocator::new(20000, 20002);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let p = alloc.next_port().unwrap();
            assert!(p >= 20000 && p <= 20002);
            assert!(seen.insert(p));
        }
        assert!(alloc.next_port().is_err());
    }

    #[test]
    fn test_release_is_immediately_reusable() {
        let alloc = PortAllocator::new(20010, 20010);
        let p = alloc.next_port().unwrap();
        assert!(alloc.next_port().is_err());
        alloc.release(p);
        let p2 = alloc.next_port().unwrap();
        assert_eq!(p, p2);
    }

    #[test]
    fn test_release_idempotent() {
        let alloc = PortAllocator::new(20020, 20021);
        alloc.release(20020);
        alloc.release(20020);
        let stats = alloc.stats();
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.total, 2);
    }
}
