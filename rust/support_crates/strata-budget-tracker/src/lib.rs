//! Memory quota accounting for offset-table extension and merge buffers.
//!
//! A [`MemoryQuota`] is a shared pool of bytes. Components reserve memory from it
//! through [`QuotaAllocation`] handles, which return their bytes to the pool when
//! dropped. A refused reservation is reported as [`QuotaExceeded`] so that callers
//! can back off, free memory, and retry.

use std::sync::Arc;

use counter::Counter;

pub mod counter;

#[derive(Clone)]
pub struct MemoryQuota(Arc<QuotaNode>);

struct QuotaNode {
    total: u64,
    available: Counter,
}

impl MemoryQuota {
    pub fn new(total: u64) -> MemoryQuota {
        MemoryQuota(Arc::new(QuotaNode {
            total,
            available: Counter::new(total),
        }))
    }

    /// A quota that never refuses a reservation.
    pub fn unlimited() -> MemoryQuota {
        MemoryQuota::new(u64::MAX)
    }

    pub fn total(&self) -> u64 {
        self.0.total
    }

    pub fn remaining(&self) -> u64 {
        self.0.available.read()
    }

    pub fn used(&self) -> u64 {
        self.0.total - self.remaining()
    }

    /// Reserves `amount` bytes from the pool.
    pub fn allocate(&self, amount: u64) -> Result<QuotaAllocation, QuotaExceeded> {
        if self.0.available.withdraw(amount) {
            Ok(QuotaAllocation {
                quota: self.0.clone(),
                amount,
            })
        } else {
            Err(QuotaExceeded {
                requested: amount,
                remaining: self.remaining(),
            })
        }
    }

    /// An empty allocation that can later [`grow`](QuotaAllocation::grow).
    pub fn empty_allocation(&self) -> QuotaAllocation {
        QuotaAllocation {
            quota: self.0.clone(),
            amount: 0,
        }
    }
}

impl Default for MemoryQuota {
    fn default() -> Self {
        MemoryQuota::unlimited()
    }
}

impl std::fmt::Debug for MemoryQuota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQuota")
            .field("total", &self.total())
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Bytes reserved from a [`MemoryQuota`]; released on drop.
pub struct QuotaAllocation {
    quota: Arc<QuotaNode>,
    amount: u64,
}

impl QuotaAllocation {
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn grow(&mut self, additional: u64) -> Result<(), QuotaExceeded> {
        if self.quota.available.withdraw(additional) {
            self.amount += additional;
            Ok(())
        } else {
            Err(QuotaExceeded {
                requested: additional,
                remaining: self.quota.available.read(),
            })
        }
    }

    pub fn shrink_to(&mut self, amount: u64) {
        if amount < self.amount {
            self.quota.available.deposit(self.amount - amount);
            self.amount = amount;
        }
    }

    /// Moves the bytes of `other` into this allocation.
    pub fn absorb(&mut self, mut other: QuotaAllocation) {
        self.amount += std::mem::take(&mut other.amount);
    }
}

impl Drop for QuotaAllocation {
    fn drop(&mut self) {
        if self.amount != 0 {
            self.quota.available.deposit(self.amount);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub requested: u64,
    pub remaining: u64,
}

impl std::fmt::Display for QuotaExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "memory quota exceeded: requested {}, remaining {}",
            self.requested, self.remaining
        )
    }
}

impl std::error::Error for QuotaExceeded {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_released_on_drop() {
        let quota = MemoryQuota::new(1000);
        {
            let a = quota.allocate(600).unwrap();
            assert_eq!(a.amount(), 600);
            assert_eq!(quota.remaining(), 400);
            assert!(quota.allocate(500).is_err());
        }
        assert_eq!(quota.remaining(), 1000);
    }

    #[test]
    fn test_grow_and_shrink() {
        let quota = MemoryQuota::new(100);
        let mut a = quota.empty_allocation();
        a.grow(70).unwrap();
        let err = a.grow(40).unwrap_err();
        assert_eq!(err.requested, 40);
        assert_eq!(err.remaining, 30);
        a.shrink_to(20);
        assert_eq!(quota.used(), 20);
        a.grow(40).unwrap();
        assert_eq!(quota.used(), 60);
    }

    #[test]
    fn test_absorb_keeps_bytes_reserved() {
        let quota = MemoryQuota::new(100);
        let mut a = quota.allocate(10).unwrap();
        let b = quota.allocate(20).unwrap();
        a.absorb(b);
        assert_eq!(a.amount(), 30);
        assert_eq!(quota.remaining(), 70);
        drop(a);
        assert_eq!(quota.remaining(), 100);
    }
}
