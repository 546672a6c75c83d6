use std::sync::Mutex;

use strata_budget_tracker::{MemoryQuota, QuotaAllocation};
use strata_common::{Result, error::Error};

/// Granularity of quota reservations made for growing buffers.
pub const CHARGE_CHUNK: u64 = 64 * 1024;

/// Memory reserved from a [`MemoryQuota`] on behalf of one growing structure.
///
/// Reservations are made in [`CHARGE_CHUNK`] steps and returned to the quota on drop.
pub struct MemoryCharge {
    context: &'static str,
    quota: MemoryQuota,
    allocation: Mutex<QuotaAllocation>,
}

impl MemoryCharge {
    pub fn new(quota: &MemoryQuota, context: &'static str) -> MemoryCharge {
        MemoryCharge {
            context,
            quota: quota.clone(),
            allocation: Mutex::new(quota.empty_allocation()),
        }
    }

    pub fn quota(&self) -> &MemoryQuota {
        &self.quota
    }

    pub fn charged(&self) -> u64 {
        self.allocation.lock().expect("charge lock").amount()
    }

    /// Makes sure at least `total` bytes are reserved.
    pub fn ensure(&self, total: u64) -> Result<()> {
        let mut allocation = self.allocation.lock().expect("charge lock");
        let current = allocation.amount();
        if total <= current {
            return Ok(());
        }
        let target = total.div_ceil(CHARGE_CHUNK) * CHARGE_CHUNK;
        allocation
            .grow(target - current)
            .or_else(|_| allocation.grow(total - current))
            .map_err(|e| Error::resource_exhausted(self.context, e.requested))
    }

    /// Reserves exactly `additional` more bytes.
    pub fn reserve(&self, additional: u64) -> Result<()> {
        self.allocation
            .lock()
            .expect("charge lock")
            .grow(additional)
            .map_err(|e| Error::resource_exhausted(self.context, e.requested))
    }

    /// Returns reserved bytes above `total` to the quota.
    pub fn release_to(&self, total: u64) {
        self.allocation.lock().expect("charge lock").shrink_to(total);
    }
}

impl std::fmt::Debug for MemoryCharge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCharge")
            .field("context", &self.context)
            .field("charged", &self.charged())
            .finish()
    }
}
