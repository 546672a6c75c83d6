use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free pool of bytes that can be withdrawn and deposited back, never going negative.
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new(amount: u64) -> Counter {
        Counter(AtomicU64::new(amount))
    }

    /// Withdraws `amount` if the pool holds at least that much.
    ///
    /// Returns `false` and leaves the pool unchanged otherwise.
    pub fn withdraw(&self, amount: u64) -> bool {
        let mut current = self.0.load(Ordering::Relaxed);
        while current >= amount {
            match self.0.compare_exchange_weak(
                current,
                current - amount,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(updated) => current = updated,
            }
        }
        false
    }

    pub fn deposit(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Release);
    }

    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
