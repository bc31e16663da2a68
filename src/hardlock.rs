//! Scoped acquisition of a SoC hardware lock slot.

use axerrno::AxResult;
use log::{error, warn};

use crate::hal::HardLock;
use crate::utils::SpinPolicy;

/// A reserved hardware lock slot.
///
/// If the slot could not be reserved the lock runs in pass-through mode:
/// acquisition always succeeds and nothing is written to the hardware.
pub struct ScopedHardLock<H: HardLock> {
    hw: H,
    id: Option<usize>,
    policy: SpinPolicy,
}

impl<H: HardLock> ScopedHardLock<H> {
    pub fn new(hw: H, id: usize, policy: SpinPolicy) -> Self {
        let id = if hw.request(id) {
            Some(id)
        } else {
            warn!("Fail to request hardlock-{id}, continuing without it");
            None
        };
        Self { hw, id, policy }
    }

    /// Whether a hardware slot backs this lock.
    pub fn is_backed(&self) -> bool {
        self.id.is_some()
    }

    /// Spins on the slot until it is taken or the retry budget runs out.
    pub fn lock(&self) -> AxResult<HardLockGuard<'_, H>> {
        if let Some(id) = self.id {
            self.policy
                .spin_until(|| self.hw.try_lock(id))
                .inspect_err(|_| {
                    error!("hardlock-{id} not acquired after {} spins", self.policy.max_spins);
                })?;
        }
        Ok(HardLockGuard { lock: self })
    }
}

/// Releases the slot when dropped.
pub struct HardLockGuard<'a, H: HardLock> {
    lock: &'a ScopedHardLock<H>,
}

impl<H: HardLock> Drop for HardLockGuard<'_, H> {
    fn drop(&mut self) {
        if let Some(id) = self.lock.id {
            self.lock.hw.unlock(id);
        }
    }
}
