use axaddrspace::{HostPhysAddr, HostVirtAddr};
use axerrno::{AxError, AxResult};

use crate::consts::{DEFAULT_MAX_SPINS, PAGE_SHIFT};

/// Access to device register windows.
///
/// `ioremap` resolves a physical window into an address the driver can
/// dereference; `None` means the window is unavailable.
pub trait RegisterIo {
    fn ioremap(&self, paddr: HostPhysAddr, size: usize) -> Option<HostVirtAddr>;
    fn read32(&self, addr: HostVirtAddr) -> u32;
    fn write32(&self, addr: HostVirtAddr, val: u32);

    fn set_bits32(&self, addr: HostVirtAddr, mask: u32) {
        self.write32(addr, self.read32(addr) | mask);
    }

    fn clear_bits32(&self, addr: HostVirtAddr, mask: u32) {
        self.write32(addr, self.read32(addr) & !mask);
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    fn ioremap(&self, paddr: HostPhysAddr, size: usize) -> Option<HostVirtAddr> {
        (**self).ioremap(paddr, size)
    }

    fn read32(&self, addr: HostVirtAddr) -> u32 {
        (**self).read32(addr)
    }

    fn write32(&self, addr: HostVirtAddr, val: u32) {
        (**self).write32(addr, val)
    }
}

/// Volatile MMIO over a linear kernel mapping of device memory.
#[derive(Debug, Clone, Copy)]
pub struct Mmio {
    phys_virt_offset: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// Every device window passed to [`RegisterIo::ioremap`] must be mapped at
    /// `paddr + phys_virt_offset` for as long as this value is used.
    pub const unsafe fn new(phys_virt_offset: usize) -> Self {
        Self { phys_virt_offset }
    }
}

impl RegisterIo for Mmio {
    fn ioremap(&self, paddr: HostPhysAddr, _size: usize) -> Option<HostVirtAddr> {
        let vaddr = paddr.as_usize().checked_add(self.phys_virt_offset)?;
        Some(HostVirtAddr::from_usize(vaddr))
    }

    fn read32(&self, addr: HostVirtAddr) -> u32 {
        unsafe { (addr.as_ptr() as *const u32).read_volatile() }
    }

    fn write32(&self, addr: HostVirtAddr, val: u32) {
        unsafe { (addr.as_mut_ptr() as *mut u32).write_volatile(val) }
    }
}

/// Bounded retry policy for busy-wait loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinPolicy {
    pub max_spins: usize,
}

impl SpinPolicy {
    pub const fn new(max_spins: usize) -> Self {
        Self { max_spins }
    }

    /// Polls `done` until it returns true, giving up with `ResourceBusy`
    /// after `max_spins` unsuccessful polls.
    pub fn spin_until(&self, mut done: impl FnMut() -> bool) -> AxResult {
        for _ in 0..self.max_spins {
            if done() {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        if done() {
            Ok(())
        } else {
            Err(AxError::ResourceBusy)
        }
    }
}

impl Default for SpinPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SPINS)
    }
}

/// Smallest page order whose block holds `size` bytes.
pub(crate) fn page_order(size: usize) -> usize {
    let pages = size.div_ceil(1 << PAGE_SHIFT).max(1);
    pages.next_power_of_two().trailing_zeros() as usize
}
