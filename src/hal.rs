//! Platform services the drivers rely on but do not own.

use axaddrspace::{HostPhysAddr, HostVirtAddr};

/// Core-level external interrupt signal of the executing hart.
pub trait IrqLine {
    fn enable(&self);
    fn disable(&self);
}

/// SoC hardware mutual-exclusion slots, shared with other bus masters.
pub trait HardLock {
    /// Reserves slot `id` for this driver. Returns false if it is taken.
    fn request(&self, id: usize) -> bool;
    /// One acquisition attempt, true on success.
    fn try_lock(&self, id: usize) -> bool;
    fn unlock(&self, id: usize);
}

/// Page allocator and cache maintenance for memory the DMA engine reads.
pub trait DmaMemory {
    /// Allocates `1 << order` contiguous pages.
    fn alloc_pages(&self, order: usize) -> Option<HostVirtAddr>;
    fn free_pages(&self, vaddr: HostVirtAddr, order: usize);
    /// Cleans and invalidates the data cache over `[vaddr, vaddr + len)`.
    fn clean_invalidate_dcache(&self, vaddr: HostVirtAddr, len: usize);
    fn virt_to_phys(&self, vaddr: HostVirtAddr) -> HostPhysAddr;
}

impl<T: IrqLine + ?Sized> IrqLine for &T {
    fn enable(&self) {
        (**self).enable()
    }

    fn disable(&self) {
        (**self).disable()
    }
}

impl<T: HardLock + ?Sized> HardLock for &T {
    fn request(&self, id: usize) -> bool {
        (**self).request(id)
    }

    fn try_lock(&self, id: usize) -> bool {
        (**self).try_lock(id)
    }

    fn unlock(&self, id: usize) {
        (**self).unlock(id)
    }
}

impl<T: DmaMemory + ?Sized> DmaMemory for &T {
    fn alloc_pages(&self, order: usize) -> Option<HostVirtAddr> {
        (**self).alloc_pages(order)
    }

    fn free_pages(&self, vaddr: HostVirtAddr, order: usize) {
        (**self).free_pages(vaddr, order)
    }

    fn clean_invalidate_dcache(&self, vaddr: HostVirtAddr, len: usize) {
        (**self).clean_invalidate_dcache(vaddr, len)
    }

    fn virt_to_phys(&self, vaddr: HostVirtAddr) -> HostPhysAddr {
        (**self).virt_to_phys(vaddr)
    }
}

/// The supervisor external interrupt enable bit (`sie.SEIE`).
#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct SupervisorExternal;

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
impl IrqLine for SupervisorExternal {
    fn enable(&self) {
        unsafe { riscv::register::sie::set_sext() }
    }

    fn disable(&self) {
        unsafe { riscv::register::sie::clear_sext() }
    }
}
