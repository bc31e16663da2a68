//! Linked-list transfer (LLT) descriptors walked by the PDMA engine.

use core::mem::size_of;

use axaddrspace::{HostPhysAddr, HostVirtAddr};
use axerrno::{ax_err, AxError, AxResult};
use log::{debug, error};

use crate::hal::DmaMemory;
use crate::utils::page_order;

const LINE_SIZE_MASK: u32 = 0x3FFF_FFFF;
const PAUSE_BIT: u32 = 1 << 30;
const NODE_INTR_BIT: u32 = 1 << 31;

/// One transfer segment, laid out exactly as the engine reads it.
///
/// All addresses are 32-bit physical addresses. A zero `next_llt_addr`
/// terminates the chain.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LltNode {
    /// `line_size[29:0] | pause[30] | node_intr[31]`
    ctrl: u32,
    pub src_addr: u32,
    pub line_space: u32,
    pub dst_addr: u32,
    pub next_llt_addr: u32,
}

impl LltNode {
    pub fn line_size(&self) -> u32 {
        self.ctrl & LINE_SIZE_MASK
    }

    pub fn set_line_size(&mut self, size: u32) {
        self.ctrl = (self.ctrl & !LINE_SIZE_MASK) | (size & LINE_SIZE_MASK);
    }

    pub fn pause(&self) -> bool {
        self.ctrl & PAUSE_BIT != 0
    }

    pub fn set_pause(&mut self, pause: bool) {
        if pause {
            self.ctrl |= PAUSE_BIT;
        } else {
            self.ctrl &= !PAUSE_BIT;
        }
    }

    pub fn node_intr(&self) -> bool {
        self.ctrl & NODE_INTR_BIT != 0
    }
}

/// Largest segment a descriptor can describe.
pub const LLT_MAX_LINE_SIZE: u32 = LINE_SIZE_MASK;

/// Number of descriptors needed for `len` bytes in segments of at most `max`.
pub fn segment_count(len: u32, max: u32) -> usize {
    len.div_ceil(max) as usize
}

/// Length of segment `index` out of `count`. Every segment but the last is
/// `max` long; the last takes what is left, which is a full `max` when
/// `len` is an exact multiple.
pub fn segment_len(index: usize, count: usize, len: u32, max: u32) -> u32 {
    if index + 1 < count {
        max
    } else {
        len - (count as u32 - 1) * max
    }
}

/// A descriptor chain living in pages owned by this value.
///
/// The pages go back to the allocator only through [`LltChain::release`].
#[derive(Debug)]
pub struct LltChain {
    vaddr: HostVirtAddr,
    phys: HostPhysAddr,
    order: usize,
    count: usize,
}

impl LltChain {
    /// Allocates and fills the chain moving `len` bytes from `src` to `dst`,
    /// then cleans it out of the data cache.
    pub fn build<M: DmaMemory>(
        mem: &M,
        src: HostPhysAddr,
        dst: HostPhysAddr,
        len: u32,
        max_line_size: u32,
    ) -> AxResult<Self> {
        if len == 0 {
            return ax_err!(InvalidInput, "zero-length transfer");
        }
        if max_line_size == 0 || max_line_size > LLT_MAX_LINE_SIZE {
            return ax_err!(InvalidInput, "bad max line size");
        }
        let src = dma_addr(src, len as usize)?;
        let dst = dma_addr(dst, len as usize)?;

        let count = segment_count(len, max_line_size);
        let bytes = count * size_of::<LltNode>();
        let order = page_order(bytes);
        let vaddr = mem.alloc_pages(order).ok_or_else(|| {
            error!("pdma: cannot allocate {count} descriptors (order {order})");
            AxError::NoMemory
        })?;
        let phys = mem.virt_to_phys(vaddr);
        let chain = Self {
            vaddr,
            phys,
            order,
            count,
        };
        let Ok(head) = dma_addr(phys, bytes) else {
            error!("pdma: descriptor memory {:#x} beyond 32-bit reach", phys.as_usize());
            chain.release(mem);
            return Err(AxError::BadAddress);
        };

        let nodes = unsafe {
            core::slice::from_raw_parts_mut(vaddr.as_mut_ptr() as *mut LltNode, count)
        };
        // Every offset below stays inside a range dma_addr accepted.
        for (i, node) in nodes.iter_mut().enumerate() {
            let offset = i * max_line_size as usize;
            *node = LltNode {
                src_addr: src + offset as u32,
                dst_addr: dst + offset as u32,
                next_llt_addr: if i + 1 < count {
                    head + ((i + 1) * size_of::<LltNode>()) as u32
                } else {
                    0
                },
                ..Default::default()
            };
            node.set_line_size(segment_len(i, count, len, max_line_size));
            node.set_pause(false);
        }

        mem.clean_invalidate_dcache(vaddr, bytes);
        debug!(
            "pdma: {count} descriptors for {len:#x} bytes at {:#x}",
            phys.as_usize()
        );
        Ok(chain)
    }

    /// Physical address of the first descriptor, as the engine wants it.
    pub fn head(&self) -> HostPhysAddr {
        self.phys
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn nodes(&self) -> &[LltNode] {
        unsafe { core::slice::from_raw_parts(self.vaddr.as_ptr() as *const LltNode, self.count) }
    }

    pub fn release<M: DmaMemory>(self, mem: &M) {
        mem.free_pages(self.vaddr, self.order);
    }
}

/// Checks that `[addr, addr + len)` is reachable with 32-bit addressing.
fn dma_addr(addr: HostPhysAddr, len: usize) -> AxResult<u32> {
    let start = u32::try_from(addr.as_usize()).map_err(|_| AxError::BadAddress)?;
    let end = u64::from(start) + len as u64;
    if end > u64::from(u32::MAX) + 1 {
        return ax_err!(BadAddress, "address beyond 32-bit dma reach");
    }
    Ok(start)
}
