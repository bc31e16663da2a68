//! Recording stand-ins for the platform services, used by the unit tests.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use axaddrspace::{HostPhysAddr, HostVirtAddr};
use spin::Mutex;

use crate::consts::PAGE_SIZE;
use crate::hal::{DmaMemory, HardLock, IrqLine};
use crate::utils::RegisterIo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read(usize, u32),
    Write(usize, u32),
}

/// Sparse register file. Reads return scripted values first, then the last
/// value written (or zero).
#[derive(Default)]
pub struct MockIo {
    regs: Mutex<BTreeMap<usize, u32>>,
    scripts: Mutex<BTreeMap<usize, VecDeque<u32>>>,
    log: Mutex<Vec<Access>>,
    pub fail_ioremap: AtomicBool,
}

impl MockIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues values returned by the next reads of `addr`.
    pub fn script(&self, addr: usize, values: &[u32]) {
        self.scripts
            .lock()
            .entry(addr)
            .or_default()
            .extend(values.iter().copied());
    }

    pub fn peek(&self, addr: usize) -> u32 {
        self.regs.lock().get(&addr).copied().unwrap_or(0)
    }

    pub fn poke(&self, addr: usize, val: u32) {
        self.regs.lock().insert(addr, val);
    }

    pub fn log(&self) -> Vec<Access> {
        self.log.lock().clone()
    }

    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.log
            .lock()
            .iter()
            .filter_map(|a| match *a {
                Access::Write(addr, val) => Some((addr, val)),
                Access::Read(..) => None,
            })
            .collect()
    }

    pub fn writes_to(&self, addr: usize) -> Vec<u32> {
        self.writes()
            .into_iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }
}

impl RegisterIo for MockIo {
    fn ioremap(&self, paddr: HostPhysAddr, _size: usize) -> Option<HostVirtAddr> {
        if self.fail_ioremap.load(Ordering::SeqCst) {
            return None;
        }
        Some(HostVirtAddr::from_usize(paddr.as_usize()))
    }

    fn read32(&self, addr: HostVirtAddr) -> u32 {
        let addr = addr.as_usize();
        let scripted = self
            .scripts
            .lock()
            .get_mut(&addr)
            .and_then(|q| q.pop_front());
        let val = scripted.unwrap_or_else(|| self.peek(addr));
        self.log.lock().push(Access::Read(addr, val));
        val
    }

    fn write32(&self, addr: HostVirtAddr, val: u32) {
        let addr = addr.as_usize();
        self.regs.lock().insert(addr, val);
        self.log.lock().push(Access::Write(addr, val));
    }
}

#[derive(Default)]
pub struct MockLine {
    pub enabled: AtomicBool,
    pub toggles: AtomicUsize,
}

impl IrqLine for MockLine {
    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        self.toggles.fetch_add(1, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.toggles.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockHardLock {
    pub available: bool,
    /// Number of upcoming `try_lock` attempts that fail.
    pub contended: AtomicUsize,
    held: AtomicBool,
    pub acquisitions: AtomicUsize,
}

impl MockHardLock {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            contended: AtomicUsize::new(0),
            held: AtomicBool::new(false),
            acquisitions: AtomicUsize::new(0),
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl HardLock for MockHardLock {
    fn request(&self, _id: usize) -> bool {
        self.available
    }

    fn try_lock(&self, _id: usize) -> bool {
        if self
            .contended
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return false;
        }
        assert!(!self.held.swap(true, Ordering::SeqCst), "hardlock taken twice");
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn unlock(&self, _id: usize) {
        assert!(self.held.swap(false, Ordering::SeqCst), "hardlock not held");
    }
}

struct Block {
    layout: Layout,
    phys: usize,
    order: usize,
}

/// Page allocator over real heap blocks. Each block gets a fake 32-bit
/// physical address so descriptor links can be checked.
pub struct MockDma {
    blocks: Mutex<BTreeMap<usize, Block>>,
    next_phys: AtomicUsize,
    pub allocs: AtomicUsize,
    pub frees: AtomicUsize,
    pub fail_alloc: AtomicBool,
    flushes: Mutex<Vec<(usize, usize)>>,
}

pub const MOCK_PHYS_BASE: usize = 0x4000_0000;

impl MockDma {
    pub fn new() -> Self {
        Self::with_phys_base(MOCK_PHYS_BASE)
    }

    /// Hands out fake physical addresses starting at `base`.
    pub fn with_phys_base(base: usize) -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            next_phys: AtomicUsize::new(base),
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            fail_alloc: AtomicBool::new(false),
            flushes: Mutex::new(Vec::new()),
        }
    }

    pub fn live_blocks(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn flushes(&self) -> Vec<(usize, usize)> {
        self.flushes.lock().clone()
    }
}

impl Drop for MockDma {
    fn drop(&mut self) {
        for (vaddr, block) in self.blocks.lock().iter() {
            unsafe { dealloc(*vaddr as *mut u8, block.layout) };
        }
    }
}

impl DmaMemory for MockDma {
    fn alloc_pages(&self, order: usize) -> Option<HostVirtAddr> {
        if self.fail_alloc.load(Ordering::SeqCst) {
            return None;
        }
        let size = PAGE_SIZE << order;
        let layout = Layout::from_size_align(size, PAGE_SIZE).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        let phys = self.next_phys.fetch_add(size.max(0x10_0000), Ordering::SeqCst);
        self.blocks
            .lock()
            .insert(ptr as usize, Block { layout, phys, order });
        self.allocs.fetch_add(1, Ordering::SeqCst);
        Some(HostVirtAddr::from_usize(ptr as usize))
    }

    fn free_pages(&self, vaddr: HostVirtAddr, order: usize) {
        let block = self
            .blocks
            .lock()
            .remove(&vaddr.as_usize())
            .expect("freeing unknown block");
        assert_eq!(block.order, order, "freed with wrong order");
        unsafe { dealloc(vaddr.as_mut_ptr(), block.layout) };
        self.frees.fetch_add(1, Ordering::SeqCst);
    }

    fn clean_invalidate_dcache(&self, vaddr: HostVirtAddr, len: usize) {
        self.flushes.lock().push((vaddr.as_usize(), len));
    }

    fn virt_to_phys(&self, vaddr: HostVirtAddr) -> HostPhysAddr {
        let vaddr = vaddr.as_usize();
        let blocks = self.blocks.lock();
        let (base, block) = blocks
            .range(..=vaddr)
            .next_back()
            .expect("address outside any block");
        HostPhysAddr::from_usize(block.phys + (vaddr - base))
    }
}
