//! K230 peripheral DMA (PDMA) channel driver.
//!
//! Each channel moves data along a chain of [`LltNode`] descriptors built at
//! configuration time. The chain pages are owned by the channel slot until
//! the channel is reconfigured or its "done" interrupt is cleared.

mod llt;

pub use llt::{segment_count, segment_len, LltChain, LltNode, LLT_MAX_LINE_SIZE};

use core::sync::atomic::{AtomicBool, Ordering};

use axaddrspace::{HostPhysAddr, HostVirtAddr};
use axerrno::{ax_err, AxError, AxResult};
use bitflags::bitflags;
use bitmaps::Bitmap;
use log::{debug, error, info, trace, warn};
use spin::{Mutex, MutexGuard};

use crate::consts::*;
use crate::hal::{DmaMemory, HardLock};
use crate::hardlock::ScopedHardLock;
use crate::irq::IrqHandler;
use crate::utils::{RegisterIo, SpinPolicy};

bitflags! {
    /// Per-channel interrupt events. Shift by the channel index to get the
    /// bits in the global mask and status registers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PdmaIrq: u32 {
        const DONE = 1 << 0;
        const ITEM = 1 << 8;
        const PAUSE = 1 << 16;
        const TIMEOUT = 1 << 24;
    }
}

impl PdmaIrq {
    /// Register bits of these events for channel `ch`, which callers have
    /// already checked against [`PDMA_CH_MAX`].
    pub(crate) fn for_channel(self, ch: usize) -> u32 {
        debug_assert!(ch < PDMA_CH_MAX);
        self.bits() << ch
    }
}

/// Transfer direction as seen from the peripheral.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Memory to device.
    Tx = 0,
    /// Device to memory.
    Rx = 1,
}

/// Width of one device access.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHSize {
    Byte = 0,
    HalfWord = 1,
    Word = 2,
}

/// Byte swapping applied to the data stream.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEndian {
    Default = 0,
    Two = 1,
    Four = 2,
    Eight = 3,
}

/// Channel config register word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCfg(u32);

impl ChannelCfg {
    pub const fn new(
        dir: Direction,
        hsize: DeviceHSize,
        endian: DataEndian,
        burst_len: u8,
        priority: u8,
        timeout: u16,
    ) -> Self {
        Self(
            dir as u32
                | (hsize as u32) << 4
                | (endian as u32) << 8
                | ((burst_len & 0xf) as u32) << 12
                | ((priority & 0xf) as u32) << 16
                | ((timeout & 0xfff) as u32) << 20,
        )
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// One transfer request for a channel.
#[derive(Debug, Clone, Copy)]
pub struct UsrPdmaCfg {
    pub ch: usize,
    /// Peripheral request line selected for the channel.
    pub device: u32,
    pub src: HostPhysAddr,
    pub dst: HostPhysAddr,
    /// Total bytes to move.
    pub line_size: u32,
    pub ch_cfg: ChannelCfg,
}

/// Static description of a PDMA instance.
#[derive(Debug, Clone, Copy)]
pub struct PdmaConfig {
    pub base: HostPhysAddr,
    pub io_size: usize,
    pub hardlock_id: usize,
    /// Largest segment a single descriptor carries.
    pub max_line_size: u32,
    /// Budget for hardlock acquisition and the busy drain in
    /// [`Pdma::config`].
    pub spin: SpinPolicy,
}

impl PdmaConfig {
    pub fn k230() -> Self {
        Self {
            base: HostPhysAddr::from_usize(K230_PDMA_PHYS_BASE),
            io_size: K230_PDMA_IO_SIZE,
            hardlock_id: K230_HARDLOCK_PDMA,
            max_line_size: PDMA_MAX_LINE_SIZE,
            spin: SpinPolicy::default(),
        }
    }
}

pub struct Pdma<IO: RegisterIo, H: HardLock, M: DmaMemory> {
    io: IO,
    mem: M,
    lock: ScopedHardLock<H>,
    regs: HostVirtAddr,
    max_line_size: u32,
    spin: SpinPolicy,
    /// Descriptor chain owned by each channel, if any.
    chains: [Mutex<Option<LltChain>>; PDMA_CH_MAX],
    /// Done events seen while the chain slot was held. The holder frees the
    /// chain once it lets go.
    deferred_free: [AtomicBool; PDMA_CH_MAX],
}

impl<IO: RegisterIo, H: HardLock, M: DmaMemory> Pdma<IO, H, M> {
    /// Maps the register window and reserves the hardware lock slot.
    ///
    /// Failing to reserve the slot is not fatal: the driver then runs
    /// without cross-agent locking.
    pub fn new(io: IO, hardlock: H, mem: M, config: PdmaConfig) -> AxResult<Self> {
        if config.max_line_size == 0 || config.max_line_size > LLT_MAX_LINE_SIZE {
            return ax_err!(InvalidInput, "bad max line size");
        }
        let regs = io.ioremap(config.base, config.io_size).ok_or_else(|| {
            error!("pdma module ioremap error!");
            AxError::BadAddress
        })?;
        let lock = ScopedHardLock::new(hardlock, config.hardlock_id, config.spin);
        info!(
            "pdma at {:#x}, hardlock {}",
            config.base.as_usize(),
            if lock.is_backed() { "reserved" } else { "unavailable" }
        );
        Ok(Self {
            io,
            mem,
            lock,
            regs,
            max_line_size: config.max_line_size,
            spin: config.spin,
            chains: core::array::from_fn(|_| Mutex::new(None)),
            deferred_free: core::array::from_fn(|_| AtomicBool::new(false)),
        })
    }

    fn reg(&self, offset: usize) -> HostVirtAddr {
        self.regs + offset
    }

    fn ch_reg(&self, ch: usize, offset: usize) -> HostVirtAddr {
        self.reg(PDMA_CH_REG_OFFSET + ch * PDMA_CH_REG_STRIDE + offset)
    }

    fn check_channel(ch: usize) -> AxResult {
        if ch >= PDMA_CH_MAX {
            return ax_err!(InvalidInput, "pdma channel out of range");
        }
        Ok(())
    }

    /// Read-modify-write of a register shared with other bus masters.
    fn shared_update(&self, offset: usize, set: u32, clear: u32) -> AxResult {
        let _guard = self.lock.lock()?;
        let reg = self.reg(offset);
        let val = self.io.read32(reg);
        self.io.write32(reg, (val & !clear) | set);
        Ok(())
    }

    fn ch_enable(&self, ch: usize) -> AxResult {
        self.shared_update(PDMA_CH_EN, 1 << ch, 0)
    }

    fn ch_disable(&self, ch: usize) -> AxResult {
        self.shared_update(PDMA_CH_EN, 0, 1 << ch)
    }

    pub fn is_channel_enabled(&self, ch: usize) -> AxResult<bool> {
        Self::check_channel(ch)?;
        Ok(self.io.read32(self.reg(PDMA_CH_EN)) & (1 << ch) != 0)
    }

    /// Unmasks `events` for channel `ch`.
    pub fn interrupt_en(&self, ch: usize, events: PdmaIrq) -> AxResult {
        Self::check_channel(ch)?;
        self.shared_update(PDMA_INT_MASK, 0, events.for_channel(ch))
    }

    /// Masks `events` for channel `ch`.
    pub fn interrupt_mask(&self, ch: usize, events: PdmaIrq) -> AxResult {
        Self::check_channel(ch)?;
        self.shared_update(PDMA_INT_MASK, events.for_channel(ch), 0)
    }

    /// Raw global interrupt status.
    pub fn interrupt_stat(&self) -> u32 {
        self.io.read32(self.reg(PDMA_INT_STAT))
    }

    /// Acknowledges `events` of channel `ch`. Acknowledging `DONE` also
    /// releases the channel's descriptor chain.
    pub fn int_clear(&self, ch: usize, events: PdmaIrq) -> AxResult {
        Self::check_channel(ch)?;
        self.io
            .write32(self.reg(PDMA_INT_STAT), events.for_channel(ch));
        if events.contains(PdmaIrq::DONE) {
            self.reap_channel(ch);
        }
        Ok(())
    }

    /// Writes `clear` to the status register and releases the chain of every
    /// channel whose done bit was set in the status read just before.
    /// Returns those channels.
    pub fn int_clear_all(&self, clear: u32) -> Bitmap<{ PDMA_CH_MAX }> {
        let stat = self.interrupt_stat();
        self.io.write32(self.reg(PDMA_INT_STAT), clear);
        self.reap(stat)
    }

    fn reap(&self, stat: u32) -> Bitmap<{ PDMA_CH_MAX }> {
        // done bits of all channels sit in the low byte
        let done = Bitmap::<{ PDMA_CH_MAX }>::from_value((stat & 0xff) as u8);
        for ch in &done {
            self.reap_channel(ch);
        }
        done
    }

    /// Frees the chain of a finished channel without ever waiting on the
    /// slot, so it is safe from interrupt context. A busy slot is left to
    /// its holder.
    fn reap_channel(&self, ch: usize) {
        let Some(mut slot) = self.chains[ch].try_lock() else {
            trace!("pdma ch{ch}: chain busy, free deferred");
            self.deferred_free[ch].store(true, Ordering::SeqCst);
            return;
        };
        self.deferred_free[ch].store(false, Ordering::SeqCst);
        let chain = slot.take();
        drop(slot);
        if let Some(chain) = chain {
            self.free_chain(ch, chain);
        }
    }

    /// Locks the chain slot of `ch` from thread context. Pair with
    /// [`Pdma::unlock_chain`] so deferred frees are honoured.
    fn lock_chain(&self, ch: usize) -> MutexGuard<'_, Option<LltChain>> {
        self.chains[ch].lock()
    }

    fn unlock_chain(&self, ch: usize, slot: MutexGuard<'_, Option<LltChain>>) {
        drop(slot);
        if self.deferred_free[ch].load(Ordering::SeqCst) {
            self.reap_channel(ch);
        }
    }

    fn free_chain(&self, ch: usize, chain: LltChain) {
        trace!("pdma ch{ch}: freeing {} descriptors", chain.len());
        chain.release(&self.mem);
    }

    /// Interrupt service: acknowledges everything pending and tears down the
    /// chains of finished channels.
    pub fn handle_irq(&self) -> Bitmap<{ PDMA_CH_MAX }> {
        let stat = self.interrupt_stat();
        self.io.write32(self.reg(PDMA_INT_STAT), stat);
        trace!("pdma irq, status {stat:#x}");
        self.reap(stat)
    }

    pub fn start(&self, ch: usize) -> AxResult {
        Self::check_channel(ch)?;
        self.io.write32(self.ch_reg(ch, PDMA_CH_CTL), PDMA_CTL_START);
        Ok(())
    }

    /// Requests a stop. The channel may still be busy on return.
    pub fn stop(&self, ch: usize) -> AxResult {
        Self::check_channel(ch)?;
        self.io.write32(self.ch_reg(ch, PDMA_CH_CTL), PDMA_CTL_STOP);
        Ok(())
    }

    pub fn resume(&self, ch: usize) -> AxResult {
        Self::check_channel(ch)?;
        self.io.write32(self.ch_reg(ch, PDMA_CH_CTL), PDMA_CTL_RESUME);
        Ok(())
    }

    fn status(&self, ch: usize) -> AxResult<u32> {
        Self::check_channel(ch)?;
        Ok(self.io.read32(self.ch_reg(ch, PDMA_CH_STATUS)))
    }

    pub fn is_busy(&self, ch: usize) -> AxResult<bool> {
        Ok(self.status(ch)? & PDMA_STATUS_BUSY != 0)
    }

    pub fn is_paused(&self, ch: usize) -> AxResult<bool> {
        Ok(self.status(ch)? & PDMA_STATUS_PAUSE != 0)
    }

    /// Polls until channel `ch` is no longer busy.
    pub fn wait_idle(&self, ch: usize, policy: SpinPolicy) -> AxResult {
        Self::check_channel(ch)?;
        let status = self.ch_reg(ch, PDMA_CH_STATUS);
        policy
            .spin_until(|| self.io.read32(status) & PDMA_STATUS_BUSY == 0)
            .inspect_err(|_| error!("pdma ch{ch} still busy after {} polls", policy.max_spins))
    }

    /// Stops channel `cfg.ch`, waits for it to drain, builds the descriptor
    /// chain and programs the channel. The transfer starts with
    /// [`Pdma::start`].
    ///
    /// On failure the channel is left disabled with its status, config and
    /// chain registers untouched, so the call can be retried.
    pub fn config(&self, cfg: &UsrPdmaCfg) -> AxResult {
        let ch = cfg.ch;
        Self::check_channel(ch)?;

        // Held to the end: configs of one channel never interleave.
        let mut slot = self.lock_chain(ch);
        self.stop(ch)?;
        if let Err(e) = self.wait_idle(ch, self.spin) {
            self.unlock_chain(ch, slot);
            return Err(self.abort_config(ch, e));
        }
        // The previous transfer is over; its chain is no longer read.
        if let Some(old) = slot.take() {
            self.free_chain(ch, old);
        }

        let chain = match LltChain::build(
            &self.mem,
            cfg.src,
            cfg.dst,
            cfg.line_size,
            self.max_line_size,
        ) {
            Ok(chain) => chain,
            Err(e) => {
                self.unlock_chain(ch, slot);
                return Err(self.abort_config(ch, e));
            }
        };

        if let Err(e) = self.ch_enable(ch) {
            chain.release(&self.mem);
            self.unlock_chain(ch, slot);
            return Err(self.abort_config(ch, e));
        }
        self.io.write32(
            self.reg(PDMA_INT_STAT),
            PdmaIrq::all().for_channel(ch),
        );
        // Done events up to here belong to the transfer whose chain went
        // away above.
        self.deferred_free[ch].store(false, Ordering::SeqCst);
        self.io
            .write32(self.ch_reg(ch, PDMA_CH_CFG), cfg.ch_cfg.bits());
        self.io
            .write32(self.reg(PDMA_CH_PERI_DEV_SEL + ch * 4), cfg.device);

        let head = chain.head().as_usize() as u32;
        debug!(
            "pdma ch{ch}: cfg {:#x}, device {}, {} descriptors at {head:#x}",
            cfg.ch_cfg.bits(),
            cfg.device,
            chain.len()
        );
        *slot = Some(chain);
        self.io.write32(self.ch_reg(ch, PDMA_CH_LLT_SADDR), head);
        drop(slot);
        Ok(())
    }

    fn abort_config(&self, ch: usize, err: AxError) -> AxError {
        if let Err(e) = self.ch_disable(ch) {
            warn!("pdma ch{ch}: cannot disable after failed config: {e:?}");
        }
        err
    }

    /// Releases the descriptor chain of `ch`. Releasing a channel without a
    /// chain is a no-op.
    pub fn llt_free(&self, ch: usize) -> AxResult {
        Self::check_channel(ch)?;
        let mut slot = self.lock_chain(ch);
        let chain = slot.take();
        self.unlock_chain(ch, slot);
        if let Some(chain) = chain {
            self.free_chain(ch, chain);
        }
        Ok(())
    }

    /// Runs `f` on the chain currently owned by `ch`.
    pub fn with_chain<R>(&self, ch: usize, f: impl FnOnce(&LltChain) -> R) -> Option<R> {
        Self::check_channel(ch).ok()?;
        let slot = self.lock_chain(ch);
        let ret = slot.as_ref().map(f);
        self.unlock_chain(ch, slot);
        ret
    }
}

impl<IO, H, M> IrqHandler for Pdma<IO, H, M>
where
    IO: RegisterIo + Sync,
    H: HardLock + Sync,
    M: DmaMemory + Sync,
{
    fn handle(&self, _irq: usize) {
        self.handle_irq();
    }
}
