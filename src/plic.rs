//! C908 Platform-Level Interrupt Controller driver.
//!
//! Handling an interrupt is a two-step process: the hart claims it by
//! reading its claim register, then completes it by writing the same ID
//! back. The PLIC keeps a claimed source gated until it is completed, so
//! every claimed ID is completed even when nobody handles it.

use axaddrspace::{HostPhysAddr, HostVirtAddr};
use axerrno::{ax_err, AxError, AxResult};
use bitmaps::Bitmap;
use log::{debug, error, info, warn};
use spin::{Mutex, Once};

use crate::consts::*;
use crate::hal::IrqLine;
use crate::irq::IrqHandlerTable;
use crate::utils::RegisterIo;

/// Static description of a PLIC instance.
#[derive(Debug, Clone, Copy)]
pub struct PlicConfig {
    /// Physical base of the register window.
    pub base: HostPhysAddr,
    /// Highest valid source ID.
    pub nr_irqs: usize,
    /// Contexts exposed by the hardware.
    pub nr_contexts: usize,
    /// Contexts per hart; the first of each group is the machine-mode one.
    pub contexts_per_hart: usize,
    /// Harts that take external interrupts through this driver.
    pub harts: Bitmap<{ PLIC_MAX_HARTS }>,
}

impl PlicConfig {
    /// K230 big core: hart 0 served through its supervisor context.
    pub fn k230() -> Self {
        let mut harts = Bitmap::new();
        harts.set(0, true);
        Self {
            base: HostPhysAddr::from_usize(K230_PLIC_PHYS_BASE),
            nr_irqs: K230_PLIC_NR_IRQS,
            nr_contexts: K230_PLIC_NR_CONTEXTS,
            contexts_per_hart: K230_PLIC_CONTEXTS_PER_HART,
            harts,
        }
    }

    fn validate(&self) -> AxResult {
        if self.nr_irqs == 0 || self.nr_irqs >= PLIC_NUM_SOURCES {
            return ax_err!(InvalidInput, "nr_irqs out of range");
        }
        if self.contexts_per_hart == 0 {
            return ax_err!(InvalidInput, "contexts_per_hart must be non-zero");
        }
        Ok(())
    }
}

/// Register windows of one activated hart context.
#[derive(Debug, Clone, Copy)]
struct HartContext {
    index: usize,
    ctrl: HostVirtAddr,
    enable: HostVirtAddr,
}

impl HartContext {
    fn threshold_reg(&self) -> HostVirtAddr {
        self.ctrl + PLIC_CONTEXT_THRESHOLD_OFFSET
    }

    fn claim_reg(&self) -> HostVirtAddr {
        self.ctrl + PLIC_CONTEXT_CLAIM_COMPLETE_OFFSET
    }

    fn enable_reg(&self, irq: usize) -> (HostVirtAddr, u32) {
        (self.enable + (irq / 32) * 4, 1 << (irq % 32))
    }
}

struct PlicState {
    priority_base: HostVirtAddr,
    harts: [Option<HartContext>; PLIC_MAX_HARTS],
}

pub struct Plic<IO: RegisterIo, L: IrqLine> {
    io: IO,
    line: L,
    config: PlicConfig,
    state: Once<PlicState>,
    /// Sources currently enabled. Its lock serializes toggles.
    enabled: Mutex<Bitmap<{ PLIC_NUM_SOURCES }>>,
}

impl<IO: RegisterIo, L: IrqLine> Plic<IO, L> {
    pub fn new(io: IO, line: L, config: PlicConfig) -> Self {
        Self {
            io,
            line,
            config,
            state: Once::new(),
            enabled: Mutex::new(Bitmap::new()),
        }
    }

    pub fn config(&self) -> &PlicConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_completed()
    }

    /// Brings the controller up: every source disabled with priority 0,
    /// the selected hart contexts accepting any non-zero priority, and the
    /// core-level external interrupt enabled.
    ///
    /// A second call logs an error and leaves the controller untouched.
    /// On failure the controller stays uninitialized.
    pub fn init(&self) -> AxResult {
        let mut ran = false;
        self.state.try_call_once(|| {
            ran = true;
            self.bring_up()
        })?;
        // Only the caller whose closure ran owns the bring-up.
        if !ran {
            error!("plic already initialized!");
            return Err(AxError::BadState);
        }
        self.line.enable();
        info!(
            "plic initialized at {:#x}, {} irqs",
            self.config.base.as_usize(),
            self.config.nr_irqs
        );
        Ok(())
    }

    fn bring_up(&self) -> AxResult<PlicState> {
        self.config.validate()?;
        let base = self.config.base;
        if base.as_usize() == 0 {
            error!("fatal error, plic reg space is null.");
            return Err(AxError::BadAddress);
        }

        let mut harts = [None; PLIC_MAX_HARTS];
        // Context 0 and every other machine-mode context stay untouched.
        for index in 1..self.config.nr_contexts {
            if index % self.config.contexts_per_hart == 0 {
                continue;
            }
            let hart = index / self.config.contexts_per_hart;
            if hart >= PLIC_MAX_HARTS || !self.config.harts.get(hart) {
                continue;
            }

            let context = self.map_context(index)?;
            let threshold = match harts[hart] {
                Some(HartContext { index: first, .. }) => {
                    debug!("plic: hart {hart} already served by context {first}, masking {index}");
                    PLIC_THRESHOLD_BLOCK_ALL
                }
                None => {
                    harts[hart] = Some(context);
                    PLIC_THRESHOLD_ACCEPT_ALL
                }
            };
            // priority must be > threshold to trigger an interrupt
            self.io.write32(context.threshold_reg(), threshold);
            for irq in 1..=self.config.nr_irqs {
                self.toggle_context(&context, irq, false);
            }
        }

        let priority_base = self
            .io
            .ioremap(
                base + PLIC_PRIORITY_OFFSET,
                PLIC_NUM_SOURCES * PLIC_PRIORITY_PER_ID,
            )
            .ok_or_else(|| {
                error!("plic: cannot map priority table");
                AxError::BadAddress
            })?;
        for irq in 1..=self.config.nr_irqs {
            self.io
                .write32(priority_base + irq * PLIC_PRIORITY_PER_ID, 0);
        }

        Ok(PlicState {
            priority_base,
            harts,
        })
    }

    fn map_context(&self, index: usize) -> AxResult<HartContext> {
        let base = self.config.base;
        let ctrl = self.io.ioremap(
            base + PLIC_CONTEXT_CTRL_OFFSET + index * PLIC_CONTEXT_STRIDE,
            PLIC_CONTEXT_STRIDE,
        );
        let enable = self.io.ioremap(
            base + PLIC_ENABLE_OFFSET + index * PLIC_ENABLE_STRIDE,
            PLIC_ENABLE_STRIDE,
        );
        match (ctrl, enable) {
            (Some(ctrl), Some(enable)) => Ok(HartContext {
                index,
                ctrl,
                enable,
            }),
            _ => {
                error!("plic: cannot map context {index}");
                Err(AxError::BadAddress)
            }
        }
    }

    fn state(&self) -> AxResult<&PlicState> {
        self.state.get().ok_or(AxError::BadState)
    }

    fn context(&self, hart: usize) -> AxResult<HartContext> {
        self.state()?
            .harts
            .get(hart)
            .copied()
            .flatten()
            .ok_or(AxError::BadState)
    }

    fn check_irq(&self, irq: usize) -> AxResult {
        if irq == 0 || irq > self.config.nr_irqs {
            return ax_err!(InvalidInput, "irq out of range");
        }
        Ok(())
    }

    fn toggle_context(&self, context: &HartContext, irq: usize, enable: bool) {
        let (reg, mask) = context.enable_reg(irq);
        if enable {
            self.io.set_bits32(reg, mask);
        } else {
            self.io.clear_bits32(reg, mask);
        }
    }

    /// Priority doubles as the shared enable; the per-context bit is flipped
    /// on every activated hart.
    fn irq_toggle(&self, irq: usize, enable: bool) -> AxResult {
        self.check_irq(irq)?;
        let state = self.state()?;
        let mut enabled = self.enabled.lock();
        self.io.write32(
            state.priority_base + irq * PLIC_PRIORITY_PER_ID,
            enable as u32,
        );
        for context in state.harts.iter().flatten() {
            self.toggle_context(context, irq, enable);
        }
        enabled.set(irq, enable);
        Ok(())
    }

    pub fn enable_irq(&self, irq: usize) -> AxResult {
        self.irq_toggle(irq, true)
    }

    pub fn disable_irq(&self, irq: usize) -> AxResult {
        self.irq_toggle(irq, false)
    }

    /// Whether `irq` is enabled for `hart`, as read back from the hardware.
    pub fn is_enabled(&self, hart: usize, irq: usize) -> AxResult<bool> {
        self.check_irq(irq)?;
        let (reg, mask) = self.context(hart)?.enable_reg(irq);
        Ok(self.io.read32(reg) & mask != 0)
    }

    pub fn priority(&self, irq: usize) -> AxResult<u32> {
        self.check_irq(irq)?;
        let state = self.state()?;
        Ok(self
            .io
            .read32(state.priority_base + irq * PLIC_PRIORITY_PER_ID))
    }

    /// Sources enabled through [`Plic::enable_irq`].
    pub fn enabled_irqs(&self) -> Bitmap<{ PLIC_NUM_SOURCES }> {
        *self.enabled.lock()
    }

    pub fn set_threshold(&self, hart: usize, threshold: u32) -> AxResult {
        let context = self.context(hart)?;
        self.io.write32(context.threshold_reg(), threshold);
        Ok(())
    }

    pub fn threshold(&self, hart: usize) -> AxResult<u32> {
        let context = self.context(hart)?;
        Ok(self.io.read32(context.threshold_reg()))
    }

    /// Claims the highest-priority pending source for `hart`, if any.
    pub fn claim(&self, hart: usize) -> AxResult<Option<usize>> {
        let context = self.context(hart)?;
        match self.io.read32(context.claim_reg()) {
            0 => Ok(None),
            irq => Ok(Some(irq as usize)),
        }
    }

    /// Signals that `irq` has been serviced on `hart`.
    pub fn complete(&self, hart: usize, irq: usize) -> AxResult {
        let context = self.context(hart)?;
        self.io.write32(context.claim_reg(), irq as u32);
        Ok(())
    }

    /// External interrupt entry for `hart`.
    ///
    /// Claims, dispatches and completes sources until the claim register
    /// reads 0, with the core-level external interrupt masked throughout.
    /// Must not be re-entered on the same hart. Returns the number of
    /// sources that reached a handler.
    pub fn handle_irq(&self, hart: usize, table: &impl IrqHandlerTable) -> AxResult<usize> {
        let context = self.context(hart).inspect_err(|_| {
            error!("plic state not initialized.");
        })?;
        let claim = context.claim_reg();

        self.line.disable();
        let mut handled = 0;
        loop {
            let irq = self.io.read32(claim) as usize;
            if irq == 0 {
                break;
            }
            if irq > self.config.nr_irqs {
                error!("bad irq number {irq}!");
            } else if table.dispatch(irq) {
                handled += 1;
            } else {
                warn!("plic: no handler installed for irq {irq}");
            }
            self.io.write32(claim, irq as u32);
        }
        self.line.enable();

        Ok(handled)
    }
}
