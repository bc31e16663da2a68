// Register maps for the C908 PLIC and the K230 peripheral DMA engine.

// --- PLIC ---

/// Number of interrupt sources the PLIC register map has room for.
/// Source 0 is reserved and never delivered.
pub const PLIC_NUM_SOURCES: usize = 1024;

/// Upper bound of hart contexts tracked by the driver.
pub const PLIC_MAX_HARTS: usize = 8;

/// Offset to the priority register of source 0.
/// Priority for source N is at: PLIC_PRIORITY_OFFSET + N * PLIC_PRIORITY_PER_ID
pub const PLIC_PRIORITY_OFFSET: usize = 0x000000;

/// Bytes per priority register.
pub const PLIC_PRIORITY_PER_ID: usize = 4;

/// Offset to the enable bits for context 0.
/// For context C, enable region starts at: PLIC_ENABLE_OFFSET + C * PLIC_ENABLE_STRIDE
pub const PLIC_ENABLE_OFFSET: usize = 0x002000;

/// Each context uses 32 words = 128 bytes = 0x80 of enable bits.
pub const PLIC_ENABLE_STRIDE: usize = 0x80;

/// Offset to the threshold & claim/complete block of context 0.
/// For context C, it starts at: PLIC_CONTEXT_CTRL_OFFSET + C * PLIC_CONTEXT_STRIDE
pub const PLIC_CONTEXT_CTRL_OFFSET: usize = 0x200000;

/// Context blocks are two 32-bit registers spaced by 4K.
pub const PLIC_CONTEXT_STRIDE: usize = 0x1000;

/// Priority threshold register, relative to the context block.
pub const PLIC_CONTEXT_THRESHOLD_OFFSET: usize = 0x00;

/// Claim/complete register, relative to the context block.
pub const PLIC_CONTEXT_CLAIM_COMPLETE_OFFSET: usize = 0x04;

/// Threshold that lets every priority above zero through.
pub const PLIC_THRESHOLD_ACCEPT_ALL: u32 = 0;

/// Threshold that masks every source for a context.
pub const PLIC_THRESHOLD_BLOCK_ALL: u32 = 0xFFFF_FFFF;

/// C908 PLIC physical base on K230.
pub const K230_PLIC_PHYS_BASE: usize = 0xF_0000_0000;

/// External interrupt sources wired on K230.
pub const K230_PLIC_NR_IRQS: usize = 208;

/// Contexts exposed by the C908 PLIC on K230 (M-mode and S-mode of hart 0).
pub const K230_PLIC_NR_CONTEXTS: usize = 2;

/// Contexts per hart: machine mode first, supervisor mode second.
pub const K230_PLIC_CONTEXTS_PER_HART: usize = 2;

// --- PDMA ---

/// Channels provided by the PDMA engine.
pub const PDMA_CH_MAX: usize = 8;

/// Channel enable bitmask, one bit per channel.
pub const PDMA_CH_EN: usize = 0x00;

/// Global interrupt mask; each event group is shifted by the channel index.
pub const PDMA_INT_MASK: usize = 0x04;

/// Global interrupt status, write-1-to-clear.
pub const PDMA_INT_STAT: usize = 0x08;

/// Start of the per-channel register blocks.
pub const PDMA_CH_REG_OFFSET: usize = 0x20;

/// Size of one channel register block.
pub const PDMA_CH_REG_STRIDE: usize = 0x20;

/// Channel control register, relative to the channel block.
pub const PDMA_CH_CTL: usize = 0x00;

/// Channel status register, relative to the channel block.
pub const PDMA_CH_STATUS: usize = 0x04;

/// Channel config register, relative to the channel block.
pub const PDMA_CH_CFG: usize = 0x08;

/// Descriptor chain start address, relative to the channel block.
pub const PDMA_CH_LLT_SADDR: usize = 0x0C;

/// Peripheral device select registers, one word per channel.
pub const PDMA_CH_PERI_DEV_SEL: usize = PDMA_CH_REG_OFFSET + PDMA_CH_MAX * PDMA_CH_REG_STRIDE;

pub const PDMA_CTL_START: u32 = 0x1;
pub const PDMA_CTL_STOP: u32 = 0x2;
pub const PDMA_CTL_RESUME: u32 = 0x4;

pub const PDMA_STATUS_BUSY: u32 = 0x1;
pub const PDMA_STATUS_PAUSE: u32 = 0x2;

/// Largest segment one descriptor can carry (30-bit length field).
pub const PDMA_MAX_LINE_SIZE: u32 = 0x3FFF_FFFF;

/// PDMA physical base on K230.
pub const K230_PDMA_PHYS_BASE: usize = 0x8080_4000;

/// PDMA register window size on K230.
pub const K230_PDMA_IO_SIZE: usize = 0x400;

/// Hardware lock slot reserved for the PDMA engine.
pub const K230_HARDLOCK_PDMA: usize = 6;

// --- Misc ---

pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Default number of polls before a spin-wait gives up.
pub const DEFAULT_MAX_SPINS: usize = 0x10_0000;
