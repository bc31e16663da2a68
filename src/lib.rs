//! Interrupt routing and peripheral DMA for the Kendryte K230.
//!
//! [`Plic`] owns the C908 platform-level interrupt controller: priorities,
//! per-hart enable bitmaps and the claim/complete dispatch loop. [`Pdma`]
//! owns the peripheral DMA engine: channel control, hardware-locked shared
//! registers and the descriptor chains the engine walks on its own.
//!
//! Both are plain objects over the platform services in [`hal`] and
//! [`RegisterIo`]; the kernel decides where they live.

#![cfg_attr(not(test), no_std)]

mod consts;
mod hardlock;
mod irq;
mod plic;
mod utils;

pub mod hal;
pub mod pdma;

#[cfg(test)]
mod mock;

pub use consts::*;
pub use hardlock::{HardLockGuard, ScopedHardLock};
pub use irq::{IrqHandler, IrqHandlerTable, IsrTable};
pub use pdma::{
    ChannelCfg, DataEndian, DeviceHSize, Direction, Pdma, PdmaConfig, PdmaIrq, UsrPdmaCfg,
};
pub use plic::{Plic, PlicConfig};
pub use utils::{Mmio, RegisterIo, SpinPolicy};
