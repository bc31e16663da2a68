//! Interrupt handler registration.

use axerrno::{ax_err, AxResult};
use log::warn;
use spin::RwLock;

/// A device driver's interrupt service routine.
///
/// The implementing object is what gets passed back on every interrupt,
/// so it carries whatever context the handler needs.
pub trait IrqHandler: Sync {
    fn handle(&self, irq: usize);
}

/// Lookup from interrupt ID to handler, consulted by the dispatch loop.
pub trait IrqHandlerTable {
    /// Runs the handler installed for `irq`. Returns false if there is none.
    fn dispatch(&self, irq: usize) -> bool;
}

type Slot = RwLock<Option<&'static dyn IrqHandler>>;

/// Fixed-size table of `N` handler slots indexed by interrupt ID.
///
/// Each slot is locked on its own. Dispatch never waits for a slot, so an
/// interrupt taken while the same hart installs a handler cannot hang.
pub struct IsrTable<const N: usize> {
    slots: [Slot; N],
}

impl<const N: usize> IsrTable<N> {
    const EMPTY: Slot = RwLock::new(None);

    pub const fn new() -> Self {
        Self {
            slots: [Self::EMPTY; N],
        }
    }

    /// Installs `handler` for `irq` and returns the one it replaces.
    pub fn install(
        &self,
        irq: usize,
        handler: &'static dyn IrqHandler,
    ) -> AxResult<Option<&'static dyn IrqHandler>> {
        if irq == 0 || irq >= N {
            return ax_err!(InvalidInput, "irq out of range");
        }
        Ok(self.slots[irq].write().replace(handler))
    }

    pub fn uninstall(&self, irq: usize) -> Option<&'static dyn IrqHandler> {
        self.slots.get(irq)?.write().take()
    }

    pub fn is_installed(&self, irq: usize) -> bool {
        self.slots.get(irq).is_some_and(|slot| slot.read().is_some())
    }
}

impl<const N: usize> Default for IsrTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> IrqHandlerTable for IsrTable<N> {
    fn dispatch(&self, irq: usize) -> bool {
        let Some(slot) = self.slots.get(irq) else {
            return false;
        };
        // Copy the handler out so it runs without the slot held.
        let handler = match slot.try_read() {
            Some(guard) => *guard,
            None => {
                warn!("irq {irq}: handler is being replaced, event dropped");
                return false;
            }
        };
        match handler {
            Some(handler) => {
                handler.handle(irq);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use axerrno::AxError;

    use super::*;

    struct Counter(AtomicUsize);

    impl IrqHandler for Counter {
        fn handle(&self, irq: usize) {
            self.0.fetch_add(irq, Ordering::SeqCst);
        }
    }

    fn leak_counter() -> &'static Counter {
        Box::leak(Box::new(Counter(AtomicUsize::new(0))))
    }

    #[test]
    fn dispatch_runs_installed_handler() {
        let table = IsrTable::<16>::new();
        let counter = leak_counter();
        assert!(table.install(3, counter).unwrap().is_none());
        assert!(table.dispatch(3));
        assert!(table.dispatch(3));
        assert_eq!(counter.0.load(Ordering::SeqCst), 6);
        assert!(!table.dispatch(4));
    }

    #[test]
    fn install_returns_previous() {
        let table = IsrTable::<16>::new();
        let first = leak_counter();
        let second = leak_counter();
        table.install(5, first).unwrap();
        assert!(table.install(5, second).unwrap().is_some());
        table.dispatch(5);
        assert_eq!(first.0.load(Ordering::SeqCst), 0);
        assert_eq!(second.0.load(Ordering::SeqCst), 5);
        assert!(table.uninstall(5).is_some());
        assert!(!table.is_installed(5));
    }

    #[test]
    fn dispatch_during_install_does_not_wait() {
        let table = IsrTable::<16>::new();
        let counter = leak_counter();
        table.install(7, counter).unwrap();
        table.install(8, counter).unwrap();

        // install of irq 7 in progress when its interrupt arrives
        let pending = table.slots[7].write();
        assert!(!table.dispatch(7));
        assert!(table.dispatch(8));
        drop(pending);

        assert!(table.dispatch(7));
        assert_eq!(counter.0.load(Ordering::SeqCst), 8 + 7);
    }

    struct Reinstall {
        table: &'static IsrTable<16>,
        hits: AtomicUsize,
    }

    impl IrqHandler for Reinstall {
        fn handle(&self, irq: usize) {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.table.uninstall(irq);
        }
    }

    #[test]
    fn handler_may_touch_its_own_slot() {
        let table: &'static IsrTable<16> = Box::leak(Box::new(IsrTable::new()));
        let handler: &'static Reinstall = Box::leak(Box::new(Reinstall {
            table,
            hits: AtomicUsize::new(0),
        }));
        table.install(4, handler).unwrap();
        assert!(table.dispatch(4));
        assert!(!table.is_installed(4));
        assert!(!table.dispatch(4));
        assert_eq!(handler.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn install_rejects_reserved_and_out_of_range() {
        let table = IsrTable::<16>::new();
        let counter = leak_counter();
        assert_eq!(table.install(0, counter).err(), Some(AxError::InvalidInput));
        assert_eq!(table.install(16, counter).err(), Some(AxError::InvalidInput));
        assert!(table.uninstall(99).is_none());
    }
}
