//! Identity registries and the revocation sweep
//!
//! One registry per wrapper kind maps a raw node address to the single
//! wrapper representing it. Wrapping the same address twice yields the
//! same wrapper, which is what makes reference equality and per-wrapper
//! caching sound. Registries only grow on access, so allocation is
//! bounded by the number of distinct nodes ever observed.
//!
//! Re-enumeration frees the stack-owned tree, so before either
//! enumeration call runs, [`Registries::revoke_all`] flips every
//! outstanding wrapper to the revoked state and clears all six maps in
//! one sweep. Wrappers are never deallocated by the sweep; external code
//! may still hold them, and every accessor reports the revoked state
//! instead of resolving a stale address. The sweep is allocation-free and
//! cannot fail.

use alloc::collections::BTreeMap;
use spin::Mutex;

use crate::bus::Bus;
use crate::config::Configuration;
use crate::device::Device;
use crate::endpoint::Endpoint;
use crate::error::{Error, ObjectKind, Result};
use crate::interface::{Interface, Setting};
use crate::stack::RawAddr;

/// Wrapper backing state: either live over a raw node (with the parent
/// captured at first wrap) or revoked.
pub(crate) enum State<P> {
    Live { addr: RawAddr, parent: P },
    Revoked,
}

/// The revocable core of a wrapper: its kind tag plus the tagged state.
pub(crate) struct Cell<P> {
    kind: ObjectKind,
    state: Mutex<State<P>>,
}

impl<P: Clone> Cell<P> {
    pub(crate) fn new(kind: ObjectKind, addr: RawAddr, parent: P) -> Self {
        Cell {
            kind,
            state: Mutex::new(State::Live { addr, parent }),
        }
    }

    /// Backing address, or the revoked error for this kind.
    pub(crate) fn addr(&self) -> Result<RawAddr> {
        match &*self.state.lock() {
            State::Live { addr, .. } => Ok(*addr),
            State::Revoked => Err(Error::Revoked(self.kind)),
        }
    }

    /// Parent captured at first wrap.
    pub(crate) fn parent(&self) -> Result<P> {
        match &*self.state.lock() {
            State::Live { parent, .. } => Ok(parent.clone()),
            State::Revoked => Err(Error::Revoked(self.kind)),
        }
    }

    pub(crate) fn revoked(&self) -> bool {
        matches!(&*self.state.lock(), State::Revoked)
    }

    pub(crate) fn revoke(&self) {
        *self.state.lock() = State::Revoked;
    }
}

/// Address-to-wrapper map for one wrapper kind.
pub(crate) struct Registry<T> {
    entries: Mutex<BTreeMap<u64, T>>,
}

impl<T: Clone> Registry<T> {
    pub(crate) fn new() -> Self {
        Registry {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Idempotent wrap: a null address is "no value", a known address
    /// returns the existing wrapper (first-wrap parent wins), a new
    /// address is constructed via `make` and registered.
    pub(crate) fn wrap(
        &self,
        addr: Option<RawAddr>,
        make: impl FnOnce(RawAddr) -> T,
    ) -> Option<T> {
        let addr = addr?;
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&addr.get()) {
            return Some(existing.clone());
        }
        let wrapper = make(addr);
        entries.insert(addr.get(), wrapper.clone());
        Some(wrapper)
    }

    /// Revoke every registered wrapper and clear the map. Returns the
    /// number of wrappers swept.
    pub(crate) fn revoke_all(&self, revoke: impl Fn(&T)) -> usize {
        let mut entries = self.entries.lock();
        let swept = entries.len();
        for wrapper in core::mem::take(&mut *entries).values() {
            revoke(wrapper);
        }
        swept
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// All six identity registries, swept together.
pub(crate) struct Registries {
    pub(crate) busses: Registry<Bus>,
    pub(crate) devices: Registry<Device>,
    pub(crate) configs: Registry<Configuration>,
    pub(crate) interfaces: Registry<Interface>,
    pub(crate) settings: Registry<Setting>,
    pub(crate) endpoints: Registry<Endpoint>,
}

impl Registries {
    pub(crate) fn new() -> Self {
        Registries {
            busses: Registry::new(),
            devices: Registry::new(),
            configs: Registry::new(),
            interfaces: Registry::new(),
            settings: Registry::new(),
            endpoints: Registry::new(),
        }
    }

    /// The stop-the-world point: revoke every live wrapper of every kind
    /// and clear all registries, so the next enumeration starts wrapping
    /// from a clean slate even if the stack reuses addresses.
    pub(crate) fn revoke_all(&self) {
        let mut swept = 0;
        swept += self.busses.revoke_all(|w| w.revoke());
        swept += self.devices.revoke_all(|w| w.revoke());
        swept += self.configs.revoke_all(|w| w.revoke());
        swept += self.interfaces.revoke_all(|w| w.revoke());
        swept += self.settings.revoke_all(|w| w.revoke());
        swept += self.endpoints.revoke_all(|w| w.revoke());
        if swept > 0 {
            log::debug!("usb: revoked {} wrappers before re-enumeration", swept);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;

    fn addr(v: u64) -> Option<RawAddr> {
        RawAddr::new(v)
    }

    #[test]
    fn test_wrap_is_idempotent() {
        let reg: Registry<Arc<u32>> = Registry::new();
        let a = reg.wrap(addr(0x10), |_| Arc::new(1)).expect("wrap");
        let b = reg.wrap(addr(0x10), |_| Arc::new(2)).expect("wrap");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b, 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_wrap_null_is_none() {
        let reg: Registry<Arc<u32>> = Registry::new();
        assert!(reg.wrap(addr(0), |_| Arc::new(1)).is_none());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn test_revoke_all_clears_and_counts() {
        let reg: Registry<Arc<u32>> = Registry::new();
        reg.wrap(addr(0x10), |_| Arc::new(1));
        reg.wrap(addr(0x20), |_| Arc::new(2));
        assert_eq!(reg.revoke_all(|_| ()), 2);
        assert_eq!(reg.len(), 0);
        // A reused address gets a fresh wrapper.
        let fresh = reg.wrap(addr(0x10), |_| Arc::new(3)).expect("wrap");
        assert_eq!(*fresh, 3);
    }

    #[test]
    fn test_cell_states() {
        let cell: Cell<()> = Cell::new(
            ObjectKind::Device,
            RawAddr::new(0x10).expect("non-zero"),
            (),
        );
        assert!(!cell.revoked());
        assert_eq!(cell.addr().expect("live").get(), 0x10);
        cell.revoke();
        assert!(cell.revoked());
        assert_eq!(cell.addr(), Err(Error::Revoked(ObjectKind::Device)));
        assert_eq!(cell.parent(), Err(Error::Revoked(ObjectKind::Device)));
    }
}
