//! Bus wrapper
//!
//! A `Bus` wraps one bus node of the stack-owned tree. Identity is
//! canonical (same node, same wrapper) and equality is reference
//! equality. All accessors fail with `Error::Revoked` once the backing
//! tree has been re-enumerated.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::device::Device;
use crate::error::{Error, ObjectKind, Result};
use crate::registry::Cell;
use crate::stack::{BusNode, RawAddr};
use crate::Core;

struct BusInner {
    core: Arc<Core>,
    cell: Cell<()>,
}

/// A USB bus. Cheaply cloneable; clones share identity.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub(crate) fn wrap(core: &Arc<Core>, addr: Option<RawAddr>) -> Option<Bus> {
        core.registries.busses.wrap(addr, |a| Bus {
            inner: Arc::new(BusInner {
                core: core.clone(),
                cell: Cell::new(ObjectKind::Bus, a, ()),
            }),
        })
    }

    pub(crate) fn revoke(&self) {
        self.inner.cell.revoke();
    }

    fn node<R>(&self, f: impl FnOnce(&BusNode) -> R) -> Result<R> {
        let addr = self.inner.cell.addr()?;
        let stack = self.inner.core.stack.lock();
        let node = stack.bus_node(addr).ok_or(Error::Revoked(ObjectKind::Bus))?;
        Ok(f(node))
    }

    /// True once re-enumeration has invalidated this wrapper.
    pub fn revoked(&self) -> bool {
        self.inner.cell.revoked()
    }

    /// Directory name of the bus ("001", ...). This is the stable sort
    /// key for bus listings.
    pub fn dirname(&self) -> Result<String> {
        self.node(|n| n.dirname.clone())
    }

    pub fn location(&self) -> Result<u32> {
        self.node(|n| n.location)
    }

    /// Previous bus in the stack's discovery-ordered list.
    pub fn prev(&self) -> Result<Option<Bus>> {
        let prev = self.node(|n| n.prev)?;
        Ok(Bus::wrap(&self.inner.core, prev))
    }

    /// Next bus in the stack's discovery-ordered list.
    pub fn next(&self) -> Result<Option<Bus>> {
        let next = self.node(|n| n.next)?;
        Ok(Bus::wrap(&self.inner.core, next))
    }

    /// Head of this bus's device list, in discovery order.
    pub fn first_device(&self) -> Result<Option<Device>> {
        let head = self.node(|n| n.devices)?;
        Ok(Device::wrap(&self.inner.core, head, self))
    }

    /// All devices on this bus, sorted by filename. Discovery order is
    /// enumeration-dependent, so consumers get a deterministic view.
    pub fn devices(&self) -> Result<Vec<Device>> {
        let addr = self.inner.cell.addr()?;
        let mut found: Vec<(String, RawAddr)> = Vec::new();
        {
            let stack = self.inner.core.stack.lock();
            let node = stack.bus_node(addr).ok_or(Error::Revoked(ObjectKind::Bus))?;
            let mut cur = node.devices;
            while let Some(daddr) = cur {
                let Some(dev) = stack.device_node(daddr) else {
                    break;
                };
                found.push((dev.filename.clone(), daddr));
                cur = dev.next;
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found
            .into_iter()
            .filter_map(|(_, a)| Device::wrap(&self.inner.core, Some(a), self))
            .collect())
    }

    /// Find a device on this bus by filename.
    pub fn find_device(&self, filename: &str) -> Result<Option<Device>> {
        for dev in self.devices()? {
            if dev.filename()? == filename {
                return Ok(Some(dev));
            }
        }
        Ok(None)
    }
}

impl PartialEq for Bus {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Bus {}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dirname() {
            Ok(name) => write!(f, "Bus {}", name),
            Err(_) => f.write_str("Bus (revoked)"),
        }
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::testing::scenario_stack;
    use crate::Usb;

    #[test]
    fn test_dirname_and_location() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let bus = usb.first_bus().expect("bus");
        assert_eq!(bus.dirname().expect("live"), "001");
        assert_eq!(bus.location().expect("live"), 1);
    }

    #[test]
    fn test_devices_sorted_by_filename() {
        let mut fake = crate::testing::FakeStack::new();
        let bus = fake.add_bus("001", 1);
        // Discovery order deliberately reversed.
        fake.add_device(bus, "003", 3, Default::default());
        fake.add_device(bus, "001", 1, Default::default());
        fake.add_device(bus, "002", 2, Default::default());

        let usb = Usb::new(Box::new(fake)).expect("init");
        let bus = usb.first_bus().expect("bus");
        let names: Vec<_> = bus
            .devices()
            .expect("live")
            .iter()
            .map(|d| d.filename().expect("live"))
            .collect();
        assert_eq!(names, ["001", "002", "003"]);
    }

    #[test]
    fn test_sibling_walk_matches_discovery_order() {
        let mut fake = crate::testing::FakeStack::new();
        let bus = fake.add_bus("001", 1);
        fake.add_device(bus, "003", 3, Default::default());
        fake.add_device(bus, "001", 1, Default::default());

        let usb = Usb::new(Box::new(fake)).expect("init");
        let bus = usb.first_bus().expect("bus");
        let first = bus.first_device().expect("live").expect("head");
        assert_eq!(first.filename().expect("live"), "003");
        let second = first.next().expect("live").expect("sibling");
        assert_eq!(second.filename().expect("live"), "001");
        assert_eq!(second.prev().expect("live").expect("back"), first);
        assert!(second.next().expect("live").is_none());
    }

    #[test]
    fn test_find_device() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let bus = usb.first_bus().expect("bus");
        assert!(bus.find_device("001").expect("live").is_some());
        assert!(bus.find_device("042").expect("live").is_none());
    }
}
