//! Host-side USB topology discovery and device I/O.
//!
//! A [`Usb`] context sits on top of a [`HostStack`] implementation and
//! exposes the descriptor tree as canonical wrappers: [`Bus`],
//! [`Device`], [`Configuration`], [`Interface`], [`Setting`] and
//! [`Endpoint`]. Wrapping is idempotent, so the same underlying node
//! always yields the same wrapper and equality is reference equality.
//!
//! Re-enumeration ([`Usb::find_busses`] / [`Usb::find_devices`]) lets
//! the stack free and rebuild the tree, so it first revokes every
//! outstanding wrapper. Revoked wrappers stay referenceable; their
//! accessors fail with [`Error::Revoked`] instead of touching freed
//! nodes.
//!
//! Device I/O goes through [`DeviceHandle`] sessions obtained from
//! [`Device::open`] or the scoped [`Device::open_with`]; handle
//! validity is independent of wrapper revocation.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod bus;
mod class;
mod config;
mod device;
mod endpoint;
mod error;
mod handle;
mod interface;
mod registry;
mod stack;
pub mod testing;

pub use bus::Bus;
pub use class::class_string;
pub use config::{ConfigAttributes, Configuration};
pub use device::Device;
pub use endpoint::{Direction, Endpoint, SyncType, TransferType, UsageType};
pub use error::{errno, Error, ObjectKind, Result};
pub use handle::{AltSettingRef, ConfigValue, DeviceHandle, EndpointRef, InterfaceRef};
pub use interface::{Interface, Setting};
pub use stack::{
    BusNode, ConfigDescriptor, ConfigNode, DeviceDescriptor, DeviceNode, EndpointDescriptor,
    EndpointNode, HostStack, InterfaceDescriptor, InterfaceNode, RawAddr, Session, SettingNode,
};

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::check_usb_error;
use crate::registry::Registries;

/// Shared state behind every wrapper: the stack and the identity
/// registries.
pub(crate) struct Core {
    pub(crate) stack: Mutex<Box<dyn HostStack>>,
    pub(crate) registries: Registries,
}

/// The USB context. One per host stack.
pub struct Usb {
    core: Arc<Core>,
}

impl Usb {
    /// Initialize over a host stack and run the initial enumeration.
    pub fn new(stack: Box<dyn HostStack>) -> Result<Usb> {
        let usb = Usb {
            core: Arc::new(Core {
                stack: Mutex::new(stack),
                registries: Registries::new(),
            }),
        };
        usb.find_busses()?;
        usb.find_devices()?;
        Ok(usb)
    }

    /// Re-scan the busses. Revokes every outstanding wrapper first; the
    /// stack may free and rebuild any part of the tree. Returns the
    /// number of changes since the last scan.
    pub fn find_busses(&self) -> Result<u32> {
        self.core.registries.revoke_all();
        let ret = self.core.stack.lock().find_busses();
        Ok(check_usb_error("usb_find_busses", ret)? as u32)
    }

    /// Re-scan the devices on all busses. Same revocation contract as
    /// [`Usb::find_busses`].
    pub fn find_devices(&self) -> Result<u32> {
        self.core.registries.revoke_all();
        let ret = self.core.stack.lock().find_devices();
        Ok(check_usb_error("usb_find_devices", ret)? as u32)
    }

    /// Head of the bus list in discovery order.
    pub fn first_bus(&self) -> Option<Bus> {
        let head = self.core.stack.lock().first_bus();
        Bus::wrap(&self.core, head)
    }

    /// All busses, sorted by dirname for a deterministic view.
    pub fn busses(&self) -> Vec<Bus> {
        let mut found: Vec<(String, RawAddr)> = Vec::new();
        {
            let stack = self.core.stack.lock();
            let mut cur = stack.first_bus();
            while let Some(addr) = cur {
                let Some(node) = stack.bus_node(addr) else {
                    break;
                };
                found.push((node.dirname.clone(), addr));
                cur = node.next;
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
            .into_iter()
            .filter_map(|(_, addr)| Bus::wrap(&self.core, Some(addr)))
            .collect()
    }

    /// Find a bus by dirname.
    pub fn find_bus(&self, dirname: &str) -> Result<Option<Bus>> {
        for bus in self.busses() {
            if bus.dirname()? == dirname {
                return Ok(Some(bus));
            }
        }
        Ok(None)
    }

    /// All devices of all busses, each bus's devices sorted by
    /// filename. The snapshot is recomputed per call; a wrapper revoked
    /// mid-walk fails the whole call rather than yielding a partial
    /// view.
    pub fn devices(&self) -> Result<Vec<Device>> {
        let mut out = Vec::new();
        for bus in self.busses() {
            out.extend(bus.devices()?);
        }
        Ok(out)
    }

    /// All configurations of all devices.
    pub fn configurations(&self) -> Result<Vec<Configuration>> {
        let mut out = Vec::new();
        for dev in self.devices()? {
            out.extend(dev.configurations()?);
        }
        Ok(out)
    }

    /// All interfaces of all configurations.
    pub fn interfaces(&self) -> Result<Vec<Interface>> {
        let mut out = Vec::new();
        for config in self.configurations()? {
            out.extend(config.interfaces()?);
        }
        Ok(out)
    }

    /// All alternate settings of all interfaces.
    pub fn settings(&self) -> Result<Vec<Setting>> {
        let mut out = Vec::new();
        for interface in self.interfaces()? {
            out.extend(interface.settings()?);
        }
        Ok(out)
    }

    /// All endpoints of all settings.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let mut out = Vec::new();
        for setting in self.settings()? {
            out.extend(setting.endpoints()?);
        }
        Ok(out)
    }

    #[cfg(test)]
    pub(crate) fn open_session_count(&self) -> usize {
        let stack = self.core.stack.lock();
        stack
            .as_any()
            .downcast_ref::<testing::FakeStack>()
            .expect("test stack")
            .open_sessions()
    }
}

// ============================================================================
// Kind-erased wrappers
// ============================================================================

/// Any wrapper kind, for call sites that accept mixed topology objects.
/// Convert back with `TryFrom`; a mismatch reports both kinds.
#[derive(Clone, PartialEq, Eq)]
pub enum Object {
    Bus(Bus),
    Device(Device),
    Configuration(Configuration),
    Interface(Interface),
    Setting(Setting),
    Endpoint(Endpoint),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Bus(_) => ObjectKind::Bus,
            Object::Device(_) => ObjectKind::Device,
            Object::Configuration(_) => ObjectKind::Configuration,
            Object::Interface(_) => ObjectKind::Interface,
            Object::Setting(_) => ObjectKind::Setting,
            Object::Endpoint(_) => ObjectKind::Endpoint,
        }
    }

    pub fn revoked(&self) -> bool {
        match self {
            Object::Bus(o) => o.revoked(),
            Object::Device(o) => o.revoked(),
            Object::Configuration(o) => o.revoked(),
            Object::Interface(o) => o.revoked(),
            Object::Setting(o) => o.revoked(),
            Object::Endpoint(o) => o.revoked(),
        }
    }
}

macro_rules! object_variant {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for Object {
            fn from(o: $ty) -> Object {
                Object::$variant(o)
            }
        }

        impl TryFrom<Object> for $ty {
            type Error = Error;

            fn try_from(o: Object) -> Result<$ty> {
                match o {
                    Object::$variant(o) => Ok(o),
                    other => Err(Error::WrongType {
                        expected: ObjectKind::$variant,
                        found: other.kind(),
                    }),
                }
            }
        }
    };
}

object_variant!(Bus, Bus);
object_variant!(Device, Device);
object_variant!(Configuration, Configuration);
object_variant!(Interface, Interface);
object_variant!(Setting, Setting);
object_variant!(Endpoint, Endpoint);

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scenario_stack, FakeStack};

    #[test]
    fn test_topology_walk() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let busses = usb.busses();
        assert_eq!(busses.len(), 1);
        let devices = busses[0].devices().expect("live");
        assert_eq!(devices.len(), 1);
        let configs = devices[0].configurations().expect("live");
        assert_eq!(configs.len(), 1);
        let interfaces = configs[0].interfaces().expect("live");
        assert_eq!(interfaces.len(), 1);
        let settings = interfaces[0].settings().expect("live");
        assert_eq!(settings.len(), 1);
        let endpoints = settings[0].endpoints().expect("live");
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].direction().expect("live"), Direction::In);
        assert_eq!(endpoints[1].direction().expect("live"), Direction::Out);
    }

    #[test]
    fn test_wrapping_is_idempotent() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let a = usb.first_bus().expect("bus");
        let b = usb.first_bus().expect("bus");
        assert_eq!(a, b);
        let d1 = a.devices().expect("live").remove(0);
        let d2 = b.first_device().expect("live").expect("head");
        assert_eq!(d1, d2);
    }

    #[test]
    fn test_reenumeration_revokes_wrappers() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let bus = usb.first_bus().expect("bus");
        let dev = usb.devices().expect("live").remove(0);
        let ep = usb.endpoints().expect("live").remove(0);
        assert!(!bus.revoked());

        usb.find_devices().expect("rescan");

        assert!(bus.revoked());
        assert!(dev.revoked());
        assert!(ep.revoked());
        assert_eq!(bus.dirname(), Err(Error::Revoked(ObjectKind::Bus)));
        assert_eq!(dev.vendor_id(), Err(Error::Revoked(ObjectKind::Device)));
        assert_eq!(ep.address(), Err(Error::Revoked(ObjectKind::Endpoint)));

        // Fresh wrappers come from a clean registry even though the fake
        // reuses the same node addresses.
        let fresh = usb.first_bus().expect("bus");
        assert!(!fresh.revoked());
        assert!(fresh != bus);
    }

    #[test]
    fn test_find_busses_also_revokes() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let dev = usb.devices().expect("live").remove(0);
        usb.find_busses().expect("rescan");
        assert!(dev.revoked());
    }

    #[test]
    fn test_enumeration_failure_still_revokes() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let dev = usb.devices().expect("live").remove(0);
        usb.core
            .stack
            .lock()
            .as_any_mut()
            .downcast_mut::<FakeStack>()
            .expect("fake")
            .force_result("find_devices", -errno::EIO);
        assert_eq!(
            usb.find_devices(),
            Err(Error::Transfer {
                op: "usb_find_devices",
                errno: errno::EIO
            })
        );
        // Revocation happens before the stack call, so wrappers are
        // gone either way.
        assert!(dev.revoked());
    }

    #[test]
    fn test_busses_sorted_by_dirname() {
        let mut fake = FakeStack::new();
        fake.add_bus("003", 3);
        fake.add_bus("001", 1);
        fake.add_bus("002", 2);
        let usb = Usb::new(Box::new(fake)).expect("init");
        let names: Vec<_> = usb
            .busses()
            .iter()
            .map(|b| b.dirname().expect("live"))
            .collect();
        assert_eq!(names, ["001", "002", "003"]);
        // Discovery order is still reachable through the sibling links.
        assert_eq!(usb.first_bus().expect("head").dirname().expect("live"), "003");
    }

    #[test]
    fn test_find_bus() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        assert!(usb.find_bus("001").expect("live").is_some());
        assert!(usb.find_bus("009").expect("live").is_none());
    }

    #[test]
    fn test_object_round_trip_and_wrong_type() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let dev = usb.devices().expect("live").remove(0);
        let obj = Object::from(dev.clone());
        assert_eq!(obj.kind(), ObjectKind::Device);
        assert!(!obj.revoked());

        let back = Device::try_from(obj.clone()).expect("same kind");
        assert_eq!(back, dev);

        assert_eq!(
            Bus::try_from(obj),
            Err(Error::WrongType {
                expected: ObjectKind::Bus,
                found: ObjectKind::Device
            })
        );
    }
}
