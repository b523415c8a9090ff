//! Device wrapper
//!
//! A `Device` wraps one device node. Beyond the descriptor accessors it
//! carries the per-wrapper cache for string descriptions (manufacturer,
//! product, serial number), which the revocation sweep drops together
//! with the backing address.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::bus::Bus;
use crate::class::class_string;
use crate::config::Configuration;
use crate::endpoint::Endpoint;
use crate::error::{Error, ObjectKind, Result};
use crate::handle::DeviceHandle;
use crate::interface::{Interface, Setting};
use crate::registry::Cell;
use crate::stack::{DeviceNode, RawAddr};
use crate::Core;

struct DeviceInner {
    core: Arc<Core>,
    cell: Cell<Bus>,
    /// String descriptions by string-descriptor index, fetched lazily
    /// through a scoped handle.
    strings: Mutex<BTreeMap<u8, String>>,
}

/// A USB device. Cheaply cloneable; clones share identity.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub(crate) fn wrap(core: &Arc<Core>, addr: Option<RawAddr>, parent: &Bus) -> Option<Device> {
        core.registries.devices.wrap(addr, |a| Device {
            inner: Arc::new(DeviceInner {
                core: core.clone(),
                cell: Cell::new(ObjectKind::Device, a, parent.clone()),
                strings: Mutex::new(BTreeMap::new()),
            }),
        })
    }

    pub(crate) fn revoke(&self) {
        self.inner.cell.revoke();
        self.inner.strings.lock().clear();
    }

    fn node<R>(&self, f: impl FnOnce(&DeviceNode) -> R) -> Result<R> {
        let addr = self.inner.cell.addr()?;
        let stack = self.inner.core.stack.lock();
        let node = stack
            .device_node(addr)
            .ok_or(Error::Revoked(ObjectKind::Device))?;
        Ok(f(node))
    }

    /// True once re-enumeration has invalidated this wrapper.
    pub fn revoked(&self) -> bool {
        self.inner.cell.revoked()
    }

    /// The bus this device lives on.
    pub fn bus(&self) -> Result<Bus> {
        self.inner.cell.parent()
    }

    /// File name within the bus directory ("001", ...). This is the
    /// stable sort key for device listings.
    pub fn filename(&self) -> Result<String> {
        self.node(|n| n.filename.clone())
    }

    pub fn devnum(&self) -> Result<u8> {
        self.node(|n| n.devnum)
    }

    /// Previous sibling in discovery order, on the same bus.
    pub fn prev(&self) -> Result<Option<Device>> {
        let bus = self.inner.cell.parent()?;
        let prev = self.node(|n| n.prev)?;
        Ok(Device::wrap(&self.inner.core, prev, &bus))
    }

    /// Next sibling in discovery order, on the same bus.
    pub fn next(&self) -> Result<Option<Device>> {
        let bus = self.inner.cell.parent()?;
        let next = self.node(|n| n.next)?;
        Ok(Device::wrap(&self.inner.core, next, &bus))
    }

    /// Number of devices attached below this device (hub ports).
    pub fn num_children(&self) -> Result<u8> {
        self.node(|n| n.children.len() as u8)
    }

    /// Devices attached below this device. Hub ports do not change bus
    /// membership, so children share this device's bus parent.
    pub fn children(&self) -> Result<Vec<Device>> {
        let bus = self.inner.cell.parent()?;
        let addrs = self.node(|n| n.children.clone())?;
        Ok(addrs
            .into_iter()
            .filter_map(|a| Device::wrap(&self.inner.core, Some(a), &bus))
            .collect())
    }

    // Descriptor fields.

    pub fn usb_version(&self) -> Result<u16> {
        self.node(|n| n.descriptor.usb_version)
    }

    pub fn device_class(&self) -> Result<u8> {
        self.node(|n| n.descriptor.device_class)
    }

    pub fn device_subclass(&self) -> Result<u8> {
        self.node(|n| n.descriptor.device_subclass)
    }

    pub fn device_protocol(&self) -> Result<u8> {
        self.node(|n| n.descriptor.device_protocol)
    }

    pub fn max_packet_size0(&self) -> Result<u8> {
        self.node(|n| n.descriptor.max_packet_size0)
    }

    pub fn vendor_id(&self) -> Result<u16> {
        self.node(|n| n.descriptor.vendor_id)
    }

    pub fn product_id(&self) -> Result<u16> {
        self.node(|n| n.descriptor.product_id)
    }

    pub fn device_version(&self) -> Result<u16> {
        self.node(|n| n.descriptor.device_version)
    }

    pub fn manufacturer_index(&self) -> Result<u8> {
        self.node(|n| n.descriptor.manufacturer_index)
    }

    pub fn product_index(&self) -> Result<u8> {
        self.node(|n| n.descriptor.product_index)
    }

    pub fn serial_index(&self) -> Result<u8> {
        self.node(|n| n.descriptor.serial_index)
    }

    pub fn num_configurations(&self) -> Result<u8> {
        self.node(|n| n.descriptor.num_configurations)
    }

    /// Human-readable name for this device's class triple.
    pub fn class_string(&self) -> Result<String> {
        self.node(|n| {
            class_string(
                n.descriptor.device_class,
                n.descriptor.device_subclass,
                n.descriptor.device_protocol,
            )
        })
    }

    /// The device's configurations, exactly `num_configurations` of
    /// them, each parented to this device.
    pub fn configurations(&self) -> Result<Vec<Configuration>> {
        let addrs = self.node(|n| {
            let count = n.descriptor.num_configurations as usize;
            n.configs.iter().take(count).copied().collect::<Vec<_>>()
        })?;
        Ok(addrs
            .into_iter()
            .filter_map(|a| Configuration::wrap(&self.inner.core, Some(a), self))
            .collect())
    }

    /// All interfaces of all configurations, recomputed on every call.
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

    /// Open a session against this device. The handle's validity is
    /// independent of this wrapper's revocation.
    pub fn open(&self) -> Result<DeviceHandle> {
        let addr = self.inner.cell.addr()?;
        let opened = self.inner.core.stack.lock().open(addr);
        match opened {
            Ok(session) => {
                log::debug!("usb: opened device {}", addr);
                Ok(DeviceHandle::new(self.inner.core.clone(), session))
            }
            Err(code) => Err(Error::OpenFailed { errno: -code }),
        }
    }

    /// Open, run `f`, and close on every exit path. This is the
    /// preferred way to use a handle; `open` is for callers managing the
    /// lifetime themselves.
    pub fn open_with<R>(&self, f: impl FnOnce(&DeviceHandle) -> Result<R>) -> Result<R> {
        let handle = self.open()?;
        match f(&handle) {
            Ok(value) => {
                handle.close()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(close_err) = handle.close() {
                    log::warn!("usb: close after failed operation: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Manufacturer string, fetched once through a scoped handle and
    /// cached on the wrapper. `Ok(None)` when the device has no such
    /// string.
    pub fn manufacturer(&self) -> Result<Option<String>> {
        let index = self.manufacturer_index()?;
        self.cached_string(index)
    }

    /// Product string; caching as for `manufacturer`.
    pub fn product(&self) -> Result<Option<String>> {
        let index = self.product_index()?;
        self.cached_string(index)
    }

    /// Serial-number string; caching as for `manufacturer`.
    pub fn serial_number(&self) -> Result<Option<String>> {
        let index = self.serial_index()?;
        self.cached_string(index)
    }

    fn cached_string(&self, index: u8) -> Result<Option<String>> {
        if index == 0 {
            return Ok(None);
        }
        if let Some(s) = self.inner.strings.lock().get(&index) {
            return Ok(Some(s.clone()));
        }
        let fetched = self.open_with(|h| h.get_string_simple(index))?;
        if let Some(s) = &fetched {
            self.inner.strings.lock().insert(index, s.clone());
        }
        Ok(fetched)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Device {}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = (|| -> Result<(String, String, u16, u16)> {
            let bus = self.bus()?.dirname()?;
            Ok((bus, self.filename()?, self.vendor_id()?, self.product_id()?))
        })();
        match summary {
            Ok((bus, file, vid, pid)) => {
                write!(f, "Device {}/{} {:04x}:{:04x}", bus, file, vid, pid)
            }
            Err(_) => f.write_str("Device (revoked)"),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::stack::DeviceDescriptor;
    use crate::testing::{scenario_stack, FakeStack};
    use crate::Usb;

    fn single_device() -> Usb {
        Usb::new(Box::new(scenario_stack())).expect("init")
    }

    #[test]
    fn test_descriptor_fields() {
        let usb = single_device();
        let dev = usb.devices().expect("live").remove(0);
        assert_eq!(dev.vendor_id().expect("live"), 0x1234);
        assert_eq!(dev.product_id().expect("live"), 0xabcd);
        assert_eq!(dev.num_configurations().expect("live"), 1);
        assert_eq!(dev.device_class().expect("live"), 0x00);
    }

    #[test]
    fn test_configurations_count_and_parent() {
        let usb = single_device();
        let dev = usb.devices().expect("live").remove(0);
        let configs = dev.configurations().expect("live");
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].device().expect("live"), dev);
    }

    #[test]
    fn test_children_share_bus_parent() {
        let mut fake = FakeStack::new();
        let bus = fake.add_bus("001", 1);
        let hub = fake.add_device(
            bus,
            "001",
            1,
            DeviceDescriptor {
                device_class: 0x09,
                ..Default::default()
            },
        );
        let leaf = fake.add_device(bus, "002", 2, Default::default());
        fake.add_child(hub, leaf);

        let usb = Usb::new(Box::new(fake)).expect("init");
        let bus = usb.first_bus().expect("bus");
        let hub = bus.find_device("001").expect("live").expect("hub");
        assert_eq!(hub.num_children().expect("live"), 1);
        let children = hub.children().expect("live");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].bus().expect("live"), bus);
        // Identity: the child is the same wrapper as the sibling view.
        let leaf = bus.find_device("002").expect("live").expect("leaf");
        assert_eq!(children[0], leaf);
    }

    #[test]
    fn test_flattened_collections() {
        let usb = single_device();
        let dev = usb.devices().expect("live").remove(0);
        assert_eq!(dev.interfaces().expect("live").len(), 1);
        assert_eq!(dev.settings().expect("live").len(), 1);
        assert_eq!(dev.endpoints().expect("live").len(), 2);
    }

    #[test]
    fn test_open_failure_carries_errno() {
        let mut fake = scenario_stack();
        fake.fail_open(-crate::errno::EACCES);
        let usb = Usb::new(Box::new(fake)).expect("init");
        let dev = usb.devices().expect("live").remove(0);
        assert_eq!(
            dev.open().err(),
            Some(Error::OpenFailed {
                errno: crate::errno::EACCES
            })
        );
    }

    #[test]
    fn test_open_with_closes_on_error() {
        let usb = single_device();
        let dev = usb.devices().expect("live").remove(0);
        let result: Result<(), Error> = dev.open_with(|_| {
            Err(Error::Transfer {
                op: "usb_bulk_read",
                errno: crate::errno::EPIPE,
            })
        });
        assert!(result.is_err());
        assert_eq!(usb.open_session_count(), 0);
    }

    #[test]
    fn test_string_fetch_and_cache() {
        let mut fake = scenario_stack();
        let dev_addr = fake.device_addr("001", "001").expect("device");
        fake.set_string(dev_addr, 1, "Acme");
        let usb = Usb::new(Box::new(fake)).expect("init");
        let dev = usb.devices().expect("live").remove(0);

        assert_eq!(dev.manufacturer().expect("fetch"), Some("Acme".into()));
        // Second call is served from the cache: no session is opened.
        assert_eq!(dev.manufacturer().expect("cache"), Some("Acme".into()));
        assert_eq!(usb.open_session_count(), 0);
        // Index 2 has no string on the device: routine absence.
        assert_eq!(dev.product().expect("fetch"), None);
    }

    #[test]
    fn test_class_string() {
        let mut fake = FakeStack::new();
        let bus = fake.add_bus("001", 1);
        fake.add_device(
            bus,
            "001",
            1,
            DeviceDescriptor {
                device_class: 0x09,
                device_subclass: 0x00,
                device_protocol: 0x01,
                ..Default::default()
            },
        );
        let usb = Usb::new(Box::new(fake)).expect("init");
        let dev = usb.devices().expect("live").remove(0);
        assert_eq!(dev.class_string().expect("live"), "Single TT Hub");
    }
}
