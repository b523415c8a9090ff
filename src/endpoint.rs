//! Endpoint wrapper
//!
//! The endpoint address byte encodes direction (bit 7) and endpoint
//! number (bits 3:0); the attributes byte encodes the transfer type
//! (bits 1:0) and, for isochronous endpoints, the synchronization
//! (bits 3:2) and usage (bits 5:4) sub-types.

use alloc::sync::Arc;
use core::fmt;

use crate::error::{Error, ObjectKind, Result};
use crate::interface::Setting;
use crate::registry::Cell;
use crate::stack::{EndpointNode, RawAddr};
use crate::Core;

/// Direction bit of the endpoint address (bit 7).
pub const ENDPOINT_DIR_MASK: u8 = 0x80;
/// Endpoint number bits of the endpoint address (bits 3:0).
pub const ENDPOINT_NUM_MASK: u8 = 0x0f;
/// Transfer-type bits of the attributes byte (bits 1:0).
pub const ENDPOINT_TYPE_MASK: u8 = 0x03;

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint direction, from bit 7 of the address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

/// Isochronous synchronization sub-type (attributes bits 3:2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    NoSync,
    Asynchronous,
    Adaptive,
    Synchronous,
}

/// Isochronous usage sub-type (attributes bits 5:4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageType {
    Data,
    Feedback,
    ImplicitFeedback,
    Reserved,
}

struct EndpointInner {
    core: Arc<Core>,
    cell: Cell<Setting>,
}

/// A USB endpoint. Cheaply cloneable; clones share identity.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl Endpoint {
    pub(crate) fn wrap(
        core: &Arc<Core>,
        addr: Option<RawAddr>,
        parent: &Setting,
    ) -> Option<Endpoint> {
        core.registries.endpoints.wrap(addr, |a| Endpoint {
            inner: Arc::new(EndpointInner {
                core: core.clone(),
                cell: Cell::new(ObjectKind::Endpoint, a, parent.clone()),
            }),
        })
    }

    pub(crate) fn revoke(&self) {
        self.inner.cell.revoke();
    }

    fn node<R>(&self, f: impl FnOnce(&EndpointNode) -> R) -> Result<R> {
        let addr = self.inner.cell.addr()?;
        let stack = self.inner.core.stack.lock();
        let node = stack
            .endpoint_node(addr)
            .ok_or(Error::Revoked(ObjectKind::Endpoint))?;
        Ok(f(node))
    }

    /// True once re-enumeration has invalidated this wrapper.
    pub fn revoked(&self) -> bool {
        self.inner.cell.revoked()
    }

    /// The alternate setting this endpoint belongs to.
    pub fn setting(&self) -> Result<Setting> {
        self.inner.cell.parent()
    }

    /// Raw endpoint address byte.
    pub fn address(&self) -> Result<u8> {
        self.node(|n| n.descriptor.endpoint_address)
    }

    /// Endpoint number (0-15).
    pub fn number(&self) -> Result<u8> {
        Ok(self.address()? & ENDPOINT_NUM_MASK)
    }

    /// Direction from bit 7 of the address.
    pub fn direction(&self) -> Result<Direction> {
        Ok(if self.address()? & ENDPOINT_DIR_MASK != 0 {
            Direction::In
        } else {
            Direction::Out
        })
    }

    /// Raw attributes byte.
    pub fn attributes(&self) -> Result<u8> {
        self.node(|n| n.descriptor.attributes)
    }

    pub fn transfer_type(&self) -> Result<TransferType> {
        Ok(match self.attributes()? & ENDPOINT_TYPE_MASK {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            3 => TransferType::Interrupt,
            _ => unreachable!(),
        })
    }

    /// Synchronization sub-type; meaningful for isochronous endpoints
    /// only.
    pub fn sync_type(&self) -> Result<SyncType> {
        Ok(match (self.attributes()? >> 2) & 0x03 {
            0 => SyncType::NoSync,
            1 => SyncType::Asynchronous,
            2 => SyncType::Adaptive,
            3 => SyncType::Synchronous,
            _ => unreachable!(),
        })
    }

    /// Usage sub-type; meaningful for isochronous endpoints only.
    pub fn usage_type(&self) -> Result<UsageType> {
        Ok(match (self.attributes()? >> 4) & 0x03 {
            0 => UsageType::Data,
            1 => UsageType::Feedback,
            2 => UsageType::ImplicitFeedback,
            3 => UsageType::Reserved,
            _ => unreachable!(),
        })
    }

    pub fn max_packet_size(&self) -> Result<u16> {
        self.node(|n| n.descriptor.max_packet_size)
    }

    /// Polling interval in frames.
    pub fn interval(&self) -> Result<u8> {
        self.node(|n| n.descriptor.interval)
    }

    /// Audio extension: feedback refresh rate.
    pub fn refresh(&self) -> Result<u8> {
        self.node(|n| n.descriptor.refresh)
    }

    /// Audio extension: synch endpoint address.
    pub fn synch_address(&self) -> Result<u8> {
        self.node(|n| n.descriptor.synch_address)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Endpoint {}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = (|| -> Result<(u8, Direction, TransferType)> {
            Ok((self.number()?, self.direction()?, self.transfer_type()?))
        })();
        match summary {
            Ok((num, dir, ty)) => {
                let dir = match dir {
                    Direction::In => "IN",
                    Direction::Out => "OUT",
                };
                write!(f, "Endpoint {} {} {:?}", num, dir, ty)
            }
            Err(_) => f.write_str("Endpoint (revoked)"),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::EndpointDescriptor;
    use crate::testing::{scenario_stack, FakeStack};
    use crate::Usb;

    #[test]
    fn test_direction_from_address_bit() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let endpoints = usb.endpoints().expect("live");
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].address().expect("live"), 0x81);
        assert_eq!(endpoints[0].direction().expect("live"), Direction::In);
        assert_eq!(endpoints[0].number().expect("live"), 1);
        assert_eq!(endpoints[1].address().expect("live"), 0x02);
        assert_eq!(endpoints[1].direction().expect("live"), Direction::Out);
        assert_eq!(endpoints[1].number().expect("live"), 2);
    }

    #[test]
    fn test_transfer_type_bits() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        for ep in usb.endpoints().expect("live") {
            assert_eq!(ep.transfer_type().expect("live"), TransferType::Bulk);
        }
    }

    #[test]
    fn test_iso_subtypes() {
        let mut fake = FakeStack::new();
        let bus = fake.add_bus("001", 1);
        let dev = fake.add_device(bus, "001", 1, Default::default());
        let config = fake.add_config(dev, Default::default());
        let iface = fake.add_interface(config);
        let setting = fake.add_setting(iface, Default::default());
        // Isochronous, asynchronous, feedback usage.
        fake.add_endpoint(
            setting,
            EndpointDescriptor {
                endpoint_address: 0x83,
                attributes: 0x01 | (0x01 << 2) | (0x01 << 4),
                max_packet_size: 192,
                interval: 1,
                ..Default::default()
            },
        );

        let usb = Usb::new(Box::new(fake)).expect("init");
        let ep = usb.endpoints().expect("live").remove(0);
        assert_eq!(ep.transfer_type().expect("live"), TransferType::Isochronous);
        assert_eq!(ep.sync_type().expect("live"), SyncType::Asynchronous);
        assert_eq!(ep.usage_type().expect("live"), UsageType::Feedback);
        assert_eq!(ep.max_packet_size().expect("live"), 192);
    }

    #[test]
    fn test_parent_chain_up_to_device() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let ep = usb.endpoints().expect("live").remove(0);
        let setting = ep.setting().expect("live");
        let iface = setting.interface().expect("live");
        let config = iface.configuration().expect("live");
        let device = config.device().expect("live");
        assert_eq!(device.filename().expect("live"), "001");
    }
}
