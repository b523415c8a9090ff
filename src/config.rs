//! Configuration wrapper

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::device::Device;
use crate::error::{Error, ObjectKind, Result};
use crate::interface::Interface;
use crate::registry::Cell;
use crate::stack::{ConfigNode, RawAddr};
use crate::Core;

bitflags! {
    /// Configuration `bmAttributes` bits. Bit 7 is reserved-set per the
    /// USB specification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigAttributes: u8 {
        const REMOTE_WAKEUP = 0x20;
        const SELF_POWERED = 0x40;
        const RESERVED_ONE = 0x80;
    }
}

struct ConfigurationInner {
    core: Arc<Core>,
    cell: Cell<Device>,
}

/// A device configuration. Cheaply cloneable; clones share identity.
#[derive(Clone)]
pub struct Configuration {
    inner: Arc<ConfigurationInner>,
}

impl Configuration {
    pub(crate) fn wrap(
        core: &Arc<Core>,
        addr: Option<RawAddr>,
        parent: &Device,
    ) -> Option<Configuration> {
        core.registries.configs.wrap(addr, |a| Configuration {
            inner: Arc::new(ConfigurationInner {
                core: core.clone(),
                cell: Cell::new(ObjectKind::Configuration, a, parent.clone()),
            }),
        })
    }

    pub(crate) fn revoke(&self) {
        self.inner.cell.revoke();
    }

    fn node<R>(&self, f: impl FnOnce(&ConfigNode) -> R) -> Result<R> {
        let addr = self.inner.cell.addr()?;
        let stack = self.inner.core.stack.lock();
        let node = stack
            .config_node(addr)
            .ok_or(Error::Revoked(ObjectKind::Configuration))?;
        Ok(f(node))
    }

    /// True once re-enumeration has invalidated this wrapper.
    pub fn revoked(&self) -> bool {
        self.inner.cell.revoked()
    }

    /// The device this configuration belongs to.
    pub fn device(&self) -> Result<Device> {
        self.inner.cell.parent()
    }

    /// The value passed to `set_configuration` to select this
    /// configuration.
    pub fn configuration_value(&self) -> Result<u8> {
        self.node(|n| n.descriptor.configuration_value)
    }

    /// String descriptor index for this configuration (0 = none).
    pub fn configuration_index(&self) -> Result<u8> {
        self.node(|n| n.descriptor.configuration_index)
    }

    /// Raw `bmAttributes` byte.
    pub fn attributes_raw(&self) -> Result<u8> {
        self.node(|n| n.descriptor.attributes)
    }

    /// Typed attribute bits.
    pub fn attributes(&self) -> Result<ConfigAttributes> {
        Ok(ConfigAttributes::from_bits_truncate(self.attributes_raw()?))
    }

    pub fn self_powered(&self) -> Result<bool> {
        Ok(self.attributes()?.contains(ConfigAttributes::SELF_POWERED))
    }

    pub fn remote_wakeup(&self) -> Result<bool> {
        Ok(self.attributes()?.contains(ConfigAttributes::REMOTE_WAKEUP))
    }

    /// Raw bus power field, in 2 mA units.
    pub fn max_power(&self) -> Result<u8> {
        self.node(|n| n.descriptor.max_power)
    }

    /// Bus power draw in milliamps.
    pub fn max_power_ma(&self) -> Result<u16> {
        Ok(self.max_power()? as u16 * 2)
    }

    pub fn num_interfaces(&self) -> Result<u8> {
        self.node(|n| n.descriptor.num_interfaces)
    }

    /// The configuration's interfaces, exactly `num_interfaces` of
    /// them, each parented to this configuration.
    pub fn interfaces(&self) -> Result<Vec<Interface>> {
        let addrs = self.node(|n| {
            let count = n.descriptor.num_interfaces as usize;
            n.interfaces.iter().take(count).copied().collect::<Vec<_>>()
        })?;
        Ok(addrs
            .into_iter()
            .filter_map(|a| Interface::wrap(&self.inner.core, Some(a), self))
            .collect())
    }
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Configuration {}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.configuration_value() {
            Ok(value) => write!(f, "Configuration {}", value),
            Err(_) => f.write_str("Configuration (revoked)"),
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// Tests
// ============================================================================
