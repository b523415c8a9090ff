//! Interface and alternate-setting wrappers
//!
//! An `Interface` is only a collection point: it owns nothing but its
//! alternate settings. The descriptor fields (class triple, endpoint
//! count, string index) live on the `Setting`.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::class::class_string;
use crate::config::Configuration;
use crate::endpoint::Endpoint;
use crate::error::{Error, ObjectKind, Result};
use crate::registry::Cell;
use crate::stack::{InterfaceNode, RawAddr, SettingNode};
use crate::Core;

struct InterfaceInner {
    core: Arc<Core>,
    cell: Cell<Configuration>,
}

/// A USB interface: the collection of its alternate settings.
#[derive(Clone)]
pub struct Interface {
    inner: Arc<InterfaceInner>,
}

impl Interface {
    pub(crate) fn wrap(
        core: &Arc<Core>,
        addr: Option<RawAddr>,
        parent: &Configuration,
    ) -> Option<Interface> {
        core.registries.interfaces.wrap(addr, |a| Interface {
            inner: Arc::new(InterfaceInner {
                core: core.clone(),
                cell: Cell::new(ObjectKind::Interface, a, parent.clone()),
            }),
        })
    }

    pub(crate) fn revoke(&self) {
        self.inner.cell.revoke();
    }

    fn node<R>(&self, f: impl FnOnce(&InterfaceNode) -> R) -> Result<R> {
        let addr = self.inner.cell.addr()?;
        let stack = self.inner.core.stack.lock();
        let node = stack
            .interface_node(addr)
            .ok_or(Error::Revoked(ObjectKind::Interface))?;
        Ok(f(node))
    }

    /// True once re-enumeration has invalidated this wrapper.
    pub fn revoked(&self) -> bool {
        self.inner.cell.revoked()
    }

    /// The configuration this interface belongs to.
    pub fn configuration(&self) -> Result<Configuration> {
        self.inner.cell.parent()
    }

    pub fn num_altsetting(&self) -> Result<u8> {
        self.node(|n| n.altsettings.len() as u8)
    }

    /// The alternate settings, indexed exactly `[0, num_altsetting)`,
    /// each parented to this interface.
    pub fn settings(&self) -> Result<Vec<Setting>> {
        let addrs = self.node(|n| n.altsettings.clone())?;
        Ok(addrs
            .into_iter()
            .filter_map(|a| Setting::wrap(&self.inner.core, Some(a), self))
            .collect())
    }
}

impl PartialEq for Interface {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Interface {}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.num_altsetting() {
            Ok(n) => write!(f, "Interface ({} settings)", n),
            Err(_) => f.write_str("Interface (revoked)"),
        }
    }
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

struct SettingInner {
    core: Arc<Core>,
    cell: Cell<Interface>,
}

/// One alternate setting of an interface.
#[derive(Clone)]
pub struct Setting {
    inner: Arc<SettingInner>,
}

impl Setting {
    pub(crate) fn wrap(
        core: &Arc<Core>,
        addr: Option<RawAddr>,
        parent: &Interface,
    ) -> Option<Setting> {
        core.registries.settings.wrap(addr, |a| Setting {
            inner: Arc::new(SettingInner {
                core: core.clone(),
                cell: Cell::new(ObjectKind::Setting, a, parent.clone()),
            }),
        })
    }

    pub(crate) fn revoke(&self) {
        self.inner.cell.revoke();
    }

    fn node<R>(&self, f: impl FnOnce(&SettingNode) -> R) -> Result<R> {
        let addr = self.inner.cell.addr()?;
        let stack = self.inner.core.stack.lock();
        let node = stack
            .setting_node(addr)
            .ok_or(Error::Revoked(ObjectKind::Setting))?;
        Ok(f(node))
    }

    /// True once re-enumeration has invalidated this wrapper.
    pub fn revoked(&self) -> bool {
        self.inner.cell.revoked()
    }

    /// The interface this setting belongs to.
    pub fn interface(&self) -> Result<Interface> {
        self.inner.cell.parent()
    }

    pub fn interface_number(&self) -> Result<u8> {
        self.node(|n| n.descriptor.interface_number)
    }

    pub fn alternate_setting(&self) -> Result<u8> {
        self.node(|n| n.descriptor.alternate_setting)
    }

    pub fn num_endpoints(&self) -> Result<u8> {
        self.node(|n| n.descriptor.num_endpoints)
    }

    pub fn interface_class(&self) -> Result<u8> {
        self.node(|n| n.descriptor.interface_class)
    }

    pub fn interface_subclass(&self) -> Result<u8> {
        self.node(|n| n.descriptor.interface_subclass)
    }

    pub fn interface_protocol(&self) -> Result<u8> {
        self.node(|n| n.descriptor.interface_protocol)
    }

    /// String descriptor index for this setting (0 = none).
    pub fn interface_index(&self) -> Result<u8> {
        self.node(|n| n.descriptor.interface_index)
    }

    /// Human-readable name for this setting's class triple.
    pub fn class_string(&self) -> Result<String> {
        self.node(|n| {
            class_string(
                n.descriptor.interface_class,
                n.descriptor.interface_subclass,
                n.descriptor.interface_protocol,
            )
        })
    }

    /// The setting's endpoints, exactly `num_endpoints` of them, each
    /// parented to this setting.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let addrs = self.node(|n| {
            let count = n.descriptor.num_endpoints as usize;
            n.endpoints.iter().take(count).copied().collect::<Vec<_>>()
        })?;
        Ok(addrs
            .into_iter()
            .filter_map(|a| Endpoint::wrap(&self.inner.core, Some(a), self))
            .collect())
    }
}

impl PartialEq for Setting {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Setting {}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = (|| -> Result<(u8, u8)> {
            Ok((self.interface_number()?, self.alternate_setting()?))
        })();
        match summary {
            Ok((iface, alt)) => write!(f, "Setting {}.{}", iface, alt),
            Err(_) => f.write_str("Setting (revoked)"),
        }
    }
}

impl fmt::Debug for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// Tests
// ============================================================================
