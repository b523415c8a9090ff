//! Underlying host stack seam
//!
//! The USB host stack (enumeration, descriptor memory, and the blocking
//! transfer primitives) is an external collaborator behind the
//! [`HostStack`] trait. The stack owns the descriptor tree; this crate
//! only ever sees opaque node addresses and resolves them through the
//! trait. The tree is mutable out-of-band: a call to `find_busses` /
//! `find_devices` may free and rebuild any part of it, which is why the
//! layer above never stores a [`RawAddr`] outside its identity registries.
//!
//! Transfer primitives follow the C convention of the stacks they model:
//! a negative return is `-errno`, a non-negative return is the transfer
//! byte count (or a success indicator for state-changing calls). The
//! facade in `handle.rs` normalizes these into crate errors.

use alloc::string::String;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;
use core::num::NonZeroU64;

use crate::error::errno;

/// Opaque address of a node in the stack-owned descriptor tree.
///
/// Never dereferenced here; only passed back to the stack for resolution.
/// A null address is represented as `Option::None` throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RawAddr(NonZeroU64);

impl RawAddr {
    /// Wrap a non-zero raw address. Zero (the null node) yields `None`.
    pub const fn new(addr: u64) -> Option<Self> {
        match NonZeroU64::new(addr) {
            Some(n) => Some(RawAddr(n)),
            None => None,
        }
    }

    /// The numeric address, used as the identity-registry key.
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for RawAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// An open device session issued by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session(pub u32);

// ============================================================================
// Descriptor records (fixed-layout per the USB specification)
// ============================================================================

/// Device descriptor fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub usb_version: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_index: u8,
    pub num_configurations: u8,
}

/// Configuration descriptor fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDescriptor {
    pub num_interfaces: u8,
    pub configuration_value: u8,
    /// String descriptor index for this configuration (0 = none)
    pub configuration_index: u8,
    pub attributes: u8,
    /// Bus power draw in 2 mA units
    pub max_power: u8,
}

/// Interface (alternate setting) descriptor fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    /// String descriptor index for this setting (0 = none)
    pub interface_index: u8,
}

/// Endpoint descriptor fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Bit 7 is the direction, bits 3:0 the endpoint number
    pub endpoint_address: u8,
    /// Bits 1:0 transfer type; bits 3:2 sync type and 5:4 usage type
    /// for isochronous endpoints
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
    /// Audio extension: feedback refresh rate
    pub refresh: u8,
    /// Audio extension: synch endpoint address
    pub synch_address: u8,
}

// ============================================================================
// Raw tree nodes
// ============================================================================

/// A bus node. Busses form an intrusive doubly-linked list; each bus
/// heads an intrusive list of its devices.
#[derive(Debug, Clone)]
pub struct BusNode {
    /// Directory name of the bus ("001", ...)
    pub dirname: String,
    pub location: u32,
    pub prev: Option<RawAddr>,
    pub next: Option<RawAddr>,
    /// Head of this bus's device list
    pub devices: Option<RawAddr>,
}

/// A device node. Siblings are linked through `prev`/`next`; hub
/// topology is a separate fixed array of child device addresses.
#[derive(Debug, Clone)]
pub struct DeviceNode {
    /// File name of the device within its bus directory ("001", ...)
    pub filename: String,
    pub devnum: u8,
    /// Owning bus
    pub bus: RawAddr,
    pub prev: Option<RawAddr>,
    pub next: Option<RawAddr>,
    pub descriptor: DeviceDescriptor,
    /// Configuration array, sized by `descriptor.num_configurations`
    pub configs: Vec<RawAddr>,
    /// Devices attached below this device (hub ports)
    pub children: Vec<RawAddr>,
}

/// A configuration node
#[derive(Debug, Clone)]
pub struct ConfigNode {
    pub descriptor: ConfigDescriptor,
    /// Interface array, sized by `descriptor.num_interfaces`
    pub interfaces: Vec<RawAddr>,
}

/// An interface node: nothing but the collection of its alternate
/// settings.
#[derive(Debug, Clone)]
pub struct InterfaceNode {
    pub altsettings: Vec<RawAddr>,
}

/// An alternate-setting node
#[derive(Debug, Clone)]
pub struct SettingNode {
    pub descriptor: InterfaceDescriptor,
    /// Endpoint array, sized by `descriptor.num_endpoints`
    pub endpoints: Vec<RawAddr>,
}

/// An endpoint node
#[derive(Debug, Clone)]
pub struct EndpointNode {
    pub descriptor: EndpointDescriptor,
}

// ============================================================================
// Host stack trait
// ============================================================================

/// The underlying USB host stack.
///
/// Everything is synchronous and blocking; a transfer blocks the calling
/// thread for up to its timeout. There is exactly one implementation per
/// process in normal use, but the trait keeps the seam testable (see
/// `testing::FakeStack`).
pub trait HostStack: Send {
    /// Re-scan the busses. Returns the number of changes since the last
    /// scan, or `-errno`. Frees and rebuilds bus nodes, so the caller
    /// must revoke outstanding wrappers first.
    fn find_busses(&mut self) -> i32;

    /// Re-scan the devices on all busses. Same return and invalidation
    /// contract as [`HostStack::find_busses`].
    fn find_devices(&mut self) -> i32;

    /// Head of the bus list.
    fn first_bus(&self) -> Option<RawAddr>;

    // Node resolution. `None` means the address does not (or no longer
    // does) name a node of that kind.
    fn bus_node(&self, addr: RawAddr) -> Option<&BusNode>;
    fn device_node(&self, addr: RawAddr) -> Option<&DeviceNode>;
    fn config_node(&self, addr: RawAddr) -> Option<&ConfigNode>;
    fn interface_node(&self, addr: RawAddr) -> Option<&InterfaceNode>;
    fn setting_node(&self, addr: RawAddr) -> Option<&SettingNode>;
    fn endpoint_node(&self, addr: RawAddr) -> Option<&EndpointNode>;

    /// Open a session against a device. `Err` carries `-errno`.
    fn open(&mut self, device: RawAddr) -> core::result::Result<Session, i32>;

    /// Close a session. Returns 0 or `-errno`.
    fn close(&mut self, session: Session) -> i32;

    // Transfers. Timeouts are in milliseconds and enforced by the stack.
    fn control_msg(
        &mut self,
        session: Session,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> i32;
    fn bulk_write(&mut self, session: Session, endpoint: u8, buf: &[u8], timeout_ms: u32) -> i32;
    fn bulk_read(&mut self, session: Session, endpoint: u8, buf: &mut [u8], timeout_ms: u32)
        -> i32;
    fn interrupt_write(
        &mut self,
        session: Session,
        endpoint: u8,
        buf: &[u8],
        timeout_ms: u32,
    ) -> i32;
    fn interrupt_read(
        &mut self,
        session: Session,
        endpoint: u8,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> i32;

    // Descriptor and string fetches.
    fn get_descriptor(
        &mut self,
        session: Session,
        desc_type: u8,
        desc_index: u8,
        buf: &mut [u8],
    ) -> i32;
    fn get_descriptor_by_endpoint(
        &mut self,
        session: Session,
        endpoint: u8,
        desc_type: u8,
        desc_index: u8,
        buf: &mut [u8],
    ) -> i32;
    fn get_string(&mut self, session: Session, index: u8, langid: u16, buf: &mut [u8]) -> i32;
    /// String fetch in the device's default language, already converted
    /// to the stack's narrow encoding.
    fn get_string_simple(&mut self, session: Session, index: u8, buf: &mut [u8]) -> i32;

    // Device state.
    fn set_configuration(&mut self, session: Session, value: u8) -> i32;
    fn set_altinterface(&mut self, session: Session, alternate: u8) -> i32;
    fn clear_halt(&mut self, session: Session, endpoint: u8) -> i32;
    fn reset(&mut self, session: Session) -> i32;
    fn claim_interface(&mut self, session: Session, interface: u8) -> i32;
    fn release_interface(&mut self, session: Session, interface: u8) -> i32;

    /// Name of the kernel driver bound to an interface, written into
    /// `buf` NUL-terminated. Platform-conditional; stacks without the
    /// facility keep the default.
    fn driver_name(&mut self, _session: Session, _interface: u8, _buf: &mut [u8]) -> i32 {
        -errno::ENOSYS
    }

    /// Detach the kernel driver bound to an interface.
    /// Platform-conditional like [`HostStack::driver_name`].
    fn detach_kernel_driver(&mut self, _session: Session, _interface: u8) -> i32 {
        -errno::ENOSYS
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ============================================================================
// Tests
// ============================================================================
