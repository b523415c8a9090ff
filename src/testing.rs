//! In-memory fake host stack
//!
//! `FakeStack` implements [`HostStack`] over arena maps instead of a
//! real bus. Builder methods assemble a descriptor tree with the same
//! shape the real stack produces (intrusive sibling links, count fields
//! kept in sync with the arrays), and per-operation failure injection
//! drives the error paths.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::any::Any;

use crate::error::errno;
use crate::stack::{
    BusNode, ConfigDescriptor, ConfigNode, DeviceDescriptor, DeviceNode, EndpointDescriptor,
    EndpointNode, HostStack, InterfaceDescriptor, InterfaceNode, RawAddr, Session, SettingNode,
};

/// A fake host stack over in-memory node arenas.
pub struct FakeStack {
    next_addr: u64,
    first_bus: Option<RawAddr>,
    last_bus: Option<RawAddr>,
    busses: BTreeMap<u64, BusNode>,
    devices: BTreeMap<u64, DeviceNode>,
    configs: BTreeMap<u64, ConfigNode>,
    interfaces: BTreeMap<u64, InterfaceNode>,
    settings: BTreeMap<u64, SettingNode>,
    endpoints: BTreeMap<u64, EndpointNode>,
    /// String descriptors by (device address, index)
    strings: BTreeMap<(u64, u8), String>,
    /// Open sessions, mapped to the device they were opened against
    sessions: BTreeMap<u32, u64>,
    next_session: u32,
    /// Take-once forced returns by operation name
    forced: BTreeMap<&'static str, i32>,
    /// Forced failure for every `open` call
    open_result: Option<i32>,
    kernel_driver: Option<String>,
}

impl FakeStack {
    pub fn new() -> Self {
        FakeStack {
            next_addr: 0x1000,
            first_bus: None,
            last_bus: None,
            busses: BTreeMap::new(),
            devices: BTreeMap::new(),
            configs: BTreeMap::new(),
            interfaces: BTreeMap::new(),
            settings: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            strings: BTreeMap::new(),
            sessions: BTreeMap::new(),
            next_session: 1,
            forced: BTreeMap::new(),
            open_result: None,
            kernel_driver: None,
        }
    }

    fn alloc(&mut self) -> RawAddr {
        let addr = self.next_addr;
        self.next_addr += 0x10;
        match RawAddr::new(addr) {
            Some(a) => a,
            // allocator starts at 0x1000 and only grows
            None => unreachable!(),
        }
    }

    // ------------------------------------------------------------------------
    // Tree builders
    // ------------------------------------------------------------------------

    /// Append a bus to the bus list.
    pub fn add_bus(&mut self, dirname: &str, location: u32) -> RawAddr {
        let addr = self.alloc();
        self.busses.insert(
            addr.get(),
            BusNode {
                dirname: dirname.to_string(),
                location,
                prev: self.last_bus,
                next: None,
                devices: None,
            },
        );
        if let Some(prev) = self.last_bus {
            if let Some(node) = self.busses.get_mut(&prev.get()) {
                node.next = Some(addr);
            }
        } else {
            self.first_bus = Some(addr);
        }
        self.last_bus = Some(addr);
        addr
    }

    /// Append a device to a bus's device list, in discovery order.
    pub fn add_device(
        &mut self,
        bus: RawAddr,
        filename: &str,
        devnum: u8,
        descriptor: DeviceDescriptor,
    ) -> RawAddr {
        let addr = self.alloc();
        // Tail of the bus's current device list.
        let mut tail = None;
        let mut cur = self.busses.get(&bus.get()).and_then(|b| b.devices);
        while let Some(d) = cur {
            tail = Some(d);
            cur = self.devices.get(&d.get()).and_then(|n| n.next);
        }
        self.devices.insert(
            addr.get(),
            DeviceNode {
                filename: filename.to_string(),
                devnum,
                bus,
                prev: tail,
                next: None,
                descriptor,
                configs: Vec::new(),
                children: Vec::new(),
            },
        );
        match tail {
            Some(t) => {
                if let Some(node) = self.devices.get_mut(&t.get()) {
                    node.next = Some(addr);
                }
            }
            None => {
                if let Some(node) = self.busses.get_mut(&bus.get()) {
                    node.devices = Some(addr);
                }
            }
        }
        addr
    }

    /// Attach `child` below `hub` in the port topology.
    pub fn add_child(&mut self, hub: RawAddr, child: RawAddr) {
        if let Some(node) = self.devices.get_mut(&hub.get()) {
            node.children.push(child);
        }
    }

    /// Add a configuration, bumping the device's configuration count.
    pub fn add_config(&mut self, device: RawAddr, descriptor: ConfigDescriptor) -> RawAddr {
        let addr = self.alloc();
        self.configs.insert(
            addr.get(),
            ConfigNode {
                descriptor,
                interfaces: Vec::new(),
            },
        );
        if let Some(node) = self.devices.get_mut(&device.get()) {
            node.configs.push(addr);
            node.descriptor.num_configurations = node.configs.len() as u8;
        }
        addr
    }

    /// Add an interface, bumping the configuration's interface count.
    pub fn add_interface(&mut self, config: RawAddr) -> RawAddr {
        let addr = self.alloc();
        self.interfaces.insert(
            addr.get(),
            InterfaceNode {
                altsettings: Vec::new(),
            },
        );
        if let Some(node) = self.configs.get_mut(&config.get()) {
            node.interfaces.push(addr);
            node.descriptor.num_interfaces = node.interfaces.len() as u8;
        }
        addr
    }

    /// Add an alternate setting to an interface.
    pub fn add_setting(&mut self, interface: RawAddr, descriptor: InterfaceDescriptor) -> RawAddr {
        let addr = self.alloc();
        self.settings.insert(
            addr.get(),
            SettingNode {
                descriptor,
                endpoints: Vec::new(),
            },
        );
        if let Some(node) = self.interfaces.get_mut(&interface.get()) {
            node.altsettings.push(addr);
        }
        addr
    }

    /// Add an endpoint, bumping the setting's endpoint count.
    pub fn add_endpoint(&mut self, setting: RawAddr, descriptor: EndpointDescriptor) -> RawAddr {
        let addr = self.alloc();
        self.endpoints.insert(addr.get(), EndpointNode { descriptor });
        if let Some(node) = self.settings.get_mut(&setting.get()) {
            node.endpoints.push(addr);
            node.descriptor.num_endpoints = node.endpoints.len() as u8;
        }
        addr
    }

    /// Populate a string descriptor on a device.
    pub fn set_string(&mut self, device: RawAddr, index: u8, value: &str) {
        self.strings.insert((device.get(), index), value.to_string());
    }

    // ------------------------------------------------------------------------
    // Failure injection and inspection
    // ------------------------------------------------------------------------

    /// Force the next call of `op` ("bulk_read", "reset", ...) to return
    /// `code`. Take-once: the call after that behaves normally.
    pub fn force_result(&mut self, op: &'static str, code: i32) {
        self.forced.insert(op, code);
    }

    /// Make every `open` call fail with `code` (a `-errno`).
    pub fn fail_open(&mut self, code: i32) {
        self.open_result = Some(code);
    }

    /// Report a bound kernel driver from `driver_name`.
    pub fn set_kernel_driver(&mut self, name: &str) {
        self.kernel_driver = Some(name.to_string());
    }

    /// Address of a device by bus dirname and device filename.
    pub fn device_addr(&self, bus: &str, filename: &str) -> Option<RawAddr> {
        let (bus_addr, _) = self
            .busses
            .iter()
            .find(|(_, node)| node.dirname == bus)?;
        self.devices
            .iter()
            .find(|(_, node)| node.bus.get() == *bus_addr && node.filename == filename)
            .and_then(|(addr, _)| RawAddr::new(*addr))
    }

    /// Number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn take_forced(&mut self, op: &'static str) -> Option<i32> {
        self.forced.remove(op)
    }

    /// `-EBADF` for a dead session, otherwise the forced result or `ok`.
    fn session_op(&mut self, op: &'static str, session: Session, ok: i32) -> i32 {
        if !self.sessions.contains_key(&session.0) {
            return -errno::EBADF;
        }
        if let Some(code) = self.take_forced(op) {
            return code;
        }
        ok
    }
}

impl Default for FakeStack {
    fn default() -> Self {
        FakeStack::new()
    }
}

impl HostStack for FakeStack {
    fn find_busses(&mut self) -> i32 {
        self.take_forced("find_busses").unwrap_or(0)
    }

    fn find_devices(&mut self) -> i32 {
        self.take_forced("find_devices").unwrap_or(0)
    }

    fn first_bus(&self) -> Option<RawAddr> {
        self.first_bus
    }

    fn bus_node(&self, addr: RawAddr) -> Option<&BusNode> {
        self.busses.get(&addr.get())
    }

    fn device_node(&self, addr: RawAddr) -> Option<&DeviceNode> {
        self.devices.get(&addr.get())
    }

    fn config_node(&self, addr: RawAddr) -> Option<&ConfigNode> {
        self.configs.get(&addr.get())
    }

    fn interface_node(&self, addr: RawAddr) -> Option<&InterfaceNode> {
        self.interfaces.get(&addr.get())
    }

    fn setting_node(&self, addr: RawAddr) -> Option<&SettingNode> {
        self.settings.get(&addr.get())
    }

    fn endpoint_node(&self, addr: RawAddr) -> Option<&EndpointNode> {
        self.endpoints.get(&addr.get())
    }

    fn open(&mut self, device: RawAddr) -> core::result::Result<Session, i32> {
        if let Some(code) = self.open_result {
            return Err(code);
        }
        if !self.devices.contains_key(&device.get()) {
            return Err(-errno::ENODEV);
        }
        let id = self.next_session;
        self.next_session += 1;
        self.sessions.insert(id, device.get());
        Ok(Session(id))
    }

    fn close(&mut self, session: Session) -> i32 {
        if let Some(code) = self.take_forced("close") {
            return code;
        }
        match self.sessions.remove(&session.0) {
            Some(_) => 0,
            None => -errno::EBADF,
        }
    }

    fn control_msg(
        &mut self,
        session: Session,
        _request_type: u8,
        _request: u8,
        _value: u16,
        _index: u16,
        buf: &mut [u8],
        _timeout_ms: u32,
    ) -> i32 {
        self.session_op("control_msg", session, buf.len() as i32)
    }

    fn bulk_write(&mut self, session: Session, _endpoint: u8, buf: &[u8], _timeout_ms: u32) -> i32 {
        self.session_op("bulk_write", session, buf.len() as i32)
    }

    fn bulk_read(
        &mut self,
        session: Session,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout_ms: u32,
    ) -> i32 {
        let ret = self.session_op("bulk_read", session, buf.len() as i32);
        if ret >= 0 {
            buf.fill(0);
        }
        ret
    }

    fn interrupt_write(
        &mut self,
        session: Session,
        _endpoint: u8,
        buf: &[u8],
        _timeout_ms: u32,
    ) -> i32 {
        self.session_op("interrupt_write", session, buf.len() as i32)
    }

    fn interrupt_read(
        &mut self,
        session: Session,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout_ms: u32,
    ) -> i32 {
        let ret = self.session_op("interrupt_read", session, buf.len() as i32);
        if ret >= 0 {
            buf.fill(0);
        }
        ret
    }

    fn get_descriptor(
        &mut self,
        session: Session,
        _desc_type: u8,
        _desc_index: u8,
        buf: &mut [u8],
    ) -> i32 {
        let ret = self.session_op("get_descriptor", session, buf.len() as i32);
        if ret >= 0 {
            buf.fill(0);
        }
        ret
    }

    fn get_descriptor_by_endpoint(
        &mut self,
        session: Session,
        _endpoint: u8,
        _desc_type: u8,
        _desc_index: u8,
        buf: &mut [u8],
    ) -> i32 {
        let ret = self.session_op("get_descriptor_by_endpoint", session, buf.len() as i32);
        if ret >= 0 {
            buf.fill(0);
        }
        ret
    }

    fn get_string(&mut self, session: Session, index: u8, _langid: u16, buf: &mut [u8]) -> i32 {
        self.get_string_simple(session, index, buf)
    }

    fn get_string_simple(&mut self, session: Session, index: u8, buf: &mut [u8]) -> i32 {
        let Some(device) = self.sessions.get(&session.0).copied() else {
            return -errno::EBADF;
        };
        if let Some(code) = self.take_forced("get_string_simple") {
            return code;
        }
        match self.strings.get(&(device, index)) {
            Some(s) => {
                let bytes = s.as_bytes();
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                n as i32
            }
            // Missing strings stall the request.
            None => -errno::EPIPE,
        }
    }

    fn set_configuration(&mut self, session: Session, _value: u8) -> i32 {
        self.session_op("set_configuration", session, 0)
    }

    fn set_altinterface(&mut self, session: Session, _alternate: u8) -> i32 {
        self.session_op("set_altinterface", session, 0)
    }

    fn clear_halt(&mut self, session: Session, _endpoint: u8) -> i32 {
        self.session_op("clear_halt", session, 0)
    }

    fn reset(&mut self, session: Session) -> i32 {
        self.session_op("reset", session, 0)
    }

    fn claim_interface(&mut self, session: Session, _interface: u8) -> i32 {
        self.session_op("claim_interface", session, 0)
    }

    fn release_interface(&mut self, session: Session, _interface: u8) -> i32 {
        self.session_op("release_interface", session, 0)
    }

    fn driver_name(&mut self, session: Session, _interface: u8, buf: &mut [u8]) -> i32 {
        if !self.sessions.contains_key(&session.0) {
            return -errno::EBADF;
        }
        match &self.kernel_driver {
            Some(name) => {
                let bytes = name.as_bytes();
                let n = bytes.len().min(buf.len().saturating_sub(1));
                buf[..n].copy_from_slice(&bytes[..n]);
                buf[n] = 0;
                0
            }
            None => -errno::ENOSYS,
        }
    }

    fn detach_kernel_driver(&mut self, session: Session, _interface: u8) -> i32 {
        if !self.sessions.contains_key(&session.0) {
            return -errno::EBADF;
        }
        match self.kernel_driver.take() {
            Some(_) => 0,
            None => -errno::ENOSYS,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One bus, one device with a single vendor-specific bulk
/// interface (IN 0x81, OUT 0x02). The shape most tests start from.
pub fn scenario_stack() -> FakeStack {
    let mut fake = FakeStack::new();
    let bus = fake.add_bus("001", 1);
    let dev = fake.add_device(
        bus,
        "001",
        1,
        DeviceDescriptor {
            usb_version: 0x0200,
            device_class: 0x00,
            max_packet_size0: 64,
            vendor_id: 0x1234,
            product_id: 0xabcd,
            device_version: 0x0100,
            manufacturer_index: 1,
            product_index: 2,
            serial_index: 3,
            ..Default::default()
        },
    );
    let config = fake.add_config(
        dev,
        ConfigDescriptor {
            configuration_value: 1,
            attributes: 0xa0,
            max_power: 50,
            ..Default::default()
        },
    );
    let iface = fake.add_interface(config);
    let setting = fake.add_setting(
        iface,
        InterfaceDescriptor {
            interface_number: 0,
            alternate_setting: 0,
            interface_class: 0xff,
            ..Default::default()
        },
    );
    fake.add_endpoint(
        setting,
        EndpointDescriptor {
            endpoint_address: 0x81,
            attributes: 0x02,
            max_packet_size: 512,
            interval: 0,
            ..Default::default()
        },
    );
    fake.add_endpoint(
        setting,
        EndpointDescriptor {
            endpoint_address: 0x02,
            attributes: 0x02,
            max_packet_size: 512,
            interval: 0,
            ..Default::default()
        },
    );
    fake
}

// ============================================================================
// Tests
// ============================================================================
