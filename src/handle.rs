//! Open device session and transfer facade
//!
//! A `DeviceHandle` owns one session issued by the stack. Its validity
//! is independent of wrapper revocation: re-enumeration revokes the
//! topology wrappers but an open handle keeps working until closed.
//! Close is explicit; `Drop` is only a backstop that releases a leaked
//! session and logs.
//!
//! State and transfer primitives return the C convention from the stack
//! (negative is `-errno`); everything here normalizes that through
//! `check_usb_error` into crate errors carrying the operation name.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::Configuration;
use crate::endpoint::Endpoint;
use crate::error::{check_usb_error, errno, Error, Result};
use crate::interface::Setting;
use crate::stack::{HostStack, Session};
use crate::Core;

/// Buffer size for string-descriptor fetches.
const STRING_BUF_LEN: usize = 1024;
/// Buffer size for kernel driver name fetches.
const DRIVER_NAME_LEN: usize = 64;

// ============================================================================
// Call-site selectors
// ============================================================================

/// Selects a configuration for `set_configuration`: either a raw
/// `bConfigurationValue` or a [`Configuration`] wrapper it is read from.
pub enum ConfigValue {
    Value(u8),
    Config(Configuration),
}

impl ConfigValue {
    fn resolve(self) -> Result<u8> {
        match self {
            ConfigValue::Value(v) => Ok(v),
            ConfigValue::Config(c) => c.configuration_value(),
        }
    }
}

impl From<u8> for ConfigValue {
    fn from(v: u8) -> Self {
        ConfigValue::Value(v)
    }
}

impl From<Configuration> for ConfigValue {
    fn from(c: Configuration) -> Self {
        ConfigValue::Config(c)
    }
}

impl From<&Configuration> for ConfigValue {
    fn from(c: &Configuration) -> Self {
        ConfigValue::Config(c.clone())
    }
}

/// Selects an interface by number, or by a [`Setting`] wrapper whose
/// interface number is read at call time.
pub enum InterfaceRef {
    Number(u8),
    Setting(Setting),
}

impl InterfaceRef {
    fn resolve(self) -> Result<u8> {
        match self {
            InterfaceRef::Number(n) => Ok(n),
            InterfaceRef::Setting(s) => s.interface_number(),
        }
    }
}

impl From<u8> for InterfaceRef {
    fn from(n: u8) -> Self {
        InterfaceRef::Number(n)
    }
}

impl From<Setting> for InterfaceRef {
    fn from(s: Setting) -> Self {
        InterfaceRef::Setting(s)
    }
}

impl From<&Setting> for InterfaceRef {
    fn from(s: &Setting) -> Self {
        InterfaceRef::Setting(s.clone())
    }
}

/// Selects an alternate setting by value or by a [`Setting`] wrapper.
pub enum AltSettingRef {
    Number(u8),
    Setting(Setting),
}

impl AltSettingRef {
    fn resolve(self) -> Result<u8> {
        match self {
            AltSettingRef::Number(n) => Ok(n),
            AltSettingRef::Setting(s) => s.alternate_setting(),
        }
    }
}

impl From<u8> for AltSettingRef {
    fn from(n: u8) -> Self {
        AltSettingRef::Number(n)
    }
}

impl From<Setting> for AltSettingRef {
    fn from(s: Setting) -> Self {
        AltSettingRef::Setting(s)
    }
}

impl From<&Setting> for AltSettingRef {
    fn from(s: &Setting) -> Self {
        AltSettingRef::Setting(s.clone())
    }
}

/// Selects an endpoint by raw address byte or by an [`Endpoint`]
/// wrapper.
pub enum EndpointRef {
    Address(u8),
    Endpoint(Endpoint),
}

impl EndpointRef {
    fn resolve(self) -> Result<u8> {
        match self {
            EndpointRef::Address(a) => Ok(a),
            EndpointRef::Endpoint(e) => e.address(),
        }
    }
}

impl From<u8> for EndpointRef {
    fn from(a: u8) -> Self {
        EndpointRef::Address(a)
    }
}

impl From<Endpoint> for EndpointRef {
    fn from(e: Endpoint) -> Self {
        EndpointRef::Endpoint(e)
    }
}

impl From<&Endpoint> for EndpointRef {
    fn from(e: &Endpoint) -> Self {
        EndpointRef::Endpoint(e.clone())
    }
}

// ============================================================================
// Handle
// ============================================================================

/// An open session against one device.
pub struct DeviceHandle {
    core: Arc<Core>,
    session: Mutex<Option<Session>>,
    /// Codes from `get_string_simple` treated as "this device has no
    /// such string" rather than a transfer failure.
    no_string: Mutex<Vec<i32>>,
}

impl DeviceHandle {
    pub(crate) fn new(core: Arc<Core>, session: Session) -> Self {
        DeviceHandle {
            core,
            session: Mutex::new(Some(session)),
            no_string: Mutex::new(vec![errno::EPIPE, errno::EACCES, errno::EOVERFLOW]),
        }
    }

    fn session(&self) -> Result<Session> {
        self.session.lock().ok_or(Error::ClosedHandle)
    }

    /// Run one stack primitive against the open session, normalizing
    /// its return. Byte counts come back as `usize`.
    fn io(&self, op: &'static str, f: impl FnOnce(&mut dyn HostStack, Session) -> i32) -> Result<usize> {
        let session = self.session()?;
        let ret = {
            let mut stack = self.core.stack.lock();
            f(&mut **stack, session)
        };
        Ok(check_usb_error(op, ret)? as usize)
    }

    /// Close the session. A second close is an error, not a no-op.
    /// The handle only transitions to closed on success; after a failed
    /// close the session stays held, so the caller (or `Drop`) can
    /// retry.
    pub fn close(&self) -> Result<()> {
        let mut slot = self.session.lock();
        let session = slot.take().ok_or(Error::AlreadyClosed)?;
        let ret = self.core.stack.lock().close(session);
        if ret < 0 {
            *slot = Some(session);
        }
        check_usb_error("usb_close", ret)?;
        Ok(())
    }

    /// True once the handle has been closed.
    pub fn closed(&self) -> bool {
        self.session.lock().is_none()
    }

    /// Replace the set of codes `get_string_simple` maps to
    /// `Ok(None)`.
    pub fn set_no_string_codes(&self, codes: &[i32]) {
        *self.no_string.lock() = codes.to_vec();
    }

    // ------------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------------

    /// Control transfer. `buf` is written for device-to-host requests
    /// and read for host-to-device requests; returns the byte count.
    pub fn control_msg(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize> {
        self.io("usb_control_msg", |stack, session| {
            stack.control_msg(session, request_type, request, value, index, buf, timeout_ms)
        })
    }

    pub fn bulk_write(
        &self,
        endpoint: impl Into<EndpointRef>,
        buf: &[u8],
        timeout_ms: u32,
    ) -> Result<usize> {
        let ep = endpoint.into().resolve()?;
        self.io("usb_bulk_write", |stack, session| {
            stack.bulk_write(session, ep, buf, timeout_ms)
        })
    }

    pub fn bulk_read(
        &self,
        endpoint: impl Into<EndpointRef>,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize> {
        let ep = endpoint.into().resolve()?;
        self.io("usb_bulk_read", |stack, session| {
            stack.bulk_read(session, ep, buf, timeout_ms)
        })
    }

    pub fn interrupt_write(
        &self,
        endpoint: impl Into<EndpointRef>,
        buf: &[u8],
        timeout_ms: u32,
    ) -> Result<usize> {
        let ep = endpoint.into().resolve()?;
        self.io("usb_interrupt_write", |stack, session| {
            stack.interrupt_write(session, ep, buf, timeout_ms)
        })
    }

    pub fn interrupt_read(
        &self,
        endpoint: impl Into<EndpointRef>,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize> {
        let ep = endpoint.into().resolve()?;
        self.io("usb_interrupt_read", |stack, session| {
            stack.interrupt_read(session, ep, buf, timeout_ms)
        })
    }

    // ------------------------------------------------------------------------
    // Descriptors and strings
    // ------------------------------------------------------------------------

    pub fn get_descriptor(&self, desc_type: u8, desc_index: u8, buf: &mut [u8]) -> Result<usize> {
        self.io("usb_get_descriptor", |stack, session| {
            stack.get_descriptor(session, desc_type, desc_index, buf)
        })
    }

    pub fn get_descriptor_by_endpoint(
        &self,
        endpoint: impl Into<EndpointRef>,
        desc_type: u8,
        desc_index: u8,
        buf: &mut [u8],
    ) -> Result<usize> {
        let ep = endpoint.into().resolve()?;
        self.io("usb_get_descriptor_by_endpoint", |stack, session| {
            stack.get_descriptor_by_endpoint(session, ep, desc_type, desc_index, buf)
        })
    }

    /// Raw string descriptor fetch in the given language.
    pub fn get_string(&self, index: u8, langid: u16, buf: &mut [u8]) -> Result<usize> {
        self.io("usb_get_string", |stack, session| {
            stack.get_string(session, index, langid, buf)
        })
    }

    /// String fetch in the device's default language. `Ok(None)` when
    /// the stack reports one of the no-string codes; devices routinely
    /// stall string requests for indices they do not populate.
    pub fn get_string_simple(&self, index: u8) -> Result<Option<String>> {
        let session = self.session()?;
        let mut buf = [0u8; STRING_BUF_LEN];
        let ret = self
            .core
            .stack
            .lock()
            .get_string_simple(session, index, &mut buf);
        if ret < 0 && self.no_string.lock().contains(&-ret) {
            return Ok(None);
        }
        let len = check_usb_error("usb_get_string_simple", ret)? as usize;
        // Buggy firmware pads with NULs; strip them all, not just a
        // terminator.
        let bytes: Vec<u8> = buf[..len.min(STRING_BUF_LEN)]
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .collect();
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    // ------------------------------------------------------------------------
    // Device state
    // ------------------------------------------------------------------------

    pub fn set_configuration(&self, config: impl Into<ConfigValue>) -> Result<()> {
        let value = config.into().resolve()?;
        self.io("usb_set_configuration", |stack, session| {
            stack.set_configuration(session, value)
        })?;
        Ok(())
    }

    pub fn set_altinterface(&self, alternate: impl Into<AltSettingRef>) -> Result<()> {
        let alt = alternate.into().resolve()?;
        self.io("usb_set_altinterface", |stack, session| {
            stack.set_altinterface(session, alt)
        })?;
        Ok(())
    }

    /// Clear a halt (stall) condition on an endpoint.
    pub fn clear_halt(&self, endpoint: impl Into<EndpointRef>) -> Result<()> {
        let ep = endpoint.into().resolve()?;
        self.io("usb_clear_halt", |stack, session| {
            stack.clear_halt(session, ep)
        })?;
        Ok(())
    }

    /// Port-level reset. The device re-enumerates afterwards, so the
    /// handle and all wrappers for it are best discarded.
    pub fn reset(&self) -> Result<()> {
        self.io("usb_reset", |stack, session| stack.reset(session))?;
        Ok(())
    }

    pub fn claim_interface(&self, interface: impl Into<InterfaceRef>) -> Result<()> {
        let iface = interface.into().resolve()?;
        self.io("usb_claim_interface", |stack, session| {
            stack.claim_interface(session, iface)
        })?;
        Ok(())
    }

    pub fn release_interface(&self, interface: impl Into<InterfaceRef>) -> Result<()> {
        let iface = interface.into().resolve()?;
        self.io("usb_release_interface", |stack, session| {
            stack.release_interface(session, iface)
        })?;
        Ok(())
    }

    /// Name of the kernel driver bound to an interface.
    /// Platform-conditional; stacks without the facility report ENOSYS.
    pub fn driver_name(&self, interface: impl Into<InterfaceRef>) -> Result<String> {
        let iface = interface.into().resolve()?;
        let session = self.session()?;
        let mut buf = [0u8; DRIVER_NAME_LEN];
        let ret = self
            .core
            .stack
            .lock()
            .driver_name(session, iface, &mut buf);
        check_usb_error("usb_get_driver_np", ret)?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    /// Detach the kernel driver bound to an interface so it can be
    /// claimed. Platform-conditional like [`DeviceHandle::driver_name`].
    pub fn detach_kernel_driver(&self, interface: impl Into<InterfaceRef>) -> Result<()> {
        let iface = interface.into().resolve()?;
        self.io("usb_detach_kernel_driver_np", |stack, session| {
            stack.detach_kernel_driver(session, iface)
        })?;
        Ok(())
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().take() {
            let ret = self.core.stack.lock().close(session);
            if ret < 0 {
                log::warn!("usb: close of leaked handle failed: {}", errno::describe(-ret));
            } else {
                log::debug!("usb: closed leaked handle");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scenario_stack;
    use crate::Usb;

    fn open_handle(usb: &Usb) -> DeviceHandle {
        usb.devices().expect("live").remove(0).open().expect("open")
    }

    #[test]
    fn test_double_close() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let handle = open_handle(&usb);
        assert!(!handle.closed());
        handle.close().expect("first close");
        assert!(handle.closed());
        assert_eq!(handle.close(), Err(Error::AlreadyClosed));
    }

    #[test]
    fn test_failed_close_keeps_session() {
        let mut fake = scenario_stack();
        fake.force_result("close", -crate::errno::EIO);
        let usb = Usb::new(Box::new(fake)).expect("init");
        let handle = open_handle(&usb);
        assert_eq!(
            handle.close(),
            Err(Error::Transfer {
                op: "usb_close",
                errno: crate::errno::EIO
            })
        );
        // The session is still open and still owned by the handle, so a
        // retry releases it instead of reporting AlreadyClosed.
        assert!(!handle.closed());
        assert_eq!(usb.open_session_count(), 1);
        handle.close().expect("retry");
        assert!(handle.closed());
        assert_eq!(usb.open_session_count(), 0);
    }

    #[test]
    fn test_drop_retries_failed_close() {
        let mut fake = scenario_stack();
        fake.force_result("close", -crate::errno::EIO);
        let usb = Usb::new(Box::new(fake)).expect("init");
        {
            let handle = open_handle(&usb);
            assert!(handle.close().is_err());
        }
        assert_eq!(usb.open_session_count(), 0);
    }

    #[test]
    fn test_closed_handle_rejects_transfers() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let handle = open_handle(&usb);
        handle.close().expect("close");
        let mut buf = [0u8; 8];
        assert_eq!(
            handle.bulk_read(0x81u8, &mut buf, 100),
            Err(Error::ClosedHandle)
        );
        assert_eq!(handle.reset(), Err(Error::ClosedHandle));
    }

    #[test]
    fn test_drop_closes_session() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        {
            let _handle = open_handle(&usb);
            assert_eq!(usb.open_session_count(), 1);
        }
        assert_eq!(usb.open_session_count(), 0);
    }

    #[test]
    fn test_transfer_error_carries_op_and_errno() {
        let mut fake = scenario_stack();
        fake.force_result("bulk_read", -crate::errno::ETIMEDOUT);
        let usb = Usb::new(Box::new(fake)).expect("init");
        let handle = open_handle(&usb);
        let mut buf = [0u8; 8];
        assert_eq!(
            handle.bulk_read(0x81u8, &mut buf, 100),
            Err(Error::Transfer {
                op: "usb_bulk_read",
                errno: crate::errno::ETIMEDOUT
            })
        );
        // The handle stays usable after a failed transfer.
        assert_eq!(handle.bulk_read(0x81u8, &mut buf, 100), Ok(buf.len()));
        handle.close().expect("close");
    }

    #[test]
    fn test_get_string_simple_strips_nuls() {
        let mut fake = scenario_stack();
        let dev = fake.device_addr("001", "001").expect("device");
        fake.set_string(dev, 1, "Ac\0me\0");
        let usb = Usb::new(Box::new(fake)).expect("init");
        let handle = open_handle(&usb);
        assert_eq!(handle.get_string_simple(1).expect("fetch"), Some("Acme".into()));
        handle.close().expect("close");
    }

    #[test]
    fn test_get_string_simple_no_string_policy() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let handle = open_handle(&usb);
        // The fake stalls missing strings with EPIPE; default policy
        // maps that to absence.
        assert_eq!(handle.get_string_simple(7).expect("fetch"), None);
        // With EPIPE removed from the policy the stall is an error.
        handle.set_no_string_codes(&[crate::errno::EACCES]);
        assert_eq!(
            handle.get_string_simple(7),
            Err(Error::Transfer {
                op: "usb_get_string_simple",
                errno: crate::errno::EPIPE
            })
        );
        handle.close().expect("close");
    }

    #[test]
    fn test_selectors_from_wrappers() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let config = usb.configurations().expect("live").remove(0);
        let setting = usb.settings().expect("live").remove(0);
        let endpoint = usb.endpoints().expect("live").remove(0);
        let handle = open_handle(&usb);

        handle.set_configuration(&config).expect("set config");
        handle.claim_interface(&setting).expect("claim");
        handle.set_altinterface(&setting).expect("alt");
        handle.clear_halt(&endpoint).expect("halt");
        handle.release_interface(0u8).expect("release");
        handle.close().expect("close");
    }

    #[test]
    fn test_kernel_driver_ops_default_enosys() {
        let usb = Usb::new(Box::new(scenario_stack())).expect("init");
        let handle = open_handle(&usb);
        // scenario stack has no kernel driver facility configured
        assert_eq!(
            handle.driver_name(0u8),
            Err(Error::Transfer {
                op: "usb_get_driver_np",
                errno: crate::errno::ENOSYS
            })
        );
        assert_eq!(
            handle.detach_kernel_driver(0u8),
            Err(Error::Transfer {
                op: "usb_detach_kernel_driver_np",
                errno: crate::errno::ENOSYS
            })
        );
        handle.close().expect("close");
    }

    #[test]
    fn test_driver_name_reads_string() {
        let mut fake = scenario_stack();
        fake.set_kernel_driver("usbhid");
        let usb = Usb::new(Box::new(fake)).expect("init");
        let handle = open_handle(&usb);
        assert_eq!(handle.driver_name(0u8).expect("driver"), "usbhid");
        handle.close().expect("close");
    }
}
