//! USB class code names
//!
//! Static lookup from a (class, subclass, protocol) triple to a
//! human-readable name, with three precedence tiers: exact triple,
//! class+subclass (protocol appended in hex), class only (subclass and
//! protocol appended in hex), then a generic unknown string embedding
//! all three values.

use alloc::format;
use alloc::string::String;

struct ClassEntry {
    class: u8,
    subclass: Option<u8>,
    protocol: Option<u8>,
    name: &'static str,
}

const fn triple(class: u8, subclass: u8, protocol: u8, name: &'static str) -> ClassEntry {
    ClassEntry {
        class,
        subclass: Some(subclass),
        protocol: Some(protocol),
        name,
    }
}

const fn pair(class: u8, subclass: u8, name: &'static str) -> ClassEntry {
    ClassEntry {
        class,
        subclass: Some(subclass),
        protocol: None,
        name,
    }
}

const fn single(class: u8, name: &'static str) -> ClassEntry {
    ClassEntry {
        class,
        subclass: None,
        protocol: None,
        name,
    }
}

static CLASS_TABLE: &[ClassEntry] = &[
    single(0x00, "(Defined at Interface level)"),
    single(0x01, "Audio"),
    pair(0x01, 0x01, "Audio Control Device"),
    pair(0x01, 0x02, "Audio Streaming"),
    pair(0x01, 0x03, "MIDI Streaming"),
    single(0x02, "Communications"),
    pair(0x02, 0x01, "Direct Line"),
    pair(0x02, 0x02, "Abstract (modem)"),
    triple(0x02, 0x02, 0x01, "AT-commands (v.25ter)"),
    pair(0x02, 0x06, "Ethernet Networking"),
    single(0x03, "Human Interface Device"),
    pair(0x03, 0x01, "Boot Interface Subclass"),
    triple(0x03, 0x01, 0x01, "Keyboard"),
    triple(0x03, 0x01, 0x02, "Mouse"),
    single(0x05, "Physical Interface Device"),
    single(0x06, "Imaging"),
    triple(0x06, 0x01, 0x01, "Picture Transfer Protocol (PIMA 15470)"),
    single(0x07, "Printer"),
    triple(0x07, 0x01, 0x01, "Unidirectional Printer"),
    triple(0x07, 0x01, 0x02, "Bidirectional Printer"),
    triple(0x07, 0x01, 0x03, "IEEE 1284.4 Printer"),
    single(0x08, "Mass Storage"),
    pair(0x08, 0x01, "RBC (typically Flash)"),
    pair(0x08, 0x02, "SFF-8020i, MMC-2 (ATAPI)"),
    pair(0x08, 0x04, "Floppy (UFI)"),
    pair(0x08, 0x06, "SCSI"),
    triple(0x08, 0x06, 0x50, "SCSI Bulk-Only"),
    single(0x09, "Hub"),
    triple(0x09, 0x00, 0x00, "Full speed (or root) Hub"),
    triple(0x09, 0x00, 0x01, "Single TT Hub"),
    triple(0x09, 0x00, 0x02, "TT per port Hub"),
    single(0x0a, "CDC Data"),
    single(0x0b, "Chip/SmartCard"),
    single(0x0d, "Content Security"),
    single(0x0e, "Video"),
    pair(0x0e, 0x01, "Video Control"),
    pair(0x0e, 0x02, "Video Streaming"),
    single(0xdc, "Diagnostic"),
    triple(0xdc, 0x01, 0x01, "Reprogrammable Diagnostics"),
    single(0xe0, "Wireless"),
    pair(0xe0, 0x01, "Radio Frequency"),
    triple(0xe0, 0x01, 0x01, "Bluetooth"),
    triple(0xe0, 0x01, 0x02, "Ultra WideBand Radio Control"),
    triple(0xe0, 0x01, 0x03, "RNDIS"),
    single(0xef, "Miscellaneous Device"),
    triple(0xef, 0x02, 0x01, "Interface Association"),
    triple(0xef, 0x02, 0x02, "Wire Adapter Multifunction Peripheral"),
    single(0xfe, "Application Specific"),
    pair(0xfe, 0x01, "Device Firmware Update"),
    pair(0xfe, 0x02, "IRDA Bridge"),
    pair(0xfe, 0x03, "Test and Measurement"),
    single(0xff, "Vendor Specific"),
];

/// Human-readable name for a device or interface class triple.
pub fn class_string(class: u8, subclass: u8, protocol: u8) -> String {
    for e in CLASS_TABLE {
        if e.class == class && e.subclass == Some(subclass) && e.protocol == Some(protocol) {
            return String::from(e.name);
        }
    }
    for e in CLASS_TABLE {
        if e.class == class && e.subclass == Some(subclass) && e.protocol.is_none() {
            return format!("{} ({:02x})", e.name, protocol);
        }
    }
    for e in CLASS_TABLE {
        if e.class == class && e.subclass.is_none() {
            return format!("{} ({:02x}:{:02x})", e.name, subclass, protocol);
        }
    }
    format!("Unknown ({:02x}:{:02x}:{:02x})", class, subclass, protocol)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_triple() {
        assert_eq!(class_string(0x03, 0x01, 0x02), "Mouse");
        assert_eq!(class_string(0xe0, 0x01, 0x01), "Bluetooth");
    }

    #[test]
    fn test_subclass_tier_appends_protocol() {
        assert_eq!(class_string(0x08, 0x06, 0x00), "SCSI (00)");
        assert_eq!(
            class_string(0x03, 0x01, 0x7f),
            "Boot Interface Subclass (7f)"
        );
    }

    #[test]
    fn test_class_tier_appends_subclass_and_protocol() {
        assert_eq!(class_string(0x09, 0x05, 0x01), "Hub (05:01)");
        assert_eq!(class_string(0x07, 0x42, 0x01), "Printer (42:01)");
    }

    #[test]
    fn test_unknown_fallback() {
        assert_eq!(class_string(0x42, 0x01, 0x02), "Unknown (42:01:02)");
    }
}
