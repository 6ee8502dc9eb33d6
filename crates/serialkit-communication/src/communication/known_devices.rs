//! Titles for common USB-UART bridges and USB CDC boards

/// A known USB vendor/product pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownDevice {
    /// Display name
    pub name: &'static str,
    /// USB vendor id
    pub vid: u16,
    /// USB product id
    pub pid: u16,
}

const fn known(name: &'static str, vid: u16, pid: u16) -> KnownDevice {
    KnownDevice { name, vid, pid }
}

/// Lookup table, first match wins
pub const KNOWN_DEVICES: &[KnownDevice] = &[
    // Arduino
    known("Arduino UNO", 0x2341, 0x0043),
    known("Arduino Mega", 0x2341, 0x0010),
    known("ATmega32U4", 0x2341, 0x8036),
    // Silicon Labs
    known("CP2102/CP2102N", 0x10c4, 0xea60),
    // FTDI
    known("FTDI Basic", 0x0403, 0x6001),
    known("FT2232H", 0x0403, 0x6010),
    // WCH
    known("CH340", 0x1a86, 0x7523),
    known("CH9102", 0x1a86, 0x55d4),
    // Prolific
    known("PL2303", 0x067b, 0x2303),
    // Espressif
    known("ESP32-S2 USB CDC", 0x303a, 0x0002),
    known("ESP32-S3 USB CDC", 0x303a, 0x0009),
    known("ESP USB_SERIAL_JTAG", 0x303a, 0x1001),
    known("ESP USB Bridge", 0x303a, 0x1002),
    // STMicroelectronics
    known("STM32 Virtual COM Port", 0x0483, 0x5740),
];

/// Find the table entry for a vendor/product pair
pub fn lookup(vid: u16, pid: u16) -> Option<&'static KnownDevice> {
    KNOWN_DEVICES.iter().find(|d| d.vid == vid && d.pid == pid)
}

/// Title such as `CH340 (VID:1a86 PID:7523)`, or
/// `Unknown device (VID:xxxx PID:xxxx)` for unlisted pairs.
pub fn device_title(vid: u16, pid: u16) -> String {
    let name = lookup(vid, pid).map_or("Unknown device", |d| d.name);
    format!("{} (VID:{:04x} PID:{:04x})", name, vid, pid)
}
