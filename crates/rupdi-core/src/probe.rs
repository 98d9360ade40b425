//! Known debug probes

/// Microchip/Atmel USB vendor ID
pub const ATMEL_VID: u16 = 0x03EB;

/// Identity of a CMSIS-DAP/EDBG style debug probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Human readable probe name
    pub name: &'static str,
    /// USB vendor ID
    pub vid: u16,
    /// USB product ID
    pub pid: u16,
    /// Whether the probe can measure target voltage
    pub has_vref: bool,
}

impl ProbeInfo {
    /// Check whether a USB device matches this probe
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Probes speaking the EDBG protocol with UPDI support
pub const KNOWN_PROBES: &[ProbeInfo] = &[
    ProbeInfo {
        name: "EDBG",
        vid: ATMEL_VID,
        pid: 0x2111,
        has_vref: true,
    },
    ProbeInfo {
        name: "JTAGICE3",
        vid: ATMEL_VID,
        pid: 0x2140,
        has_vref: true,
    },
    ProbeInfo {
        name: "Atmel-ICE",
        vid: ATMEL_VID,
        pid: 0x2141,
        has_vref: true,
    },
    ProbeInfo {
        name: "Power Debugger",
        vid: ATMEL_VID,
        pid: 0x2144,
        has_vref: true,
    },
    ProbeInfo {
        name: "mEDBG",
        vid: ATMEL_VID,
        pid: 0x2145,
        has_vref: false,
    },
    ProbeInfo {
        name: "nEDBG (Curiosity Nano)",
        vid: ATMEL_VID,
        pid: 0x2175,
        has_vref: true,
    },
    ProbeInfo {
        name: "PICkit 4",
        vid: ATMEL_VID,
        pid: 0x2177,
        has_vref: true,
    },
    ProbeInfo {
        name: "MPLAB Snap",
        vid: ATMEL_VID,
        pid: 0x2180,
        has_vref: false,
    },
];

/// Find a known probe by USB IDs
pub fn find_probe(probes: &[ProbeInfo], vid: u16, pid: u16) -> Option<&ProbeInfo> {
    probes.iter().find(|p| p.matches(vid, pid))
}
