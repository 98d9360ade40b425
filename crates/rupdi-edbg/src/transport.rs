//! HID report transport
//!
//! The engine only needs to push one 64-byte report and pull one back, so
//! the transport is a two-method trait. The USB implementation drives the
//! probe's HID interface through nusb interrupt endpoints.

use crate::error::Result;
use crate::protocol::REPORT_SIZE;

/// A fixed-size report channel to the probe
pub trait HidTransport {
    /// Send one report
    fn write_report(&mut self, report: &[u8; REPORT_SIZE]) -> Result<()>;

    /// Receive one report
    fn read_report(&mut self) -> Result<Vec<u8>>;

    /// Send a short command zero-padded to a full report and read the reply
    fn exchange(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut report = [0u8; REPORT_SIZE];
        let len = data.len().min(REPORT_SIZE);
        report[..len].copy_from_slice(&data[..len]);
        self.write_report(&report)?;
        self.read_report()
    }
}

impl<T: HidTransport + ?Sized> HidTransport for Box<T> {
    fn write_report(&mut self, report: &[u8; REPORT_SIZE]) -> Result<()> {
        (**self).write_report(report)
    }

    fn read_report(&mut self) -> Result<Vec<u8>> {
        (**self).read_report()
    }
}

pub mod usb {
    //! nusb-backed HID transport

    use std::time::Duration;

    use nusb::descriptors::TransferType;
    use nusb::transfer::{Buffer, Direction, In, Interrupt, Out, TransferError};
    use nusb::{Endpoint, MaybeFuture};
    use rupdi_core::probe::ProbeInfo;

    use super::HidTransport;
    use crate::error::{EdbgError, Result};
    use crate::protocol::REPORT_SIZE;

    /// USB interface class for HID
    const USB_CLASS_HID: u8 = 0x03;

    /// A connected probe found during enumeration
    #[derive(Debug, Clone)]
    pub struct UsbProbe {
        /// Matching entry from the probe table
        pub info: ProbeInfo,
        /// USB bus number
        pub bus: u8,
        /// USB device address
        pub address: u8,
        /// USB serial number string
        pub serial: Option<String>,
    }

    impl std::fmt::Display for UsbProbe {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(
                f,
                "{} [{:04X}:{:04X}] at bus {} address {}",
                self.info.name, self.info.vid, self.info.pid, self.bus, self.address
            )?;
            if let Some(serial) = &self.serial {
                write!(f, " serial {}", serial)?;
            }
            Ok(())
        }
    }

    /// List connected probes that appear in `probes`
    pub fn list_probes(probes: &[ProbeInfo]) -> Result<Vec<UsbProbe>> {
        Ok(nusb::list_devices()
            .wait()
            .map_err(|e| EdbgError::OpenFailed(e.to_string()))?
            .filter_map(|d| {
                let info = *rupdi_core::probe::find_probe(probes, d.vendor_id(), d.product_id())?;
                Some(UsbProbe {
                    info,
                    bus: d.busnum(),
                    address: d.device_address(),
                    serial: d.serial_number().map(String::from),
                })
            })
            .collect())
    }

    /// HID interface of an EDBG-class probe
    pub struct UsbHid {
        out_ep: Endpoint<Interrupt, Out>,
        in_ep: Endpoint<Interrupt, In>,
        timeout: Duration,
        info: ProbeInfo,
    }

    impl UsbHid {
        /// Open the `index`th matching probe, optionally filtered by USB serial
        pub fn open(
            probes: &[ProbeInfo],
            index: usize,
            serial: Option<&str>,
            timeout: Duration,
        ) -> Result<Self> {
            let devices: Vec<_> = nusb::list_devices()
                .wait()
                .map_err(|e| EdbgError::OpenFailed(e.to_string()))?
                .filter(|d| {
                    rupdi_core::probe::find_probe(probes, d.vendor_id(), d.product_id()).is_some()
                })
                .filter(|d| match serial {
                    Some(s) => d.serial_number() == Some(s),
                    None => true,
                })
                .collect();

            let device_info = devices.get(index).ok_or(EdbgError::DeviceNotFound)?;
            let info = *rupdi_core::probe::find_probe(
                probes,
                device_info.vendor_id(),
                device_info.product_id(),
            )
            .ok_or(EdbgError::DeviceNotFound)?;

            log::info!(
                "edbg: opening {} at bus {} address {}",
                info.name,
                device_info.busnum(),
                device_info.device_address()
            );

            let device = device_info
                .open()
                .wait()
                .map_err(|e| EdbgError::OpenFailed(e.to_string()))?;

            let config = device
                .active_configuration()
                .map_err(|e| EdbgError::OpenFailed(format!("failed to get config: {}", e)))?;

            let mut found = None;
            for iface in config.interface_alt_settings() {
                if iface.class() != USB_CLASS_HID {
                    continue;
                }
                let mut in_addr = None;
                let mut out_addr = None;
                for ep in iface.endpoints() {
                    if ep.transfer_type() != TransferType::Interrupt {
                        continue;
                    }
                    match ep.direction() {
                        Direction::In => in_addr = in_addr.or(Some(ep.address())),
                        Direction::Out => out_addr = out_addr.or(Some(ep.address())),
                    }
                }
                if let (Some(i), Some(o)) = (in_addr, out_addr) {
                    found = Some((iface.interface_number(), i, o));
                    break;
                }
            }

            let (iface_num, in_addr, out_addr) = found.ok_or_else(|| {
                EdbgError::OpenFailed("no HID interface with interrupt endpoints".to_string())
            })?;

            log::debug!(
                "edbg: HID interface {} (IN 0x{:02X}, OUT 0x{:02X})",
                iface_num,
                in_addr,
                out_addr
            );

            // The kernel HID driver usually owns this interface
            let interface = device
                .detach_and_claim_interface(iface_num)
                .wait()
                .map_err(|e| EdbgError::ClaimFailed(e.to_string()))?;

            let out_ep = interface
                .endpoint::<Interrupt, Out>(out_addr)
                .map_err(|e| EdbgError::ClaimFailed(e.to_string()))?;
            let in_ep = interface
                .endpoint::<Interrupt, In>(in_addr)
                .map_err(|e| EdbgError::ClaimFailed(e.to_string()))?;

            Ok(Self {
                out_ep,
                in_ep,
                timeout,
                info,
            })
        }

        /// Probe table entry this device matched
        pub fn info(&self) -> &ProbeInfo {
            &self.info
        }
    }

    impl HidTransport for UsbHid {
        fn write_report(&mut self, report: &[u8; REPORT_SIZE]) -> Result<()> {
            let mut buf = Buffer::new(REPORT_SIZE);
            buf.extend_from_slice(report);

            self.out_ep
                .transfer_blocking(buf, self.timeout)
                .into_result()
                .map_err(|e| match e {
                    TransferError::Cancelled => EdbgError::Timeout,
                    other => EdbgError::TransferFailed(other.to_string()),
                })?;

            log::trace!("edbg: >> {:02X?}", &report[..16]);
            Ok(())
        }

        fn read_report(&mut self) -> Result<Vec<u8>> {
            let max_packet_size = self.in_ep.max_packet_size();
            let request_len = REPORT_SIZE.div_ceil(max_packet_size) * max_packet_size;
            let mut buf = Buffer::new(request_len);
            buf.set_requested_len(request_len);

            let data = self
                .in_ep
                .transfer_blocking(buf, self.timeout)
                .into_result()
                .map_err(|e| match e {
                    TransferError::Cancelled => EdbgError::Timeout,
                    other => EdbgError::TransferFailed(other.to_string()),
                })?;

            let report = data[..data.len().min(REPORT_SIZE)].to_vec();
            log::trace!("edbg: << {:02X?}", &report[..report.len().min(16)]);
            Ok(report)
        }
    }
}
