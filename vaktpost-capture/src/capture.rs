use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use pcap::{Capture, Device};
use tracing::{debug, info};
use vaktpost_core::events::FlowRecord;

use crate::packet::{derive_flow, LinkKind};
use crate::{CaptureError, CaptureFilter, LocalAddrs};

/// How long a blocking read waits before re-checking the terminate flag.
const READ_TIMEOUT_MS: i32 = 1000;

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub interface: String,
    pub filter: CaptureFilter,
    /// Ports never captured: the transport port plus configured extras.
    pub excluded_ports: Vec<u16>,
    pub promiscuous: bool,
    pub snaplen: i32,
    pub buffer_size: usize,
}

impl CaptureOptions {
    pub fn bpf(&self) -> String {
        self.filter.bpf(&self.excluded_ports)
    }
}

/// Run a live capture loop on the configured interface, handing every
/// derived flow to `on_flow`.
///
/// Blocks until `terminate` is set; call it from a blocking thread. Returns
/// the number of flows handed out.
pub fn run<F>(
    options: &CaptureOptions,
    local: &LocalAddrs,
    terminate: &AtomicBool,
    mut on_flow: F,
) -> Result<u64, CaptureError>
where
    F: FnMut(FlowRecord),
{
    let device = Device::list()
        .map_err(CaptureError::DeviceList)?
        .into_iter()
        .find(|d| d.name == options.interface)
        .ok_or_else(|| CaptureError::DeviceNotFound(options.interface.clone()))?;

    let open_err = |source| CaptureError::Open {
        interface: options.interface.clone(),
        source,
    };
    let mut cap = Capture::from_device(device)
        .map_err(open_err)?
        .promisc(options.promiscuous)
        .snaplen(options.snaplen)
        .buffer_size(i32::try_from(options.buffer_size).unwrap_or(i32::MAX))
        .timeout(READ_TIMEOUT_MS)
        .open()
        .map_err(open_err)?;

    let expression = options.bpf();
    if expression.is_empty() {
        info!(interface = %options.interface, "No filter applied, capturing all traffic");
    } else {
        cap.filter(&expression, true)
            .map_err(|source| CaptureError::Filter {
                expression: expression.clone(),
                source,
            })?;
        info!(interface = %options.interface, filter = %expression, "Capture filter set");
    }

    let link = LinkKind::try_from(cap.get_datalink())?;
    info!(
        interface = %options.interface,
        ?link,
        local_addrs = local.len(),
        "Starting packet capture"
    );

    let mut forwarded = 0u64;
    while !terminate.load(Ordering::Relaxed) {
        match cap.next_packet() {
            Ok(packet) => {
                if let Some(flow) = derive_flow(packet.data, link, local, Utc::now()) {
                    on_flow(flow);
                    forwarded += 1;
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => return Err(CaptureError::Read(e)),
        }
    }

    debug!(forwarded, "Capture loop stopped");
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_render_their_filter() {
        let options = CaptureOptions {
            interface: "eth0".into(),
            filter: CaptureFilter::Tcp,
            excluded_ports: vec![50051, 22],
            promiscuous: true,
            snaplen: 1600,
            buffer_size: 1 << 20,
        };
        assert_eq!(options.bpf(), "tcp and not port 22 and not port 50051");
    }

    #[test]
    fn missing_device_is_an_error() {
        let options = CaptureOptions {
            interface: "vaktpost-none0".into(),
            filter: CaptureFilter::All,
            excluded_ports: vec![],
            promiscuous: false,
            snaplen: 1600,
            buffer_size: 1 << 20,
        };
        let stop = AtomicBool::new(true);
        let result = run(&options, &LocalAddrs::default(), &stop, |_| {});
        assert!(matches!(
            result,
            Err(CaptureError::DeviceNotFound(_)) | Err(CaptureError::DeviceList(_))
        ));
    }
}
