// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// mDNS device discovery.
//
// LEDM devices advertise themselves as IPP printers; the management surface
// lives on port 8080 regardless of the advertised print port. We browse for
// `_ipp._tcp.local.`, take the first service that resolves with an address,
// and build the base URL from it.
//
// TODO: allow selecting a specific device by mDNS instance name instead of
// taking the first responder.

use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent};
use tracing::{debug, info};

use scanwerk_core::error::{Result, ScanwerkError};

/// mDNS service type for IPP printers.
const IPP_SERVICE: &str = "_ipp._tcp.local.";

/// Port of the LEDM management surface.
const LEDM_PORT: u16 = 8080;

/// Default browse duration before giving up.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Browse the local network and return the base URL of the first device
/// that resolves, e.g. `http://192.168.1.50:8080`.
///
/// Blocks the calling thread for up to `timeout`; run it on a blocking
/// task from async contexts.
pub fn locate_device(timeout: Option<Duration>) -> Result<String> {
    const OP: &str = "discovery.locate";

    let daemon = ServiceDaemon::new()
        .map_err(|e| ScanwerkError::transport_from(OP, "start mDNS daemon", e))?;
    let receiver = daemon
        .browse(IPP_SERVICE)
        .map_err(|e| ScanwerkError::transport_from(OP, format!("browse {IPP_SERVICE}"), e))?;

    let deadline = Instant::now() + timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT);
    let located = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break None;
        }
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(service)) => {
                // Prefer IPv4; the device family does not listen on v6.
                let address = service
                    .get_addresses()
                    .iter()
                    .find(|a| a.is_ipv4())
                    .copied();
                match address {
                    Some(ip) => {
                        info!(
                            name = %service.get_fullname(),
                            %ip,
                            "device located via mDNS"
                        );
                        break Some(format!("http://{ip}:{LEDM_PORT}"));
                    }
                    None => {
                        debug!(
                            name = %service.get_fullname(),
                            "resolved service has no IPv4 address"
                        );
                    }
                }
            }
            Ok(ServiceEvent::ServiceFound(_, fullname)) => {
                debug!(name = %fullname, "service found, waiting for resolution");
            }
            Ok(_) => {}
            Err(_) => break None,
        }
    };

    let _ = daemon.stop_browse(IPP_SERVICE);
    let _ = daemon.shutdown();

    located.ok_or_else(|| {
        ScanwerkError::transport(OP, "no device responded to the mDNS probe")
    })
}
