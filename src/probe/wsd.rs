//! WS-Discovery prober
//!
//! Sends one SOAP Probe to the WS-Discovery multicast group and records
//! every ProbeMatch payload verbatim until the deadline. Field extraction
//! is left to the enrichment stage.

use crate::config::ScanRequest;
use crate::enrich::Enricher;
use crate::model::WsdDevice;
use crate::probe::multicast_socket;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Standard WS-Discovery multicast group and port
pub const WSD_MULTICAST_ADDR: &str = "239.255.255.250:3702";

/// ProbeMatch datagrams larger than this are truncated by the read
const MAX_RESPONSE_LEN: usize = 4096;

/// WS-Discovery prober for one discovery call
#[derive(Debug, Clone)]
pub struct WsdProber {
    ttl: u8,
    interface_ip: Option<IpAddr>,
    target: SocketAddr,
}

impl WsdProber {
    pub fn new(ttl: u8, interface_ip: Option<IpAddr>) -> Self {
        Self {
            ttl,
            interface_ip,
            target: WSD_MULTICAST_ADDR.parse().expect("valid multicast addr"),
        }
    }

    pub fn from_request(request: &ScanRequest) -> Self {
        Self::new(request.wsd_ttl, request.interface_ip)
    }

    /// Redirect the probe to a non-standard address.
    ///
    /// Used to point the prober at a simulated responder.
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    /// The SOAP Probe envelope with a fresh MessageID.
    fn probe_message(&self) -> String {
        let message_id = format!("uuid:{}", Uuid::new_v4());
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<e:Envelope xmlns:e="http://www.w3.org/2003/05/soap-envelope"
            xmlns:w="http://schemas.xmlsoap.org/ws/2004/08/addressing"
            xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery">
  <e:Header>
    <w:MessageID>{}</w:MessageID>
    <w:To>urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To>
    <w:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action>
  </e:Header>
  <e:Body>
    <d:Probe/>
  </e:Body>
</e:Envelope>"#,
            message_id
        )
    }

    /// Probe until `deadline` or cancellation, returning responders in
    /// first-seen order.
    pub async fn probe(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
        enricher: Option<Arc<Enricher>>,
    ) -> Vec<WsdDevice> {
        let socket = match multicast_socket(self.ttl, self.interface_ip) {
            Ok(socket) => socket,
            Err(e) => {
                log::warn!("wsd: {}", e);
                return Vec::new();
            }
        };

        if let Err(e) = socket.send_to(self.probe_message().as_bytes(), self.target).await {
            log::warn!("wsd: failed to send probe to {}: {}", self.target, e);
            return Vec::new();
        }

        let mut devices: Vec<WsdDevice> = Vec::new();
        let mut buf = vec![0u8; MAX_RESPONSE_LEN];

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("wsd: cancelled with {} responder(s) collected", devices.len());
                    break;
                }
                received = timeout(remaining, socket.recv_from(&mut buf)) => {
                    match received {
                        Ok(Ok((len, from))) => {
                            devices.push(WsdDevice {
                                address: from.ip().to_string(),
                                response: String::from_utf8_lossy(&buf[..len]).into_owned(),
                                fingerprint: None,
                            });
                        }
                        Ok(Err(e)) => {
                            log::debug!("wsd: receive error: {}", e);
                        }
                        Err(_) => break, // deadline elapsed
                    }
                }
            }
        }

        if let Some(enricher) = enricher {
            enricher.enrich_wsd(&mut devices, deadline, cancel).await;
        }

        log::debug!("wsd: discovery complete, {} responder(s)", devices.len());
        devices
    }
}
