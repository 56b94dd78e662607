//! UPnP/SSDP discovery prober
//!
//! Sends one M-SEARCH datagram to the SSDP multicast group and collects
//! unicast replies until the deadline. Duplicate replies from the same
//! device are last-write-wins by unique service name.

use crate::config::ScanRequest;
use crate::enrich::Enricher;
use crate::model::UpnpDevice;
use crate::probe::multicast_socket;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// Standard SSDP multicast group and port
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// Maximum SSDP response datagram we accept
const MAX_RESPONSE_LEN: usize = 65_507;

/// SSDP prober for one discovery call
#[derive(Debug, Clone)]
pub struct UpnpProber {
    st: String,
    mx: u8,
    ttl: u8,
    interface_ip: Option<IpAddr>,
    target: SocketAddr,
}

impl UpnpProber {
    pub fn new(st: impl Into<String>, mx: u8, ttl: u8, interface_ip: Option<IpAddr>) -> Self {
        Self {
            st: st.into(),
            mx,
            ttl,
            interface_ip,
            target: SSDP_MULTICAST_ADDR.parse().expect("valid multicast addr"),
        }
    }

    pub fn from_request(request: &ScanRequest) -> Self {
        Self::new(
            request.upnp_st.clone(),
            request.upnp_mx,
            request.upnp_ttl,
            request.interface_ip,
        )
    }

    /// Redirect the discovery datagram to a non-standard address.
    ///
    /// Used to point the prober at a simulated responder.
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    /// The M-SEARCH request datagram.
    fn search_message(&self) -> String {
        [
            "M-SEARCH * HTTP/1.1".to_string(),
            format!("HOST:{}", SSDP_MULTICAST_ADDR),
            "MAN:\"ssdp:discover\"".to_string(),
            format!("MX:{}", self.mx),
            format!("ST:{}", self.st),
            String::new(),
            String::new(),
        ]
        .join("\r\n")
    }

    /// Probe until `deadline` or cancellation, returning devices in
    /// first-seen order.
    pub async fn probe(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
        enricher: Option<Arc<Enricher>>,
    ) -> Vec<UpnpDevice> {
        let socket = match multicast_socket(self.ttl, self.interface_ip) {
            Ok(socket) => socket,
            Err(e) => {
                log::warn!("upnp: {}", e);
                return Vec::new();
            }
        };

        if let Err(e) = socket.send_to(self.search_message().as_bytes(), self.target).await {
            log::warn!("upnp: failed to send M-SEARCH to {}: {}", self.target, e);
            return Vec::new();
        }

        let mut devices: Vec<UpnpDevice> = Vec::new();
        let mut index_by_key: HashMap<String, usize> = HashMap::new();
        let mut buf = vec![0u8; MAX_RESPONSE_LEN];

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("upnp: cancelled with {} device(s) collected", devices.len());
                    break;
                }
                received = timeout(remaining, socket.recv_from(&mut buf)) => {
                    match received {
                        Ok(Ok((len, from))) => {
                            let text = String::from_utf8_lossy(&buf[..len]);
                            match parse_response(&text, from.ip()) {
                                Some(device) => {
                                    let key = device.identity_key();
                                    match index_by_key.get(&key) {
                                        // Repeat reply: newest fields win, position kept
                                        Some(&idx) => devices[idx] = device,
                                        None => {
                                            index_by_key.insert(key, devices.len());
                                            devices.push(device);
                                        }
                                    }
                                }
                                None => {
                                    log::debug!("upnp: skipping malformed response from {}", from);
                                }
                            }
                        }
                        Ok(Err(e)) => {
                            log::debug!("upnp: receive error: {}", e);
                        }
                        Err(_) => break, // deadline elapsed
                    }
                }
            }
        }

        if let Some(enricher) = enricher {
            enricher.enrich_upnp(&mut devices, deadline, cancel).await;
        }

        log::debug!("upnp: discovery complete, {} device(s)", devices.len());
        devices
    }
}

/// Parse an HTTP-like SSDP response into a device record.
///
/// Header keys are upper-cased; lines without a colon are ignored. Returns
/// `None` when no header at all could be extracted.
pub fn parse_response(response: &str, from: IpAddr) -> Option<UpnpDevice> {
    let mut headers = HashMap::new();
    for line in response.split("\r\n") {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_uppercase(), value.trim().to_string());
        }
    }
    if headers.is_empty() {
        return None;
    }

    Some(UpnpDevice {
        address: from.to_string(),
        usn: headers.get("USN").cloned(),
        location: headers.get("LOCATION").cloned(),
        server: headers.get("SERVER").cloned(),
        st: headers.get("ST").cloned(),
        name: None,
        device_type: None,
        headers,
        fingerprint: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
        CACHE-CONTROL: max-age=1800\r\n\
        LOCATION: http://10.0.0.5:49152/desc.xml\r\n\
        SERVER: Linux/5.10 UPnP/1.0 MiniDLNA/1.3\r\n\
        ST: upnp:rootdevice\r\n\
        USN: uuid:abc::upnp:rootdevice\r\n\r\n";

    #[test]
    fn test_parse_response_extracts_identity_fields() {
        let device = parse_response(RESPONSE, "10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(device.address, "10.0.0.5");
        assert_eq!(device.usn.as_deref(), Some("uuid:abc::upnp:rootdevice"));
        assert_eq!(device.location.as_deref(), Some("http://10.0.0.5:49152/desc.xml"));
        assert_eq!(device.server.as_deref(), Some("Linux/5.10 UPnP/1.0 MiniDLNA/1.3"));
        assert_eq!(device.st.as_deref(), Some("upnp:rootdevice"));
        assert_eq!(device.headers.get("CACHE-CONTROL").map(String::as_str), Some("max-age=1800"));
    }

    #[test]
    fn test_parse_response_is_case_insensitive_on_keys() {
        let raw = "HTTP/1.1 200 OK\r\nlocation: http://10.0.0.9/d.xml\r\nUsn: uuid:x\r\n\r\n";
        let device = parse_response(raw, "10.0.0.9".parse().unwrap()).unwrap();
        assert_eq!(device.location.as_deref(), Some("http://10.0.0.9/d.xml"));
        assert_eq!(device.usn.as_deref(), Some("uuid:x"));
    }

    #[test]
    fn test_parse_response_rejects_header_free_payload() {
        assert!(parse_response("", "10.0.0.5".parse().unwrap()).is_none());
        assert!(parse_response("not an ssdp reply at all", "10.0.0.5".parse().unwrap()).is_none());
    }

    #[test]
    fn test_search_message_format() {
        let prober = UpnpProber::new("ssdp:all", 3, 2, None);
        let msg = prober.search_message();
        assert!(msg.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(msg.contains("HOST:239.255.255.250:1900\r\n"));
        assert!(msg.contains("MAN:\"ssdp:discover\"\r\n"));
        assert!(msg.contains("MX:3\r\n"));
        assert!(msg.contains("ST:ssdp:all\r\n"));
        assert!(msg.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_probe_against_simulated_responder() {
        let responder = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let responder_addr = responder.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..len]).to_string();
            assert!(request.starts_with("M-SEARCH"));
            let reply = "HTTP/1.1 200 OK\r\n\
                USN: uuid:abc\r\n\
                LOCATION: http://10.0.0.5/desc.xml\r\n\
                ST: ssdp:all\r\n\r\n";
            responder.send_to(reply.as_bytes(), from).await.unwrap();
        });

        let prober = UpnpProber::new("ssdp:all", 1, 2, None).with_target(responder_addr);
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + std::time::Duration::from_secs(2);
        let devices = prober.probe(deadline, &cancel, None).await;

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].usn.as_deref(), Some("uuid:abc"));
        assert_eq!(devices[0].location.as_deref(), Some("http://10.0.0.5/desc.xml"));
    }

    #[tokio::test]
    async fn test_duplicate_replies_are_last_write_wins() {
        let responder = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let responder_addr = responder.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let (_, from) = responder.recv_from(&mut buf).await.unwrap();
            let first = "HTTP/1.1 200 OK\r\nUSN: uuid:abc\r\nLOCATION: http://10.0.0.5/old.xml\r\n\r\n";
            let second = "HTTP/1.1 200 OK\r\nUSN: uuid:abc\r\nLOCATION: http://10.0.0.5/new.xml\r\n\r\n";
            responder.send_to(first.as_bytes(), from).await.unwrap();
            responder.send_to(second.as_bytes(), from).await.unwrap();
        });

        let prober = UpnpProber::new("ssdp:all", 1, 2, None).with_target(responder_addr);
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + std::time::Duration::from_millis(800);
        let devices = prober.probe(deadline, &cancel, None).await;

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].location.as_deref(), Some("http://10.0.0.5/new.xml"));
    }

    #[tokio::test]
    async fn test_probe_returns_promptly_on_cancel() {
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap();

        let prober = UpnpProber::new("ssdp:all", 1, 2, None).with_target(target);
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let deadline = Instant::now() + std::time::Duration::from_secs(30);
                prober.probe(deadline, &cancel, None).await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        let devices = timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("prober must unwind promptly after cancellation")
            .unwrap();
        assert!(devices.is_empty());
    }
}
