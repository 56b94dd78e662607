//! mDNS/DNS-SD discovery prober
//!
//! Browses one service type (or the well-known set for the "all"
//! wildcard) via `mdns-sd` and collects every instance observed before the
//! deadline. Partial resolution is tolerated: an instance whose
//! address/port never resolves is still reported with name and type.

use crate::config::ScanRequest;
use crate::enrich::Enricher;
use crate::model::MdnsService;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// Meta-query that enumerates advertised service types
pub const META_QUERY: &str = "_services._dns-sd._udp.local.";

/// Service types browsed for the "all" wildcard.
///
/// Browsed sequentially under the one shared deadline, so later entries
/// get less effective probing time when the budget is short.
pub const WELL_KNOWN_SERVICES: &[&str] = &[
    META_QUERY,
    "_http._tcp.local.",
    "_workstation._tcp.local.",
    "_ipp._tcp.local.",
    "_printer._tcp.local.",
];

/// Wildcard value for the service-type filter
pub const WILDCARD: &str = "all";

/// mDNS prober for one discovery call
#[derive(Debug, Clone)]
pub struct MdnsProber {
    service: String,
    interface_ip: Option<IpAddr>,
}

impl MdnsProber {
    pub fn new(service: impl Into<String>, interface_ip: Option<IpAddr>) -> Self {
        Self {
            service: service.into(),
            interface_ip,
        }
    }

    pub fn from_request(request: &ScanRequest) -> Self {
        Self::new(request.mdns_service.clone(), request.interface_ip)
    }

    /// The concrete service types this call will browse.
    pub fn service_types(&self) -> Vec<String> {
        if self.service.eq_ignore_ascii_case(WILDCARD) {
            WELL_KNOWN_SERVICES.iter().map(|s| s.to_string()).collect()
        } else {
            vec![self.service.clone()]
        }
    }

    /// Browse until `deadline` or cancellation, returning services in
    /// first-seen order.
    pub async fn probe(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
        enricher: Option<Arc<Enricher>>,
    ) -> Vec<MdnsService> {
        let daemon = match ServiceDaemon::new() {
            Ok(daemon) => daemon,
            Err(e) => {
                log::warn!("mdns: failed to start browser daemon: {}", e);
                return Vec::new();
            }
        };
        if self.interface_ip.is_some() {
            // The daemon browses every interface; a bind address only
            // narrows the UDP probers.
            log::debug!("mdns: interface binding not applied to the DNS-SD browser");
        }

        let mut services: Vec<MdnsService> = Vec::new();
        let mut index_by_name: HashMap<String, usize> = HashMap::new();

        'types: for service_type in self.service_types() {
            let receiver = match daemon.browse(&service_type) {
                Ok(receiver) => receiver,
                Err(e) => {
                    log::warn!("mdns: bad service type '{}': {}", service_type, e);
                    continue;
                }
            };

            loop {
                let now = Instant::now();
                if now >= deadline {
                    daemon.stop_browse(&service_type).ok();
                    break 'types;
                }
                let remaining = deadline - now;

                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::debug!("mdns: cancelled with {} service(s) collected", services.len());
                        daemon.stop_browse(&service_type).ok();
                        break 'types;
                    }
                    event = timeout(remaining, receiver.recv_async()) => {
                        match event {
                            Ok(Ok(ServiceEvent::ServiceFound(found_type, fullname))) => {
                                // Record immediately; resolution may never finish
                                // within the window.
                                upsert(&mut services, &mut index_by_name, MdnsService {
                                    name: fullname,
                                    service_type: found_type,
                                    ..Default::default()
                                }, false);
                            }
                            Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                                upsert(
                                    &mut services,
                                    &mut index_by_name,
                                    service_from_info(&info),
                                    true,
                                );
                            }
                            Ok(Ok(_)) => {} // removals/lifecycle events
                            Ok(Err(_)) => {
                                daemon.stop_browse(&service_type).ok();
                                break;
                            }
                            Err(_) => {
                                // Deadline elapsed mid-browse
                                daemon.stop_browse(&service_type).ok();
                                break 'types;
                            }
                        }
                    }
                }
            }
        }

        daemon.shutdown().ok();

        if let Some(enricher) = enricher {
            enricher.enrich_mdns(&mut services, deadline, cancel).await;
        }

        log::debug!("mdns: discovery complete, {} service(s)", services.len());
        services
    }
}

/// Insert a service keeping first-seen order; a resolved record replaces a
/// minimal one, a minimal record never downgrades a resolved one.
fn upsert(
    services: &mut Vec<MdnsService>,
    index_by_name: &mut HashMap<String, usize>,
    service: MdnsService,
    resolved: bool,
) {
    match index_by_name.get(&service.name) {
        Some(&idx) => {
            if resolved {
                services[idx] = service;
            }
        }
        None => {
            index_by_name.insert(service.name.clone(), services.len());
            services.push(service);
        }
    }
}

fn service_from_info(info: &ServiceInfo) -> MdnsService {
    let addresses: Vec<IpAddr> = info
        .get_addresses()
        .iter()
        .map(|scoped| *scoped)
        .collect();

    let properties: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    MdnsService {
        name: info.get_fullname().to_string(),
        service_type: info.get_type().to_string(),
        addresses,
        port: Some(info.get_port()),
        properties,
        fingerprint: None,
    }
}
