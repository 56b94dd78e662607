//! Safety-constrained fingerprint enrichment
//!
//! Accepts either a device-claimed description URL (UPnP) or a bare
//! address/port pair (mDNS, WS-Discovery) and produces a best-effort
//! `Fingerprint`. Every failure degrades to "no fingerprint"; nothing in
//! this module can fail a scan.
//!
//! The anti-SSRF invariant: a claimed URL is fetched only when every
//! address its host resolves to is private, link-local or loopback — the
//! fetch target must be within the scanned network, never an arbitrary
//! public host. Redirects are never followed and proxies are ignored.

pub mod banner;
pub mod fingerprint;
pub mod taxonomy;

use crate::config::ENRICHMENT_GRACE;
use crate::model::{
    DeviceRecord, Fingerprint, MdnsService, UpnpDevice, WsdDevice,
};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// Per-fetch ceiling for the description document request
const FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Largest description document accepted
const MAX_DESCRIPTION_BYTES: usize = 1024 * 1024;

/// Fields extracted from a UPnP device description document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptionFields {
    pub friendly_name: Option<String>,
    pub device_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub model_number: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub udn: Option<String>,
    pub presentation_url: Option<String>,
    pub url_base: Option<String>,
    pub service_types: Vec<String>,
}

/// Enrichment fetcher shared by all probers of one scan
///
/// Holds the HTTP client and the per-scan concurrency cap; cheap to share
/// behind an `Arc`.
pub struct Enricher {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
}

impl Enricher {
    /// Build an enricher with the given concurrent-fetch cap.
    pub fn new(workers: usize) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .timeout(FETCH_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| crate::DiscoveryError::Enrichment(e.to_string()))?;

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
        })
    }

    /// Fetch and parse a device description from a claimed URL.
    ///
    /// Returns `None` on any guard rejection or fetch/parse failure.
    pub async fn fetch_description(&self, location: &str) -> Option<DescriptionFields> {
        if !url_is_fetchable(location).await {
            return None;
        }

        let response = self.client.get(location).send().await.ok()?;
        if response.status() != reqwest::StatusCode::OK {
            log::debug!(
                "enrich: refusing description from {} (status {})",
                location,
                response.status()
            );
            return None;
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.contains("xml") {
            return None;
        }

        let mut response = response;
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.ok()? {
            if body.len() + chunk.len() > MAX_DESCRIPTION_BYTES {
                log::debug!("enrich: description from {} exceeds size cap", location);
                return None;
            }
            body.extend_from_slice(&chunk);
        }

        parse_device_description(&String::from_utf8_lossy(&body))
    }

    /// Enrich UPnP devices in place, bounded by the shared grace window.
    pub async fn enrich_upnp(
        &self,
        devices: &mut [UpnpDevice],
        deadline: Instant,
        cancel: &CancellationToken,
    ) {
        let stop = deadline + ENRICHMENT_GRACE;
        let tasks = devices.iter_mut().map(|device| async move {
            let _permit = self.semaphore.acquire().await.ok()?;
            let now = Instant::now();
            if now >= stop || cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = cancel.cancelled() => None,
                done = timeout(stop - now, self.fingerprint_upnp(device)) => done.ok(),
            }
        });
        futures::future::join_all(tasks).await;
    }

    /// Enrich mDNS services in place, bounded by the shared grace window.
    pub async fn enrich_mdns(
        &self,
        services: &mut [MdnsService],
        deadline: Instant,
        cancel: &CancellationToken,
    ) {
        let stop = deadline + ENRICHMENT_GRACE;
        let tasks = services.iter_mut().map(|service| async move {
            let _permit = self.semaphore.acquire().await.ok()?;
            let now = Instant::now();
            if now >= stop || cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = cancel.cancelled() => None,
                done = timeout(stop - now, self.fingerprint_mdns(service)) => done.ok(),
            }
        });
        futures::future::join_all(tasks).await;
    }

    /// Enrich WS-Discovery responders in place, bounded by the shared
    /// grace window.
    pub async fn enrich_wsd(
        &self,
        devices: &mut [WsdDevice],
        deadline: Instant,
        cancel: &CancellationToken,
    ) {
        let stop = deadline + ENRICHMENT_GRACE;
        let tasks = devices.iter_mut().map(|device| async move {
            let _permit = self.semaphore.acquire().await.ok()?;
            let now = Instant::now();
            if now >= stop || cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = cancel.cancelled() => None,
                done = timeout(stop - now, self.fingerprint_wsd(device)) => done.ok(),
            }
        });
        futures::future::join_all(tasks).await;
    }

    async fn fingerprint_upnp(&self, device: &mut UpnpDevice) -> Option<()> {
        let mut fp = Fingerprint::default();

        if let Some(location) = device.location.clone() {
            if let Some(desc) = self.fetch_description(&location).await {
                device.name = device.name.take().or_else(|| desc.friendly_name.clone());
                device.device_type = desc.device_type.clone();

                fp.friendly_name = desc.friendly_name.clone();
                fp.manufacturer = desc.manufacturer.clone();
                fp.model = desc.model_name.clone().or_else(|| desc.model_number.clone());
                fp.firmware_version = desc.firmware_version.clone().or_else(|| {
                    // Some vendors only expose a model revision
                    match (&desc.model_name, &desc.model_number) {
                        (Some(_), Some(number)) => Some(number.clone()),
                        _ => None,
                    }
                });
                fp.serial_number = desc.serial_number.clone().or_else(|| desc.udn.clone());
                fp.device_url = desc
                    .presentation_url
                    .clone()
                    .or_else(|| desc.url_base.clone())
                    .or(Some(location.clone()));

                let (port, tls) = location_port(&location);
                for service_type in &desc.service_types {
                    fp.services.push(crate::model::AuxService {
                        port,
                        name: short_service_name(service_type),
                        banner: Some(service_type.clone()),
                        tls,
                        tls_version: None,
                    });
                }
            }
        }

        if let Ok(address) = device.address.parse::<IpAddr>() {
            self.probe_banners_into(&mut fp, address, None).await;
        }

        fp.os_guess =
            fingerprint::guess_os(device.server.as_deref(), fp.banners.values().map(String::as_str));

        attach(&mut fp, DeviceRecord::Upnp(device.clone()));
        if !fp.is_empty() {
            device.fingerprint = Some(fp);
        }
        Some(())
    }

    async fn fingerprint_mdns(&self, service: &mut MdnsService) -> Option<()> {
        let mut fp = Fingerprint::default();
        apply_txt_properties(&mut fp, &service.properties);

        if let Some(address) = service.addresses.first().copied() {
            self.probe_banners_into(&mut fp, address, service.port).await;
        }

        fp.os_guess = fingerprint::guess_os(None, fp.banners.values().map(String::as_str));

        attach(&mut fp, DeviceRecord::Mdns(service.clone()));
        if !fp.is_empty() {
            service.fingerprint = Some(fp);
        }
        Some(())
    }

    async fn fingerprint_wsd(&self, device: &mut WsdDevice) -> Option<()> {
        let mut fp = Fingerprint::default();
        apply_probe_match(&mut fp, &device.response);

        if let Ok(address) = device.address.parse::<IpAddr>() {
            self.probe_banners_into(&mut fp, address, None).await;
        }

        fp.os_guess = fingerprint::guess_os(None, fp.banners.values().map(String::as_str));

        attach(&mut fp, DeviceRecord::Wsd(device.clone()));
        if !fp.is_empty() {
            device.fingerprint = Some(fp);
        }
        Some(())
    }

    async fn probe_banners_into(
        &self,
        fp: &mut Fingerprint,
        address: IpAddr,
        extra_port: Option<u16>,
    ) {
        for result in banner::grab_banners(address, extra_port, ENRICHMENT_GRACE).await {
            fp.banners.insert(result.port, result.banner.clone());
            fp.services.push(result.into());
        }
    }
}

/// Run the classifier last and record its verdict.
///
/// A category is only assigned when a rule matched or the fingerprint
/// already carries data; a fully empty fingerprint stays empty so no
/// fingerprint gets attached at all.
fn attach(fp: &mut Fingerprint, record: DeviceRecord) {
    match taxonomy::classify(&record, fp) {
        Some((category, tags)) => {
            fp.category = Some(category);
            for tag in tags {
                if !fp.tags.contains(&tag) {
                    fp.tags.push(tag);
                }
            }
        }
        None if !fp.is_empty() => fp.category = Some("unknown".to_string()),
        None => {}
    }
}

/// Whether a claimed description URL may be fetched.
///
/// Scheme must be http or https and every address the host resolves to
/// must be LAN-local. A host that fails to resolve is rejected.
pub async fn url_is_fetchable(location: &str) -> bool {
    let url = match reqwest::Url::parse(location) {
        Ok(url) => url,
        Err(_) => return false,
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }
    let host = match url.host() {
        Some(url::Host::Ipv4(v4)) => return address_is_lan_local(IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => return address_is_lan_local(IpAddr::V6(v6)),
        Some(url::Host::Domain(domain)) => domain.to_string(),
        None => return false,
    };
    let port = url.port_or_known_default().unwrap_or(80);

    let result = match tokio::net::lookup_host((host.as_str(), port)).await {
        Ok(addrs) => {
            let mut any = false;
            for addr in addrs {
                if !address_is_lan_local(addr.ip()) {
                    return false;
                }
                any = true;
            }
            any
        }
        Err(_) => false,
    };
    result
}

/// Address classes permitted as enrichment fetch targets.
pub fn address_is_lan_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_loopback(),
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                || (segments[0] & 0xffc0) == 0xfe80 // link-local unicast
                || (segments[0] & 0xfe00) == 0xfc00 // unique local
        }
    }
}

/// Parse a UPnP device description document.
///
/// Namespace-agnostic: elements are matched on local name, and only the
/// first `<device>` node (the root device) is considered.
pub fn parse_device_description(xml: &str) -> Option<DescriptionFields> {
    let mut reader = Reader::from_str(xml);
    let mut fields = DescriptionFields::default();
    let mut in_device = false;
    let mut device_depth = 0usize;
    let mut current: Option<String> = None;
    let mut saw_device = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "device" {
                    if in_device {
                        // Embedded devices are not descended into
                        device_depth += 1;
                    } else if !saw_device {
                        in_device = true;
                        saw_device = true;
                    }
                } else if in_device && device_depth == 0 {
                    current = Some(name);
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "device" {
                    if device_depth > 0 {
                        device_depth -= 1;
                    } else if in_device {
                        break;
                    }
                }
                current = None;
            }
            Ok(Event::Text(t)) => {
                if in_device && device_depth == 0 {
                    if let (Some(tag), Ok(text)) = (&current, t.unescape()) {
                        let value = text.trim().to_string();
                        if value.is_empty() {
                            continue;
                        }
                        match tag.as_str() {
                            "friendlyName" => fields.friendly_name = Some(value),
                            "deviceType" => fields.device_type = Some(value),
                            "manufacturer" => fields.manufacturer = Some(value),
                            "modelName" => fields.model_name = Some(value),
                            "modelNumber" => fields.model_number = Some(value),
                            "firmwareVersion" => fields.firmware_version = Some(value),
                            "serialNumber" => fields.serial_number = Some(value),
                            "UDN" => fields.udn = Some(value),
                            "presentationURL" => fields.presentation_url = Some(value),
                            "URLBase" => fields.url_base = Some(value),
                            "serviceType" => fields.service_types.push(value),
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::debug!("enrich: description parse error: {}", e);
                return None;
            }
            _ => {}
        }
    }

    saw_device.then_some(fields)
}

/// Extract WS-Discovery ProbeMatch metadata into a fingerprint.
pub fn apply_probe_match(fp: &mut Fingerprint, xml: &str) {
    let mut reader = Reader::from_str(xml);
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = Some(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Text(t)) => {
                if let (Some(tag), Ok(text)) = (&current, t.unescape()) {
                    let value = text.trim().to_string();
                    if value.is_empty() {
                        continue;
                    }
                    match tag.as_str() {
                        "Types" => {
                            if fp.friendly_name.is_none() {
                                fp.friendly_name = Some(value);
                            }
                        }
                        "Scopes" => apply_wsd_scopes(fp, &value),
                        "XAddrs" => {
                            if let Some(first) = value.split_whitespace().next() {
                                fp.device_url = Some(first.to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::debug!("enrich: probe-match parse error: {}", e);
                break;
            }
            _ => {}
        }
    }
}

/// Extract structured metadata from WSD/ONVIF scope URIs.
fn apply_wsd_scopes(fp: &mut Fingerprint, scopes: &str) {
    for scope in scopes.split_whitespace() {
        let lower = scope.to_ascii_lowercase();
        if lower.contains("onvif.org/name/") {
            if let Some(name) = scope.rsplit("/name/").next() {
                fp.friendly_name = Some(name.replace("%20", " "));
            }
        } else if lower.contains("onvif.org/hardware/") {
            if let Some(model) = scope.rsplit("/hardware/").next() {
                fp.model = Some(model.replace("%20", " "));
            }
        } else if lower.contains("onvif.org/type/") {
            if let Some(tag) = scope.rsplit("/type/").next() {
                if !tag.is_empty() && !fp.tags.contains(&tag.to_string()) {
                    fp.tags.push(tag.to_string());
                }
            }
        }
    }
}

/// Pull identity fields from well-known mDNS TXT keys.
pub fn apply_txt_properties(fp: &mut Fingerprint, properties: &HashMap<String, String>) {
    let txt: HashMap<String, &String> = properties
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect();
    let lookup = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| txt.get(*k))
            .map(|v| v.to_string())
    };

    fp.manufacturer = lookup(&["manufacturer", "usb_mfg", "vendor"]).or(fp.manufacturer.take());
    fp.model = lookup(&["ty", "model", "product", "usb_mdl"]).or(fp.model.take());
    fp.firmware_version =
        lookup(&["fv", "firmware", "sw", "txtvers"]).or(fp.firmware_version.take());
    fp.serial_number = lookup(&["serialnumber", "sn"]).or(fp.serial_number.take());
    fp.device_url = lookup(&["adminurl", "url"]).or(fp.device_url.take());
}

fn location_port(location: &str) -> (u16, bool) {
    match reqwest::Url::parse(location) {
        Ok(url) => {
            let tls = url.scheme() == "https";
            let port = url
                .port_or_known_default()
                .unwrap_or(if tls { 443 } else { 80 });
            (port, tls)
        }
        Err(_) => (80, false),
    }
}

/// `urn:schemas-upnp-org:service:ContentDirectory:1` -> `ContentDirectory`
fn short_service_name(service_type: &str) -> String {
    let parts: Vec<&str> = service_type.split(':').collect();
    if parts.len() >= 2 {
        parts[parts.len() - 2].to_string()
    } else {
        service_type.to_string()
    }
}
