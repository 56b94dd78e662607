//! Result data model for discovery scans
//!
//! A `DeviceRecord` is a protocol-tagged union over the three probe result
//! shapes. Records are created by a prober, optionally enriched with a
//! `Fingerprint`, and immutable once returned inside a `UnifiedResult`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Device discovered via SSDP
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpnpDevice {
    /// Responder network address
    pub address: String,

    /// Unique service name from the USN header
    pub usn: Option<String>,

    /// Device description URL from the LOCATION header
    pub location: Option<String>,

    /// SERVER banner
    pub server: Option<String>,

    /// Search target echoed by the responder
    pub st: Option<String>,

    /// Friendly name, filled by enrichment
    pub name: Option<String>,

    /// Device type URN, filled by enrichment
    pub device_type: Option<String>,

    /// All response headers, upper-cased keys
    pub headers: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

impl UpnpDevice {
    /// Identity key: USN when present, else address + location.
    pub fn identity_key(&self) -> String {
        match &self.usn {
            Some(usn) if !usn.is_empty() => usn.clone(),
            _ => format!(
                "{}|{}",
                self.address,
                self.location.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Service instance discovered via mDNS/DNS-SD
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MdnsService {
    /// Full service instance name
    pub name: String,

    /// Service type browsed
    pub service_type: String,

    /// Resolved addresses, empty when resolution did not complete in time
    pub addresses: Vec<IpAddr>,

    /// Resolved port
    pub port: Option<u16>,

    /// TXT record key/value properties
    pub properties: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

impl MdnsService {
    /// Identity key: the service instance name.
    pub fn identity_key(&self) -> String {
        self.name.clone()
    }
}

/// Responder captured via WS-Discovery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsdDevice {
    /// Responder network address
    pub address: String,

    /// Raw ProbeMatch payload, verbatim
    pub response: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

impl WsdDevice {
    /// Identity key: the responder address.
    pub fn identity_key(&self) -> String {
        self.address.clone()
    }
}

/// Protocol-tagged device record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum DeviceRecord {
    Upnp(UpnpDevice),
    Mdns(MdnsService),
    Wsd(WsdDevice),
}

impl DeviceRecord {
    /// Stable identity key within the record's protocol.
    pub fn identity_key(&self) -> String {
        match self {
            DeviceRecord::Upnp(d) => d.identity_key(),
            DeviceRecord::Mdns(s) => s.identity_key(),
            DeviceRecord::Wsd(d) => d.identity_key(),
        }
    }

    /// Best-known responder address, when one exists.
    pub fn address(&self) -> Option<IpAddr> {
        match self {
            DeviceRecord::Upnp(d) => d.address.parse().ok(),
            DeviceRecord::Mdns(s) => s.addresses.first().copied(),
            DeviceRecord::Wsd(d) => d.address.parse().ok(),
        }
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            DeviceRecord::Upnp(d) => d.fingerprint.as_ref(),
            DeviceRecord::Mdns(s) => s.fingerprint.as_ref(),
            DeviceRecord::Wsd(d) => d.fingerprint.as_ref(),
        }
    }

    pub fn set_fingerprint(&mut self, fingerprint: Fingerprint) {
        match self {
            DeviceRecord::Upnp(d) => d.fingerprint = Some(fingerprint),
            DeviceRecord::Mdns(s) => s.fingerprint = Some(fingerprint),
            DeviceRecord::Wsd(d) => d.fingerprint = Some(fingerprint),
        }
    }
}

/// Auxiliary service observed during enrichment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxService {
    pub port: u16,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    pub tls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_version: Option<String>,
}

/// Best-effort enrichment metadata
///
/// Every field is optional; absence means "not determined", never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub device_url: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub os_guess: Option<String>,
    pub services: Vec<AuxService>,
    pub banners: HashMap<u16, String>,
}

impl Fingerprint {
    /// True when no enrichment stage produced anything.
    pub fn is_empty(&self) -> bool {
        self.friendly_name.is_none()
            && self.manufacturer.is_none()
            && self.model.is_none()
            && self.firmware_version.is_none()
            && self.serial_number.is_none()
            && self.device_url.is_none()
            && self.category.is_none()
            && self.tags.is_empty()
            && self.os_guess.is_none()
            && self.services.is_empty()
            && self.banners.is_empty()
    }
}

/// Result of one discovery invocation, one list per protocol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResult {
    pub upnp: Vec<UpnpDevice>,
    pub mdns: Vec<MdnsService>,
    pub wsd: Vec<WsdDevice>,
}

impl UnifiedResult {
    pub fn is_empty(&self) -> bool {
        self.upnp.is_empty() && self.mdns.is_empty() && self.wsd.is_empty()
    }

    /// Total device count across all protocols
    pub fn len(&self) -> usize {
        self.upnp.len() + self.mdns.len() + self.wsd.len()
    }
}

/// Devices accumulated across repeated scans, owned by the caller session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccumulatedResult {
    pub upnp: Vec<UpnpDevice>,
    pub mdns: Vec<MdnsService>,
    pub wsd: Vec<WsdDevice>,
}

impl AccumulatedResult {
    pub fn is_empty(&self) -> bool {
        self.upnp.is_empty() && self.mdns.is_empty() && self.wsd.is_empty()
    }

    pub fn len(&self) -> usize {
        self.upnp.len() + self.mdns.len() + self.wsd.len()
    }

    /// Drop every accumulated device.
    pub fn clear(&mut self) {
        self.upnp.clear();
        self.mdns.clear();
        self.wsd.clear();
    }
}
