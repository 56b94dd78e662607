//! Configuration module for lantern discovery
//!
//! `ScanRequest` describes one discovery invocation; `Settings` carries the
//! ambient defaults, overridable from the environment or `~/.lantern.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Hard upper bound for a scan timeout in seconds
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Grace period granted to in-flight enrichment fetches past the deadline
pub const ENRICHMENT_GRACE: Duration = Duration::from_secs(2);

/// Discovery protocol selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    All,
    Upnp,
    Mdns,
    Wsd,
}

impl Protocol {
    /// True when this selector includes the given concrete protocol.
    pub fn includes(&self, other: Protocol) -> bool {
        *self == Protocol::All || *self == other
    }

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::All => "all",
            Protocol::Upnp => "upnp",
            Protocol::Mdns => "mdns",
            Protocol::Wsd => "wsd",
        }
    }
}

impl FromStr for Protocol {
    type Err = crate::DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Protocol::All),
            "upnp" => Ok(Protocol::Upnp),
            "mdns" => Ok(Protocol::Mdns),
            "wsd" => Ok(Protocol::Wsd),
            other => Err(crate::DiscoveryError::Validation(format!(
                "unknown protocol '{}' (expected all|upnp|mdns|wsd)",
                other
            ))),
        }
    }
}

/// Parameters for one discovery invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Protocols to probe
    pub protocol: Protocol,

    /// Overall scan budget in seconds
    pub timeout_secs: u64,

    /// mDNS service type to browse, or "all" for the well-known set
    pub mdns_service: String,

    /// SSDP search target (ST header)
    pub upnp_st: String,

    /// SSDP MX header, maximum responder wait in seconds
    pub upnp_mx: u8,

    /// Multicast TTL for the SSDP datagram
    pub upnp_ttl: u8,

    /// Multicast TTL for the WS-Discovery probe
    pub wsd_ttl: u8,

    /// Optional local interface address to bind multicast sockets to
    pub interface_ip: Option<IpAddr>,

    /// Fetch fingerprints for discovered devices
    pub enrich: bool,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            protocol: Protocol::All,
            timeout_secs: 5,
            mdns_service: "_services._dns-sd._udp.local.".to_string(),
            upnp_st: "ssdp:all".to_string(),
            upnp_mx: 3,
            upnp_ttl: 2,
            wsd_ttl: 2,
            interface_ip: None,
            enrich: false,
        }
    }
}

impl ScanRequest {
    /// Create a request for the given protocol selector
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            ..Default::default()
        }
    }

    /// Set the scan budget in seconds
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the mDNS service type filter
    pub fn with_mdns_service(mut self, service: impl Into<String>) -> Self {
        self.mdns_service = service.into();
        self
    }

    /// Set the SSDP search target
    pub fn with_upnp_st(mut self, st: impl Into<String>) -> Self {
        self.upnp_st = st.into();
        self
    }

    /// Set the SSDP MX value
    pub fn with_upnp_mx(mut self, mx: u8) -> Self {
        self.upnp_mx = mx;
        self
    }

    /// Set the SSDP multicast TTL
    pub fn with_upnp_ttl(mut self, ttl: u8) -> Self {
        self.upnp_ttl = ttl;
        self
    }

    /// Set the WS-Discovery multicast TTL
    pub fn with_wsd_ttl(mut self, ttl: u8) -> Self {
        self.wsd_ttl = ttl;
        self
    }

    /// Bind multicast sockets to a specific local interface
    pub fn with_interface(mut self, addr: IpAddr) -> Self {
        self.interface_ip = Some(addr);
        self
    }

    /// Request fingerprint enrichment
    pub fn with_enrichment(mut self, enrich: bool) -> Self {
        self.enrich = enrich;
        self
    }

    /// Get the scan budget as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate the request
    ///
    /// Safety-critical bounds are re-checked here even though the caller's
    /// request layer is expected to validate first.
    pub fn validate(&self) -> crate::Result<()> {
        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(crate::DiscoveryError::Validation(format!(
                "timeout must be within 1..={} seconds, got {}",
                MAX_TIMEOUT_SECS, self.timeout_secs
            )));
        }

        if !(1..=5).contains(&self.upnp_mx) {
            return Err(crate::DiscoveryError::Validation(format!(
                "upnp_mx must be within 1..=5, got {}",
                self.upnp_mx
            )));
        }

        if !(1..=16).contains(&self.upnp_ttl) {
            return Err(crate::DiscoveryError::Validation(format!(
                "upnp_ttl must be within 1..=16, got {}",
                self.upnp_ttl
            )));
        }

        if !(1..=16).contains(&self.wsd_ttl) {
            return Err(crate::DiscoveryError::Validation(format!(
                "wsd_ttl must be within 1..=16, got {}",
                self.wsd_ttl
            )));
        }

        if self.mdns_service.trim().is_empty() {
            return Err(crate::DiscoveryError::Validation(
                "mdns_service must not be empty".to_string(),
            ));
        }

        if let Some(addr) = self.interface_ip {
            if addr.is_loopback() {
                return Err(crate::DiscoveryError::Validation(
                    "refusing to bind to a loopback interface for discovery".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Ambient defaults for the discovery service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Timeout applied when the caller does not specify one
    pub default_timeout_secs: u64,

    /// Upper bound enforced on requested timeouts
    pub max_timeout_secs: u64,

    /// Default SSDP search target
    pub upnp_default_st: String,

    /// Default SSDP MX value
    pub upnp_default_mx: u8,

    /// Default multicast TTL
    pub upnp_default_ttl: u8,

    /// Maximum concurrent enrichment fetches per scan
    pub enrichment_workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 5,
            max_timeout_secs: MAX_TIMEOUT_SECS,
            upnp_default_st: "ssdp:all".to_string(),
            upnp_default_mx: 3,
            upnp_default_ttl: 2,
            enrichment_workers: 10,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| crate::DiscoveryError::Validation(format!("failed to read config file: {}", e)))?;

        let settings: Settings = toml::from_str(&content)
            .map_err(|e| crate::DiscoveryError::Validation(format!("failed to parse TOML: {}", e)))?;

        Ok(settings)
    }

    /// Load settings from default locations, falling back to built-ins
    ///
    /// Resolution order: `~/.lantern.toml`, then environment overrides,
    /// then compiled defaults.
    pub fn load() -> Self {
        let mut settings = dirs::home_dir()
            .map(|home| home.join(".lantern.toml"))
            .filter(|p| p.exists())
            .and_then(|p| Self::from_toml_file(&p).ok())
            .unwrap_or_default();

        if let Some(v) = env_u64("LANTERN_DEFAULT_TIMEOUT") {
            settings.default_timeout_secs = v;
        }
        if let Some(v) = env_u64("LANTERN_MAX_TIMEOUT") {
            settings.max_timeout_secs = v;
        }
        if let Ok(st) = std::env::var("LANTERN_UPNP_ST") {
            if !st.trim().is_empty() {
                settings.upnp_default_st = st;
            }
        }

        settings
    }

    /// Clamp a requested timeout into the configured bounds
    pub fn clamp_timeout(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_timeout_secs)
            .clamp(1, self.max_timeout_secs)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("upnp".parse::<Protocol>().unwrap(), Protocol::Upnp);
        assert_eq!(" MDNS ".parse::<Protocol>().unwrap(), Protocol::Mdns);
        assert_eq!("all".parse::<Protocol>().unwrap(), Protocol::All);
        assert!("bonjour".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_protocol_selector() {
        assert!(Protocol::All.includes(Protocol::Wsd));
        assert!(Protocol::Upnp.includes(Protocol::Upnp));
        assert!(!Protocol::Upnp.includes(Protocol::Mdns));
    }

    #[test]
    fn test_default_request_is_valid() {
        assert!(ScanRequest::default().validate().is_ok());
    }

    #[test]
    fn test_timeout_bounds() {
        assert!(ScanRequest::default().with_timeout(0).validate().is_err());
        assert!(ScanRequest::default()
            .with_timeout(MAX_TIMEOUT_SECS + 1)
            .validate()
            .is_err());
        assert!(ScanRequest::default()
            .with_timeout(MAX_TIMEOUT_SECS)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_mx_and_ttl_bounds() {
        assert!(ScanRequest::default().with_upnp_mx(0).validate().is_err());
        assert!(ScanRequest::default().with_upnp_mx(6).validate().is_err());
        assert!(ScanRequest::default().with_upnp_ttl(0).validate().is_err());
        assert!(ScanRequest::default().with_upnp_ttl(17).validate().is_err());
        assert!(ScanRequest::default().with_wsd_ttl(17).validate().is_err());
        assert!(ScanRequest::default()
            .with_upnp_mx(5)
            .with_upnp_ttl(16)
            .with_wsd_ttl(1)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_loopback_interface_rejected() {
        let req = ScanRequest::default().with_interface("127.0.0.1".parse().unwrap());
        assert!(req.validate().is_err());

        let req = ScanRequest::default().with_interface("::1".parse().unwrap());
        assert!(req.validate().is_err());

        let req = ScanRequest::default().with_interface("192.168.1.10".parse().unwrap());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_settings_clamp_timeout() {
        let settings = Settings::default();
        assert_eq!(settings.clamp_timeout(None), settings.default_timeout_secs);
        assert_eq!(settings.clamp_timeout(Some(0)), 1);
        assert_eq!(settings.clamp_timeout(Some(10_000)), settings.max_timeout_secs);
        assert_eq!(settings.clamp_timeout(Some(7)), 7);
    }
}
