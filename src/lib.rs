//! Lantern - multi-protocol LAN device discovery
//!
//! Concurrently probes UPnP/SSDP, mDNS/DNS-SD and WS-Discovery under one
//! shared deadline, optionally enriches discovered devices with a
//! safety-constrained metadata fetch, and merges repeated scans by stable
//! device identity.

pub mod config;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod merge;
pub mod model;
pub mod probe;

// Re-export commonly used types
pub use config::{Protocol, ScanRequest, Settings, MAX_TIMEOUT_SECS};
pub use engine::{run_discovery, DiscoveryEngine};
pub use error::{DiscoveryError, DiscoveryResult};
pub use merge::merge;
pub use model::{
    AccumulatedResult, DeviceRecord, Fingerprint, MdnsService, UnifiedResult, UpnpDevice,
    WsdDevice,
};

pub type Result<T> = std::result::Result<T, DiscoveryError>;
