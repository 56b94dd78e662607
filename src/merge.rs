//! Identity-keyed merge of repeated scan results
//!
//! Pure function over in-memory data: combines a caller session's
//! accumulated devices with one new `UnifiedResult`. For a key present in
//! both, the incoming record replaces the existing one in full, including
//! any previously attached fingerprint. Holds no network resources and
//! never fails.

use crate::model::{AccumulatedResult, UnifiedResult};
use std::collections::HashMap;

/// Merge a new scan result into the accumulated set.
///
/// First-seen insertion order is retained for known keys; new keys append
/// in the incoming result's order.
pub fn merge(existing: &AccumulatedResult, incoming: &UnifiedResult) -> AccumulatedResult {
    AccumulatedResult {
        upnp: merge_keyed(&existing.upnp, &incoming.upnp, |d| d.identity_key()),
        mdns: merge_keyed(&existing.mdns, &incoming.mdns, |s| s.identity_key()),
        wsd: merge_keyed(&existing.wsd, &incoming.wsd, |d| d.identity_key()),
    }
}

fn merge_keyed<T, F>(existing: &[T], incoming: &[T], key: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> String,
{
    let mut merged: Vec<T> = existing.to_vec();
    let mut index_by_key: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(idx, item)| (key(item), idx))
        .collect();

    for item in incoming {
        match index_by_key.get(&key(item)) {
            Some(&idx) => merged[idx] = item.clone(),
            None => {
                index_by_key.insert(key(item), merged.len());
                merged.push(item.clone());
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Fingerprint, MdnsService, UpnpDevice, WsdDevice};

    fn upnp(usn: &str, location: &str) -> UpnpDevice {
        UpnpDevice {
            address: "10.0.0.5".to_string(),
            usn: Some(usn.to_string()),
            location: Some(location.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_keys_append_in_incoming_order() {
        let existing = AccumulatedResult::default();
        let incoming = UnifiedResult {
            upnp: vec![upnp("uuid:a", "http://a"), upnp("uuid:b", "http://b")],
            ..Default::default()
        };
        let merged = merge(&existing, &incoming);
        assert_eq!(merged.upnp.len(), 2);
        assert_eq!(merged.upnp[0].usn.as_deref(), Some("uuid:a"));
        assert_eq!(merged.upnp[1].usn.as_deref(), Some("uuid:b"));
    }

    #[test]
    fn test_incoming_replaces_existing_in_full() {
        let first = UnifiedResult {
            upnp: vec![upnp("uuid:a", "http://old")],
            ..Default::default()
        };
        let second = UnifiedResult {
            upnp: vec![upnp("uuid:a", "http://new")],
            ..Default::default()
        };
        let merged = merge(&merge(&AccumulatedResult::default(), &first), &second);
        assert_eq!(merged.upnp.len(), 1);
        assert_eq!(merged.upnp[0].location.as_deref(), Some("http://new"));
    }

    #[test]
    fn test_fingerprint_is_fully_superseded() {
        let mut with_fp = upnp("uuid:a", "http://a");
        with_fp.fingerprint = Some(Fingerprint {
            manufacturer: Some("Synology".to_string()),
            ..Default::default()
        });
        let first = UnifiedResult {
            upnp: vec![with_fp],
            ..Default::default()
        };
        // Same identity, no fingerprint this time: absence must win.
        let second = UnifiedResult {
            upnp: vec![upnp("uuid:a", "http://a")],
            ..Default::default()
        };
        let merged = merge(&merge(&AccumulatedResult::default(), &first), &second);
        assert!(merged.upnp[0].fingerprint.is_none());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let incoming = UnifiedResult {
            upnp: vec![upnp("uuid:a", "http://a")],
            mdns: vec![MdnsService {
                name: "cam._http._tcp.local.".to_string(),
                service_type: "_http._tcp.local.".to_string(),
                ..Default::default()
            }],
            wsd: vec![WsdDevice {
                address: "192.168.1.64".to_string(),
                response: "<x/>".to_string(),
                fingerprint: None,
            }],
        };
        let once = merge(&AccumulatedResult::default(), &incoming);
        let twice = merge(&once, &incoming);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_protocols_merge_independently() {
        let first = UnifiedResult {
            upnp: vec![upnp("uuid:a", "http://a")],
            ..Default::default()
        };
        let second = UnifiedResult {
            wsd: vec![WsdDevice {
                address: "192.168.1.64".to_string(),
                response: "<x/>".to_string(),
                fingerprint: None,
            }],
            ..Default::default()
        };
        let merged = merge(&merge(&AccumulatedResult::default(), &first), &second);
        assert_eq!(merged.upnp.len(), 1);
        assert_eq!(merged.wsd.len(), 1);
        assert!(merged.mdns.is_empty());
    }

    #[test]
    fn test_usn_less_devices_keyed_by_address_and_location() {
        let a = UpnpDevice {
            address: "10.0.0.5".to_string(),
            location: Some("http://10.0.0.5/a.xml".to_string()),
            ..Default::default()
        };
        let b = UpnpDevice {
            address: "10.0.0.5".to_string(),
            location: Some("http://10.0.0.5/b.xml".to_string()),
            ..Default::default()
        };
        let incoming = UnifiedResult {
            upnp: vec![a, b],
            ..Default::default()
        };
        let merged = merge(&AccumulatedResult::default(), &incoming);
        // Different locations are distinct devices when USN is absent
        assert_eq!(merged.upnp.len(), 2);
    }
}
