//! Rule-based device taxonomy
//!
//! Classifies a device into a category (camera, printer, nas, ...) by
//! matching all accumulated metadata against a prioritized rule database.
//! Runs as the last enrichment stage so banners, TXT records and scope
//! URIs are all available to the rules.

use crate::model::{DeviceRecord, Fingerprint};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Single classification rule; higher priority is checked first.
pub struct TaxonomyRule {
    pub category: &'static str,
    pub tags: &'static [&'static str],
    patterns: Vec<Regex>,
    pub priority: i32,
}

fn rule(
    category: &'static str,
    tags: &'static [&'static str],
    patterns: &[&str],
    priority: i32,
) -> TaxonomyRule {
    TaxonomyRule {
        category,
        tags,
        patterns: patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .expect("static taxonomy pattern must compile")
            })
            .collect(),
        priority,
    }
}

static TAXONOMY_RULES: Lazy<Vec<TaxonomyRule>> = Lazy::new(|| {
    let mut rules = vec![
        rule(
            "camera",
            &["surveillance", "video", "onvif"],
            &[
                r"onvif|ipcam|hikvision|dahua|axis|amcrest|reolink|vivotek|foscam|camera|webcam|NetworkVideoTransmitter",
                r"\brtsp\b",
            ],
            10,
        ),
        rule(
            "nas",
            &["storage", "file-server"],
            &[
                r"synology|qnap|nas\b|ReadyNAS|netgear.*(stor|nas)|wd.*my.*cloud|drobo|asustor|freenas|truenas",
                r"_smb\._tcp|_afpovertcp\._tcp|_nfs\._tcp",
            ],
            9,
        ),
        rule(
            "printer",
            &["printing"],
            &[
                r"_ipp\._tcp|_printer\._tcp|_pdl-datastream\._tcp",
                r"printer|brother|canon|epson|hp.*jet|lexmark|xerox|ricoh|kyocera|sharp.*mx|oki\b",
            ],
            8,
        ),
        rule(
            "smart-home-hub",
            &["smart-home", "automation"],
            &[
                r"home.?assistant|hass\b|hubitat|smartthings|wink|vera|homey|openhab|domoticz",
                r"_hap\._tcp|homekit|zigbee.*(gate|bridge|hub)|z-wave",
            ],
            7,
        ),
        rule(
            "mqtt-broker",
            &["iot", "messaging", "mqtt"],
            &[
                r"mosquitto|emqx|hivemq|vernemq|rabbitmq.*mqtt|activemq",
                r"mqtt.*broker|broker.*1883",
            ],
            7,
        ),
        rule(
            "coap-device",
            &["iot", "constrained", "coap"],
            &[r"coap|oic\.|ocf\.|lwm2m|ipso", r"contiki|riot-os|zephyr|mbed"],
            6,
        ),
        rule(
            "media",
            &["streaming", "entertainment"],
            &[
                r"chromecast|roku|apple.*tv|fire.*tv|plex|sonos|kodi|dlna|upnp.*media|_airplay|_googlecast",
                r"MediaRenderer|MediaServer|_raop\._tcp",
            ],
            5,
        ),
        rule(
            "router",
            &["networking", "infrastructure"],
            &[
                r"router|gateway|InternetGatewayDevice|WANIPConnection|WANDevice",
                r"mikrotik|ubiquiti|unifi|netgear|tp-link|asus.*rt-|linksys|openwrt|dd-wrt|cisco|meraki",
            ],
            5,
        ),
        rule(
            "smart-speaker",
            &["voice-assistant", "smart-home"],
            &[r"echo|alexa|google.*home|google.*nest|homepod"],
            4,
        ),
        rule(
            "industrial",
            &["iot", "scada", "plc"],
            &[r"modbus|bacnet|siemens|schneider|allen.?bradley|plc|scada|industrial|rockwell"],
            4,
        ),
        rule(
            "smart-tv",
            &["display", "entertainment"],
            &[
                r"samsung.*tv|lg.*tv|sony.*bravia|vizio|tcl|hisense|roku.*tv|android.*tv|webos|tizen",
                r"urn:.*television|urn:.*tv",
            ],
            3,
        ),
        rule(
            "iot-device",
            &["iot", "embedded"],
            &[r"esp32|esp8266|arduino|raspberry|tasmota|shelly|tuya|mqtt|zigbee"],
            2,
        ),
        rule(
            "computer",
            &["workstation"],
            &[r"_workstation\._tcp|_smb\._tcp.*windows|_rdp\._tcp"],
            1,
        ),
    ];
    rules.sort_by_key(|r| -r.priority);
    rules
});

/// Classify a device from its record and accumulated fingerprint data.
///
/// Returns the matched category and tags, or `None` when no rule matches.
pub fn classify(record: &DeviceRecord, fingerprint: &Fingerprint) -> Option<(String, Vec<String>)> {
    let blob = search_blob(record, fingerprint);
    TAXONOMY_RULES
        .iter()
        .find(|rule| rule.patterns.iter().any(|p| p.is_match(&blob)))
        .map(|rule| {
            (
                rule.category.to_string(),
                rule.tags.iter().map(|t| t.to_string()).collect(),
            )
        })
}

/// Concatenate all metadata into one searchable string.
fn search_blob(record: &DeviceRecord, fingerprint: &Fingerprint) -> String {
    let mut parts: Vec<String> = vec![
        fingerprint.friendly_name.clone().unwrap_or_default(),
        fingerprint.manufacturer.clone().unwrap_or_default(),
        fingerprint.model.clone().unwrap_or_default(),
        fingerprint.firmware_version.clone().unwrap_or_default(),
        fingerprint.os_guess.clone().unwrap_or_default(),
    ];
    parts.extend(fingerprint.tags.iter().cloned());
    parts.extend(fingerprint.banners.values().cloned());
    for service in &fingerprint.services {
        parts.push(service.name.clone());
        if let Some(banner) = &service.banner {
            parts.push(banner.clone());
        }
    }

    match record {
        DeviceRecord::Upnp(d) => {
            parts.push(d.name.clone().unwrap_or_default());
            parts.push(d.device_type.clone().unwrap_or_default());
            parts.extend(d.headers.values().cloned());
        }
        DeviceRecord::Mdns(s) => {
            parts.push(s.name.clone());
            parts.push(s.service_type.clone());
            parts.extend(s.properties.iter().map(|(k, v)| format!("{}={}", k, v)));
        }
        DeviceRecord::Wsd(d) => {
            parts.push(d.response.clone());
        }
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MdnsService, UpnpDevice, WsdDevice};

    #[test]
    fn test_rules_are_priority_sorted() {
        let priorities: Vec<i32> = TAXONOMY_RULES.iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_by_key(|p| -p);
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn test_onvif_scope_classifies_as_camera() {
        let record = DeviceRecord::Wsd(WsdDevice {
            address: "192.168.1.64".into(),
            response: "<d:Scopes>onvif://www.onvif.org/type/NetworkVideoTransmitter</d:Scopes>"
                .into(),
            fingerprint: None,
        });
        let (category, tags) = classify(&record, &Fingerprint::default()).unwrap();
        assert_eq!(category, "camera");
        assert!(tags.contains(&"onvif".to_string()));
    }

    #[test]
    fn test_ipp_service_classifies_as_printer() {
        let record = DeviceRecord::Mdns(MdnsService {
            name: "Laser._ipp._tcp.local.".into(),
            service_type: "_ipp._tcp.local.".into(),
            ..Default::default()
        });
        let (category, _) = classify(&record, &Fingerprint::default()).unwrap();
        assert_eq!(category, "printer");
    }

    #[test]
    fn test_camera_outranks_media_on_combined_metadata() {
        // Matches both the rtsp camera pattern and the media pattern;
        // the higher-priority camera rule must win.
        let fingerprint = Fingerprint {
            banners: [(554, "RTSP/1.0 200 OK dlna".to_string())].into(),
            ..Default::default()
        };
        let record = DeviceRecord::Upnp(UpnpDevice {
            address: "10.0.0.8".into(),
            ..Default::default()
        });
        let (category, _) = classify(&record, &fingerprint).unwrap();
        assert_eq!(category, "camera");
    }

    #[test]
    fn test_unmatched_device_yields_none() {
        let record = DeviceRecord::Upnp(UpnpDevice {
            address: "10.0.0.9".into(),
            ..Default::default()
        });
        assert!(classify(&record, &Fingerprint::default()).is_none());
    }

    #[test]
    fn test_igd_classifies_as_router() {
        let record = DeviceRecord::Upnp(UpnpDevice {
            address: "192.168.1.1".into(),
            st: Some("urn:schemas-upnp-org:device:InternetGatewayDevice:1".into()),
            headers: [(
                "ST".to_string(),
                "urn:schemas-upnp-org:device:InternetGatewayDevice:1".to_string(),
            )]
            .into(),
            ..Default::default()
        });
        let (category, _) = classify(&record, &Fingerprint::default()).unwrap();
        assert_eq!(category, "router");
    }
}
