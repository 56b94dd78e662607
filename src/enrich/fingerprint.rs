//! OS-family fingerprinting from protocol response text
//!
//! Matches UPnP SERVER headers and HTTP banner Server lines against a
//! prioritized pattern table. Specific products come before generic OS
//! families so "Synology" wins over the bare "Linux" it would also match.

use once_cell::sync::Lazy;
use regex::RegexBuilder;

struct OsPattern {
    pattern: regex::Regex,
    os_name: &'static str,
}

fn pattern(re: &str, os_name: &'static str) -> OsPattern {
    OsPattern {
        pattern: RegexBuilder::new(re)
            .case_insensitive(true)
            .build()
            .expect("static OS pattern must compile"),
        os_name,
    }
}

static OS_PATTERNS: Lazy<Vec<OsPattern>> = Lazy::new(|| {
    vec![
        // Specific distributions / products first
        pattern(r"Synology", "Synology DSM (Linux)"),
        pattern(r"QNAP", "QNAP QTS (Linux)"),
        pattern(r"MikroTik", "MikroTik RouterOS"),
        pattern(r"OpenWrt", "OpenWrt (Linux)"),
        pattern(r"DD-WRT", "DD-WRT (Linux)"),
        pattern(r"Ubiquiti|UniFi", "Ubiquiti (Linux)"),
        pattern(r"FreeNAS|TrueNAS", "TrueNAS (FreeBSD)"),
        pattern(r"pfSense", "pfSense (FreeBSD)"),
        pattern(r"ESXi|VMware", "VMware ESXi"),
        pattern(r"Cisco", "Cisco IOS"),
        pattern(r"Roku", "Roku OS"),
        pattern(r"Tizen", "Samsung Tizen"),
        pattern(r"webOS", "LG webOS"),
        pattern(r"Android", "Android"),
        pattern(r"AirPort", "Apple AirPort"),
        // Generic OS families
        pattern(r"Ubuntu", "Linux (Ubuntu)"),
        pattern(r"Debian", "Linux (Debian)"),
        pattern(r"CentOS|Red\s?Hat|RHEL", "Linux (RHEL)"),
        pattern(r"Fedora", "Linux (Fedora)"),
        pattern(r"Arch\s?Linux", "Linux (Arch)"),
        pattern(r"Linux", "Linux"),
        pattern(r"FreeBSD", "FreeBSD"),
        pattern(r"Windows\s*NT\s*10", "Windows 10/11"),
        pattern(r"Windows\s*NT\s*6\.3", "Windows 8.1"),
        pattern(r"Windows\s*NT\s*6\.[12]", "Windows 7/8"),
        pattern(r"Windows", "Windows"),
        pattern(r"Darwin|macOS|Mac\s?OS", "macOS"),
        pattern(r"iPhone\s?OS|iOS", "iOS"),
    ]
});

/// Match one text against the pattern table.
pub fn match_os(text: &str) -> Option<&'static str> {
    OS_PATTERNS
        .iter()
        .find(|p| p.pattern.is_match(text))
        .map(|p| p.os_name)
}

/// Guess an OS family from a SERVER header and any captured banners.
///
/// The SERVER header is examined first, then the Server: lines inside
/// HTTP banners; the first hit wins.
pub fn guess_os<'a, I>(server_header: Option<&str>, banners: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidates: Vec<String> = Vec::new();
    if let Some(server) = server_header {
        candidates.push(server.to_string());
    }
    for banner in banners {
        for line in banner.lines() {
            if line.to_ascii_lowercase().starts_with("server:") {
                if let Some((_, value)) = line.split_once(':') {
                    candidates.push(value.trim().to_string());
                }
            }
        }
    }

    candidates
        .iter()
        .find_map(|text| match_os(text))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specific_products_beat_generic_families() {
        assert_eq!(match_os("Synology DSM 7.2 Linux"), Some("Synology DSM (Linux)"));
        assert_eq!(match_os("Linux/5.10 UPnP/1.0"), Some("Linux"));
        assert_eq!(match_os("MikroTik RouterOS v7"), Some("MikroTik RouterOS"));
    }

    #[test]
    fn test_windows_versions() {
        assert_eq!(match_os("Windows NT 10.0"), Some("Windows 10/11"));
        assert_eq!(match_os("Windows NT 6.1"), Some("Windows 7/8"));
        assert_eq!(match_os("Microsoft-Windows/10.0 UPnP/1.0"), Some("Windows 10/11"));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(match_os("TotallyUnknownFirmware/1.0"), None);
    }

    #[test]
    fn test_guess_prefers_server_header() {
        let banner = "HTTP/1.0 200 OK\r\nServer: nginx (Ubuntu)\r\n\r\n";
        let guess = guess_os(Some("Roku UPnP/1.0"), [banner]);
        assert_eq!(guess.as_deref(), Some("Roku OS"));
    }

    #[test]
    fn test_guess_falls_back_to_banner_server_lines() {
        let banner = "HTTP/1.0 200 OK\r\nserver: Apache (Debian)\r\n\r\n";
        let guess = guess_os(None, [banner]);
        assert_eq!(guess.as_deref(), Some("Linux (Debian)"));
    }

    #[test]
    fn test_guess_ignores_non_server_banner_text() {
        let banner = "220 debian ftp ready"; // body text, not a Server: line
        assert_eq!(guess_os(None, [banner]), None);
    }
}
