//! Banner probing for common IoT service ports
//!
//! Connects only to addresses already produced by discovery, sends a
//! minimal protocol-appropriate probe and captures a truncated banner.
//! TLS ports get a real handshake (certificates are not verified; IoT
//! devices rarely carry valid ones) so TLS usage and version can be
//! classified.

use crate::model::AuxService;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Longest banner retained, in bytes
pub const MAX_BANNER_LEN: usize = 512;

/// Upper bound for a single port probe
pub const PER_PORT_TIMEOUT: Duration = Duration::from_secs(2);

/// One row of the probe table
#[derive(Debug, Clone, Copy)]
pub struct PortProbe {
    pub port: u16,
    pub name: &'static str,
    /// Bytes written after connect; `{host}` is substituted
    pub probe: &'static [u8],
    pub tls: bool,
}

const HTTP_PROBE: &[u8] = b"GET / HTTP/1.0\r\nHost: {host}\r\n\r\n";

/// Curated set of common IoT / network service ports
pub const BANNER_PORTS: &[PortProbe] = &[
    PortProbe { port: 21, name: "FTP", probe: b"", tls: false },
    PortProbe { port: 22, name: "SSH", probe: b"", tls: false },
    PortProbe { port: 23, name: "Telnet", probe: b"", tls: false },
    PortProbe { port: 80, name: "HTTP", probe: HTTP_PROBE, tls: false },
    PortProbe { port: 443, name: "HTTPS", probe: HTTP_PROBE, tls: true },
    PortProbe { port: 554, name: "RTSP", probe: b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n", tls: false },
    PortProbe { port: 1883, name: "MQTT", probe: b"", tls: false },
    PortProbe { port: 8080, name: "HTTP-Alt", probe: HTTP_PROBE, tls: false },
    PortProbe { port: 8443, name: "HTTPS-Alt", probe: HTTP_PROBE, tls: true },
    PortProbe { port: 8883, name: "MQTT-TLS", probe: b"", tls: true },
];

/// Result of one successful port probe
#[derive(Debug, Clone)]
pub struct BannerResult {
    pub port: u16,
    pub service_name: String,
    pub banner: String,
    pub tls: bool,
    pub tls_version: Option<String>,
}

impl From<BannerResult> for AuxService {
    fn from(result: BannerResult) -> Self {
        AuxService {
            port: result.port,
            name: result.service_name,
            banner: Some(result.banner),
            tls: result.tls,
            tls_version: result.tls_version,
        }
    }
}

/// Probe the banner table (plus `extra_port`, when not already covered)
/// against one host, sequentially with a strict per-port budget.
pub async fn grab_banners(
    host: IpAddr,
    extra_port: Option<u16>,
    budget: Duration,
) -> Vec<BannerResult> {
    let mut table: Vec<PortProbe> = BANNER_PORTS.to_vec();
    if let Some(port) = extra_port {
        if !table.iter().any(|p| p.port == port) {
            table.push(PortProbe {
                port,
                name: "Service",
                probe: HTTP_PROBE,
                tls: false,
            });
        }
    }

    let per_port = PER_PORT_TIMEOUT.min(budget / table.len() as u32);
    let mut results = Vec::new();
    for entry in table {
        if let Some(result) = grab_single(host, entry, per_port).await {
            results.push(result);
        }
    }
    results
}

/// Connect to one port, optionally send the probe, read the banner.
pub async fn grab_single(host: IpAddr, entry: PortProbe, budget: Duration) -> Option<BannerResult> {
    let addr = SocketAddr::new(host, entry.port);
    let probe = substitute_host(entry.probe, host);

    let result = timeout(budget, async {
        if entry.tls {
            grab_tls(addr, &probe, budget).await
        } else {
            grab_plain(addr, &probe).await
        }
    })
    .await;

    match result {
        Ok(Some((banner, tls_version))) if !banner.is_empty() => Some(BannerResult {
            port: entry.port,
            service_name: entry.name.to_string(),
            banner: truncate_banner(&banner),
            tls: entry.tls,
            tls_version,
        }),
        _ => None,
    }
}

async fn grab_plain(addr: SocketAddr, probe: &[u8]) -> Option<(String, Option<String>)> {
    let mut stream = TcpStream::connect(addr).await.ok()?;
    if !probe.is_empty() {
        stream.write_all(probe).await.ok()?;
    }
    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).await.ok()?;
    if n == 0 {
        return None;
    }
    Some((String::from_utf8_lossy(&buf[..n]).trim().to_string(), None))
}

/// TLS handshake with verification disabled, recording the negotiated
/// version. The handshake runs on the std stream with socket timeouts so
/// a stalled peer cannot hold the probe past its budget.
async fn grab_tls(
    addr: SocketAddr,
    probe: &[u8],
    budget: Duration,
) -> Option<(String, Option<String>)> {
    let stream = TcpStream::connect(addr).await.ok()?;
    let probe = probe.to_vec();

    tokio::task::spawn_blocking(move || {
        let std_stream = stream.into_std().ok()?;
        std_stream.set_nonblocking(false).ok()?;
        std_stream.set_read_timeout(Some(budget)).ok()?;
        std_stream.set_write_timeout(Some(budget)).ok()?;

        let mut builder = SslConnector::builder(SslMethod::tls()).ok()?;
        builder.set_verify(SslVerifyMode::NONE);
        let connector = builder.build();

        let mut config = connector.configure().ok()?;
        config.set_use_server_name_indication(false);
        config.set_verify_hostname(false);
        let mut ssl_stream = config.connect(&addr.ip().to_string(), std_stream).ok()?;

        let tls_version = Some(ssl_stream.ssl().version_str().to_string());

        if !probe.is_empty() {
            ssl_stream.write_all(&probe).ok()?;
        }
        let mut buf = [0u8; 1024];
        let n = ssl_stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        Some((
            String::from_utf8_lossy(&buf[..n]).trim().to_string(),
            tls_version,
        ))
    })
    .await
    .ok()
    .flatten()
}

fn substitute_host(probe: &[u8], host: IpAddr) -> Vec<u8> {
    let text = String::from_utf8_lossy(probe);
    text.replace("{host}", &host.to_string()).into_bytes()
}

fn truncate_banner(banner: &str) -> String {
    if banner.len() > MAX_BANNER_LEN {
        let mut cut = MAX_BANNER_LEN;
        while !banner.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &banner[..cut])
    } else {
        banner.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_truncation() {
        let long = "a".repeat(2 * MAX_BANNER_LEN);
        let truncated = truncate_banner(&long);
        assert_eq!(truncated.len(), MAX_BANNER_LEN + 3);
        assert!(truncated.ends_with("..."));

        let short = "SSH-2.0-OpenSSH_9.6";
        assert_eq!(truncate_banner(short), short);
    }

    #[test]
    fn test_host_substitution() {
        let probe = substitute_host(HTTP_PROBE, "10.0.0.5".parse().unwrap());
        let text = String::from_utf8(probe).unwrap();
        assert!(text.contains("Host: 10.0.0.5\r\n"));
        assert!(!text.contains("{host}"));
    }

    #[test]
    fn test_port_table_covers_tls_and_plain() {
        assert!(BANNER_PORTS.iter().any(|p| p.tls));
        assert!(BANNER_PORTS.iter().any(|p| !p.tls));
        // One row per port
        let mut ports: Vec<u16> = BANNER_PORTS.iter().map(|p| p.port).collect();
        ports.dedup();
        assert_eq!(ports.len(), BANNER_PORTS.len());
    }

    #[tokio::test]
    async fn test_grab_single_reads_greeting_banner() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"SSH-2.0-TestServer\r\n").await.unwrap();
        });

        let entry = PortProbe {
            port: addr.port(),
            name: "SSH",
            probe: b"",
            tls: false,
        };
        let result = grab_single(addr.ip(), entry, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.banner, "SSH-2.0-TestServer");
        assert!(!result.tls);
        assert!(result.tls_version.is_none());
    }

    #[tokio::test]
    async fn test_grab_single_none_on_closed_port() {
        // Bind then drop to obtain a port that is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let entry = PortProbe {
            port: addr.port(),
            name: "HTTP",
            probe: HTTP_PROBE,
            tls: false,
        };
        assert!(grab_single(addr.ip(), entry, Duration::from_millis(500))
            .await
            .is_none());
    }
}
