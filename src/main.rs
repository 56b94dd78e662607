use anyhow::Context;
use clap::Parser;
use lantern::{DiscoveryEngine, Protocol, ScanRequest, Settings};
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;

/// Discover LAN devices over SSDP, mDNS and WS-Discovery.
#[derive(Debug, Parser)]
#[command(name = "lantern", version, about)]
struct Args {
    /// Protocol to probe: all, upnp, mdns or wsd
    #[arg(short, long, default_value = "all")]
    protocol: Protocol,

    /// Scan budget in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// mDNS service type to browse, or "all" for the well-known set
    #[arg(long, default_value = "_services._dns-sd._udp.local.")]
    mdns_service: String,

    /// SSDP search target
    #[arg(long)]
    upnp_st: Option<String>,

    /// SSDP MX value (1-5)
    #[arg(long)]
    upnp_mx: Option<u8>,

    /// Multicast TTL for SSDP (1-16)
    #[arg(long)]
    upnp_ttl: Option<u8>,

    /// Multicast TTL for WS-Discovery (1-16)
    #[arg(long)]
    wsd_ttl: Option<u8>,

    /// Local interface address to bind multicast sockets to
    #[arg(long)]
    interface: Option<IpAddr>,

    /// Fetch device fingerprints after discovery
    #[arg(long)]
    enrich: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = Settings::load();

    let mut request = ScanRequest::new(args.protocol)
        .with_timeout(settings.clamp_timeout(args.timeout))
        .with_mdns_service(args.mdns_service)
        .with_upnp_st(args.upnp_st.unwrap_or_else(|| settings.upnp_default_st.clone()))
        .with_upnp_mx(args.upnp_mx.unwrap_or(settings.upnp_default_mx))
        .with_upnp_ttl(args.upnp_ttl.unwrap_or(settings.upnp_default_ttl))
        .with_wsd_ttl(args.wsd_ttl.unwrap_or(settings.upnp_default_ttl))
        .with_enrichment(args.enrich);
    if let Some(addr) = args.interface {
        request = request.with_interface(addr);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received, cancelling scan");
                cancel.cancel();
            }
        });
    }

    let result = DiscoveryEngine::new(settings)
        .run(request, cancel)
        .await
        .context("discovery failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
