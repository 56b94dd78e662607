//! Discovery orchestration
//!
//! Runs the selected probers as independent concurrent tasks under one
//! shared deadline, propagates cancellation to every suspension point and
//! assembles whatever each prober accumulated into a `UnifiedResult`.
//! Partial results are not an error state; an empty list for a protocol is
//! a valid outcome.

use crate::config::{ScanRequest, Settings, ENRICHMENT_GRACE, Protocol};
use crate::enrich::Enricher;
use crate::model::UnifiedResult;
use crate::probe::{mdns::MdnsProber, upnp::UpnpProber, wsd::WsdProber};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

/// Terminal state of one scan, for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Completed,
    TimedOut,
    Cancelled,
}

/// Margin past the enrichment grace before a wedged prober task is aborted
const HARD_STOP_MARGIN: Duration = Duration::from_secs(1);

/// Discovery orchestrator
///
/// Cheap to construct; every `run` call owns its sockets and tasks, so one
/// engine can serve concurrent scans.
pub struct DiscoveryEngine {
    settings: Settings,
    upnp_target: Option<SocketAddr>,
    wsd_target: Option<SocketAddr>,
}

impl DiscoveryEngine {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            upnp_target: None,
            wsd_target: None,
        }
    }

    /// Point the SSDP prober at a simulated responder.
    pub fn with_upnp_target(mut self, target: SocketAddr) -> Self {
        self.upnp_target = Some(target);
        self
    }

    /// Point the WS-Discovery prober at a simulated responder.
    pub fn with_wsd_target(mut self, target: SocketAddr) -> Self {
        self.wsd_target = Some(target);
        self
    }

    /// Run one discovery scan.
    ///
    /// Returns within `request.timeout` plus the enrichment grace, whether
    /// results arrive, the deadline elapses or `cancel` fires. Only
    /// validation failures surface as errors.
    pub async fn run(
        &self,
        request: ScanRequest,
        cancel: CancellationToken,
    ) -> crate::Result<UnifiedResult> {
        request.validate()?;

        let deadline = Instant::now() + request.timeout();
        let hard_stop = deadline + ENRICHMENT_GRACE + HARD_STOP_MARGIN;

        // One enricher per scan: the fetch-concurrency cap is shared by
        // all probers. A client build failure degrades to no enrichment.
        let enricher: Option<Arc<Enricher>> = if request.enrich {
            match Enricher::new(self.settings.enrichment_workers) {
                Ok(enricher) => Some(Arc::new(enricher)),
                Err(e) => {
                    log::warn!("enrichment disabled for this scan: {}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!(
            "starting {} scan, timeout {}s, enrich={}",
            request.protocol.name(),
            request.timeout_secs,
            request.enrich
        );

        let upnp_handle = request.protocol.includes(Protocol::Upnp).then(|| {
            let mut prober = UpnpProber::from_request(&request);
            if let Some(target) = self.upnp_target {
                prober = prober.with_target(target);
            }
            let cancel = cancel.clone();
            let enricher = enricher.clone();
            tokio::spawn(async move { prober.probe(deadline, &cancel, enricher).await })
        });

        let mdns_handle = request.protocol.includes(Protocol::Mdns).then(|| {
            let prober = MdnsProber::from_request(&request);
            let cancel = cancel.clone();
            let enricher = enricher.clone();
            tokio::spawn(async move { prober.probe(deadline, &cancel, enricher).await })
        });

        let wsd_handle = request.protocol.includes(Protocol::Wsd).then(|| {
            let mut prober = WsdProber::from_request(&request);
            if let Some(target) = self.wsd_target {
                prober = prober.with_target(target);
            }
            let cancel = cancel.clone();
            let enricher = enricher.clone();
            tokio::spawn(async move { prober.probe(deadline, &cancel, enricher).await })
        });

        // Probers unwind on their own at the deadline or on cancellation,
        // carrying their partial results out through the join. The hard
        // stop only guards against a wedged task.
        let result = UnifiedResult {
            upnp: collect(upnp_handle, hard_stop, "upnp").await,
            mdns: collect(mdns_handle, hard_stop, "mdns").await,
            wsd: collect(wsd_handle, hard_stop, "wsd").await,
        };

        let terminal = if cancel.is_cancelled() {
            Terminal::Cancelled
        } else if Instant::now() >= deadline {
            Terminal::TimedOut
        } else {
            Terminal::Completed
        };
        log::info!(
            "scan finished ({:?}): {} upnp, {} mdns, {} wsd",
            terminal,
            result.upnp.len(),
            result.mdns.len(),
            result.wsd.len()
        );

        Ok(result)
    }
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

/// Join one prober task, giving up (and aborting it) at the hard stop.
async fn collect<T>(
    handle: Option<JoinHandle<Vec<T>>>,
    hard_stop: Instant,
    protocol: &str,
) -> Vec<T> {
    let Some(mut handle) = handle else {
        return Vec::new();
    };
    match timeout_at(hard_stop, &mut handle).await {
        Ok(Ok(devices)) => devices,
        Ok(Err(e)) => {
            log::error!("{} prober task failed: {}", protocol, e);
            Vec::new()
        }
        Err(_) => {
            log::error!("{} prober exceeded the hard stop, aborting", protocol);
            handle.abort();
            Vec::new()
        }
    }
}

/// Run one discovery scan with ambient settings.
///
/// The sole entry point for callers that do not hold an engine.
pub async fn run_discovery(
    request: ScanRequest,
    cancel: CancellationToken,
) -> crate::Result<UnifiedResult> {
    DiscoveryEngine::new(Settings::load()).run(request, cancel).await
}
