use crate::cursor::PortCursor;
use crate::error::{Result, ScanError};
use crate::types::{OpenPort, ProbeOutcome, ScanReport, ScanRequest};
use ::time::{format_description::well_known, OffsetDateTime};
use log::{debug, info, trace, warn};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Upper bound on bytes kept per open port. Bytes past this are still read
/// (and still reset the idle timer) but dropped.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;

// errno values for "too many open files" (process / system), same on Linux and the BSDs.
const EMFILE: i32 = 24;
const ENFILE: i32 = 23;

/// Scan every port of `request` with `request.worker_count()` workers sharing one cursor.
///
/// - Each worker claims ports until the cursor is exhausted.
/// - Connects are bounded by the request's connect timeout.
/// - A port counts as open only when the read phase idles out after a
///   successful connect. A peer that closes first is not reported.
/// - Per-port failures are absorbed. Host resolution failures, running out of
///   file descriptors and worker task failures surface as errors.
pub async fn scan(request: &ScanRequest) -> Result<ScanReport> {
    scan_internal(request, None, None).await
}

/// Variant that accepts a `CancellationToken`. Once cancelled, workers stop
/// claiming new ports and the in-flight probes run to completion.
pub async fn scan_with_cancel(
    request: &ScanRequest,
    cancel: CancellationToken,
) -> Result<ScanReport> {
    scan_internal(request, Some(cancel), None).await
}

/// Counters and result collector shared by all workers of one scan.
#[derive(Clone, Debug)]
pub struct SharedProgress {
    pub probed: Arc<AtomicU64>,
    pub open_count: Arc<AtomicU64>,
    entries: Arc<Mutex<Vec<OpenPort>>>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self {
            probed: Arc::new(AtomicU64::new(0)),
            open_count: Arc::new(AtomicU64::new(0)),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn record_open(&self, port: u16, response: Vec<u8>) {
        self.open_count.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().await.push(OpenPort { port, response });
    }

    /// Take everything collected so far. Called once, after all workers joined.
    async fn drain(&self) -> Vec<OpenPort> {
        std::mem::take(&mut *self.entries.lock().await)
    }
}

impl Default for SharedProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Variant that exposes live counters through `shared` while the scan runs.
pub async fn scan_with_shared(
    request: &ScanRequest,
    cancel: CancellationToken,
    shared: SharedProgress,
) -> Result<ScanReport> {
    scan_internal(request, Some(cancel), Some(shared)).await
}

async fn scan_internal(
    request: &ScanRequest,
    cancel_opt: Option<CancellationToken>,
    shared_opt: Option<SharedProgress>,
) -> Result<ScanReport> {
    let ip = resolve_host(request.host()).await?;
    let shared = shared_opt.unwrap_or_default();
    let cancel = cancel_opt.unwrap_or_default();
    let cursor = Arc::new(PortCursor::new(request.start_port(), request.end_port()));

    let started_at = now_iso_like();
    let start = Instant::now();
    info!(
        "scanning {} ({}) ports {}-{} with {} workers, connect timeout {:?}, idle timeout {:?}",
        request.host(),
        ip,
        request.start_port(),
        request.end_port(),
        request.worker_count(),
        request.connect_timeout(),
        request.idle_timeout()
    );

    let mut set = JoinSet::new();
    for worker_id in 0..request.worker_count() {
        set.spawn(run_worker(
            worker_id,
            ip,
            cursor.clone(),
            request.connect_timeout(),
            request.idle_timeout(),
            cancel.clone(),
            shared.clone(),
        ));
    }

    let mut failure: Option<ScanError> = None;
    while let Some(res) = set.join_next().await {
        let err = match res {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) if e.is_cancelled() => continue,
            Err(e) => ScanError::Worker(e),
        };
        warn!("aborting scan: {err}");
        set.abort_all();
        if failure.is_none() {
            failure = Some(err);
        }
    }
    if let Some(err) = failure {
        return Err(err);
    }

    let mut open = shared.drain().await;
    open.sort_by_key(|o| o.port);
    let probed = shared.probed.load(Ordering::Relaxed);
    let cancelled = cancel.is_cancelled() && probed < request.total_ports();
    let elapsed_ms = start.elapsed().as_millis() as u64;
    info!(
        "scan of {} finished in {} ms: {} of {} ports probed, {} open{}",
        request.host(),
        elapsed_ms,
        probed,
        request.total_ports(),
        open.len(),
        if cancelled { " (cancelled)" } else { "" }
    );

    Ok(ScanReport {
        host: request.host().to_string(),
        start_port: request.start_port(),
        end_port: request.end_port(),
        total: request.total_ports(),
        probed,
        cancelled,
        started_at,
        elapsed_ms,
        open,
    })
}

async fn run_worker(
    worker_id: usize,
    ip: IpAddr,
    cursor: Arc<PortCursor>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    cancel: CancellationToken,
    shared: SharedProgress,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            trace!("worker {worker_id}: cancelled");
            break;
        }
        let Some(port) = cursor.claim() else {
            trace!("worker {worker_id}: cursor exhausted");
            break;
        };
        trace!("worker {worker_id}: claimed port {port}");

        let outcome = probe_port(SocketAddr::new(ip, port), connect_timeout, idle_timeout).await?;
        shared.probed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            ProbeOutcome::Open { port, response } => {
                debug!("port {port} open ({} bytes received)", response.len());
                shared.record_open(port, response).await;
            }
            ProbeOutcome::Closed { port } => {
                trace!("port {port} closed");
            }
            ProbeOutcome::Errored { port, cause } => {
                debug!("port {port} read failed after connect: {cause}");
            }
        }
    }
    Ok(())
}

/// Probe a single address: connect within `connect_timeout`, then read until
/// the peer stays quiet for `idle_timeout`.
///
/// Only the idle-out ends in [`ProbeOutcome::Open`]. A peer that accepts and
/// then closes before going idle yields [`ProbeOutcome::Closed`], so services
/// that answer and hang up immediately are not reported.
///
/// Running out of file descriptors is not a property of the port, so it is
/// returned as [`ScanError::ResourceExhausted`] instead of a `Closed` outcome.
pub async fn probe_port(
    addr: SocketAddr,
    connect_timeout: Duration,
    idle_timeout: Duration,
) -> Result<ProbeOutcome> {
    let port = addr.port();
    let mut stream = match time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) if is_fd_exhaustion(&e) => {
            return Err(ScanError::ResourceExhausted { port, source: e });
        }
        Ok(Err(e)) => {
            trace!("connect {addr}: {e}");
            return Ok(ProbeOutcome::Closed { port });
        }
        Err(_) => {
            trace!("connect {addr}: timed out after {connect_timeout:?}");
            return Ok(ProbeOutcome::Closed { port });
        }
    };

    let mut response = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match time::timeout(idle_timeout, stream.read(&mut buf)).await {
            Err(_) => return Ok(ProbeOutcome::Open { port, response }),
            Ok(Ok(0)) => return Ok(ProbeOutcome::Closed { port }),
            Ok(Ok(n)) => {
                let room = MAX_RESPONSE_BYTES - response.len();
                response.extend_from_slice(&buf[..n.min(room)]);
            }
            Ok(Err(e)) => {
                return Ok(ProbeOutcome::Errored {
                    port,
                    cause: e.to_string(),
                })
            }
        }
    }
}

fn is_fd_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(EMFILE) | Some(ENFILE))
}

/// Resolve `host` to the address all workers connect to. Literal IPs
/// (optionally bracketed IPv6) skip DNS.
pub async fn resolve_host(host: &str) -> Result<IpAddr> {
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(ip);
    }

    let resolve_err = |source| ScanError::Resolve {
        host: host.to_string(),
        source,
    };
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(resolve_err)?;
    addrs
        .next()
        .map(|a| a.ip())
        .ok_or_else(|| resolve_err(io::Error::new(io::ErrorKind::NotFound, "no addresses found")))
}

fn now_iso_like() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
