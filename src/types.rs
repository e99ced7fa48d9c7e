use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::{Result, ScanError};

/// Idle-read bound applied after a successful connect.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Validated, immutable description of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    host: String,
    start_port: u16,
    end_port: u16,
    concurrency: usize,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl ScanRequest {
    /// Build a request, enforcing `1 <= start <= end`, `concurrency >= 1`
    /// and a non-zero connect timeout.
    pub fn new(
        host: impl Into<String>,
        start_port: u16,
        end_port: u16,
        concurrency: usize,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() || host.chars().any(char::is_whitespace) {
            return Err(ScanError::InvalidHost(host));
        }
        if start_port == 0 {
            return Err(ScanError::InvalidPort(start_port.to_string()));
        }
        if start_port > end_port {
            return Err(ScanError::InvalidRange {
                start: start_port,
                end: end_port,
            });
        }
        if concurrency == 0 {
            return Err(ScanError::InvalidConcurrency);
        }
        if connect_timeout.is_zero() {
            return Err(ScanError::InvalidTimeout("connect timeout must be positive".into()));
        }
        Ok(Self {
            host,
            start_port,
            end_port,
            concurrency,
            connect_timeout,
            idle_timeout: IDLE_TIMEOUT,
        })
    }

    /// Override the idle-read bound (defaults to [`IDLE_TIMEOUT`]).
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Result<Self> {
        if idle_timeout.is_zero() {
            return Err(ScanError::InvalidTimeout("idle timeout must be positive".into()));
        }
        self.idle_timeout = idle_timeout;
        Ok(self)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn start_port(&self) -> u16 {
        self.start_port
    }

    pub fn end_port(&self) -> u16 {
        self.end_port
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Workers actually spawned: never more than there are ports to claim.
    pub fn worker_count(&self) -> usize {
        usize::try_from(self.total_ports()).map_or(self.concurrency, |n| self.concurrency.min(n))
    }

    /// Number of ports in the inclusive range.
    pub fn total_ports(&self) -> u64 {
        u64::from(self.end_port) - u64::from(self.start_port) + 1
    }
}

/// Classification of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Connected, then the read phase idled out. `response` holds whatever
    /// arrived before going quiet.
    Open { port: u16, response: Vec<u8> },
    /// Connect failed or timed out, or the peer closed before idling out.
    Closed { port: u16 },
    /// Connected, then the read phase hit an I/O error.
    Errored { port: u16, cause: String },
}

impl ProbeOutcome {
    pub fn is_open(&self) -> bool {
        matches!(self, ProbeOutcome::Open { .. })
    }
}

/// One open-port record held by the result collector.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OpenPort {
    pub port: u16,
    #[serde(serialize_with = "serialize_lossy")]
    pub response: Vec<u8>,
}

impl OpenPort {
    /// Lossy UTF-8 rendering of the captured bytes with CR/LF escaped so the
    /// preview stays on one line. `None` when nothing was received.
    pub fn preview(&self) -> Option<String> {
        if self.response.is_empty() {
            return None;
        }
        let s = String::from_utf8_lossy(&self.response);
        Some(s.replace('\r', "\\r").replace('\n', "\\n"))
    }
}

fn serialize_lossy<S: Serializer>(bytes: &[u8], ser: S) -> std::result::Result<S::Ok, S::Error> {
    ser.serialize_str(&String::from_utf8_lossy(bytes))
}

/// Aggregate outcome of a finished (or cancelled) scan.
#[derive(Serialize, Debug, Clone)]
pub struct ScanReport {
    pub host: String,
    pub start_port: u16,
    pub end_port: u16,
    pub total: u64,
    pub probed: u64,
    pub cancelled: bool,
    pub started_at: String,
    pub elapsed_ms: u64,
    /// Sorted by port number.
    pub open: Vec<OpenPort>,
}

impl ScanReport {
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_ports(&self) -> Vec<u16> {
        self.open.iter().map(|o| o.port).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_rejects_bad_input() {
        let t = Duration::from_secs(1);
        assert!(matches!(
            ScanRequest::new("h", 10, 9, 1, t),
            Err(ScanError::InvalidRange { start: 10, end: 9 })
        ));
        assert!(matches!(ScanRequest::new("h", 0, 9, 1, t), Err(ScanError::InvalidPort(_))));
        assert!(matches!(ScanRequest::new("h", 1, 9, 0, t), Err(ScanError::InvalidConcurrency)));
        assert!(matches!(ScanRequest::new("", 1, 9, 1, t), Err(ScanError::InvalidHost(_))));
        assert!(matches!(
            ScanRequest::new("h", 1, 9, 1, Duration::ZERO),
            Err(ScanError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn request_defaults_idle_timeout() {
        let req = ScanRequest::new("127.0.0.1", 1, 65535, 100, Duration::from_secs(5)).unwrap();
        assert_eq!(req.idle_timeout(), IDLE_TIMEOUT);
        assert_eq!(req.total_ports(), 65535);
        assert_eq!(req.worker_count(), 100);
    }

    #[test]
    fn worker_count_capped_by_range() {
        let req = ScanRequest::new("h", 8000, 8002, usize::MAX, Duration::from_secs(1)).unwrap();
        assert_eq!(req.concurrency(), usize::MAX);
        assert_eq!(req.worker_count(), 3);
    }

    #[test]
    fn preview_escapes_line_breaks() {
        let open = OpenPort {
            port: 22,
            response: b"SSH-2.0-OpenSSH\r\n".to_vec(),
        };
        assert_eq!(open.preview().as_deref(), Some("SSH-2.0-OpenSSH\\r\\n"));
        let silent = OpenPort { port: 80, response: Vec::new() };
        assert_eq!(silent.preview(), None);
    }
}
