use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::types::ScanReport;

/// Render the line-oriented summary:
///
/// ```text
/// Scanned 3 ports from 8000 to 8002 at 127.0.0.1
///   Port 8001
///     Response: hello
/// Found 1 open ports
/// ```
pub fn write_text<W: Write>(out: &mut W, report: &ScanReport) -> io::Result<()> {
    if report.cancelled {
        writeln!(
            out,
            "Scanned {} of {} ports from {} to {} at {} (cancelled)",
            report.probed, report.total, report.start_port, report.end_port, report.host
        )?;
    } else {
        writeln!(
            out,
            "Scanned {} ports from {} to {} at {}",
            report.total, report.start_port, report.end_port, report.host
        )?;
    }
    for entry in &report.open {
        writeln!(out, "  Port {}", entry.port)?;
        if let Some(text) = entry.preview() {
            writeln!(out, "    Response: {text}")?;
        }
    }
    writeln!(out, "Found {} open ports", report.open_count())
}

/// Write the report as pretty JSON to `path`.
pub fn write_json(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create output file: {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)
        .with_context(|| format!("failed to write JSON report: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OpenPort;

    fn sample(open: Vec<OpenPort>, cancelled: bool, probed: u64) -> ScanReport {
        ScanReport {
            host: "127.0.0.1".into(),
            start_port: 8000,
            end_port: 8002,
            total: 3,
            probed,
            cancelled,
            started_at: "2024-01-01T00:00:00Z".into(),
            elapsed_ms: 5000,
            open,
        }
    }

    fn render(report: &ScanReport) -> String {
        let mut buf = Vec::new();
        write_text(&mut buf, report).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn silent_open_port_has_no_response_line() {
        let report = sample(
            vec![OpenPort {
                port: 8001,
                response: Vec::new(),
            }],
            false,
            3,
        );
        assert_eq!(
            render(&report),
            "Scanned 3 ports from 8000 to 8002 at 127.0.0.1\n  Port 8001\nFound 1 open ports\n"
        );
    }

    #[test]
    fn response_preview_is_printed() {
        let report = sample(
            vec![OpenPort {
                port: 8000,
                response: b"220 ready\r\n".to_vec(),
            }],
            false,
            3,
        );
        let text = render(&report);
        assert!(text.contains("  Port 8000\n    Response: 220 ready\\r\\n\n"));
    }

    #[test]
    fn empty_scan_reports_zero() {
        let text = render(&sample(Vec::new(), false, 3));
        assert!(text.ends_with("Found 0 open ports\n"));
    }

    #[test]
    fn cancelled_scan_states_progress() {
        let text = render(&sample(Vec::new(), true, 1));
        assert!(
            text.starts_with("Scanned 1 of 3 ports from 8000 to 8002 at 127.0.0.1 (cancelled)\n")
        );
    }

    #[test]
    fn json_uses_text_response() {
        let report = sample(
            vec![OpenPort {
                port: 8001,
                response: b"hi".to_vec(),
            }],
            false,
            3,
        );
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["open"][0]["port"], 8001);
        assert_eq!(v["open"][0]["response"], "hi");
        assert_eq!(v["total"], 3);
    }
}
