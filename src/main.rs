use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use portprobe::error::ScanError;
use portprobe::types::ScanRequest;
use portprobe::{limits, ports, report, scanner};

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use tokio_util::sync::CancellationToken;

/// Scan a host for listening TCP ports.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "portprobe",
    version,
    about = "Scan for listening TCP ports on a host.",
    after_help = "The <RANGE> is in form of 'start-end'. Default is 1-65535 if not specified."
)]
struct Cli {
    /// Host name or IP address to scan.
    host: String,

    /// Port range `start-end`; either half may be omitted.
    range: Option<String>,

    /// Number of concurrent scanners.
    #[arg(short, long, default_value_t = 100)]
    concurrency: usize,

    /// Connection timeout in seconds (the idle read after connecting is fixed at 5s).
    #[arg(short, long, default_value_t = 5.0)]
    timeout: f64,

    /// Also write the report as pretty JSON to this path.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let request = build_request(&cli)?;
    check_fd_limit(request.worker_count());

    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, finishing in-flight probes");
            cancel_ctrlc.cancel();
        }
    });

    let results = scanner::scan_with_cancel(&request, cancel)
        .await
        .context("scan failed")?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    report::write_text(&mut out, &results)?;
    out.flush()?;

    if let Some(path) = cli.output.as_deref() {
        report::write_json(path, &results)?;
        log::info!("wrote JSON report to {}", path.display());
    }

    Ok(())
}

fn build_request(cli: &Cli) -> Result<ScanRequest> {
    let (start, end) = ports::parse_port_range(cli.range.as_deref())?;
    let timeout = Duration::try_from_secs_f64(cli.timeout)
        .map_err(|e| ScanError::InvalidTimeout(format!("{}: {e}", cli.timeout)))?;
    let request = ScanRequest::new(cli.host.clone(), start, end, cli.concurrency, timeout)?;
    Ok(request)
}

fn check_fd_limit(workers: usize) {
    match limits::raise_fd_limit(workers) {
        Ok(limit) if limits::fits(limit, workers) => {
            log::debug!("open file limit {limit} is enough for {workers} workers");
        }
        Ok(limit) => log::warn!(
            "open file limit {limit} is low for {workers} workers; \
             the scan aborts if descriptors run out (lower --concurrency)"
        ),
        Err(e) => log::warn!("could not adjust the open file limit: {e}"),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("portprobe").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_usage() {
        let cli = parse(&["127.0.0.1"]);
        let req = build_request(&cli).unwrap();
        assert_eq!((req.start_port(), req.end_port()), (1, 65535));
        assert_eq!(req.concurrency(), 100);
        assert_eq!(req.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn short_flags_and_range() {
        let cli = parse(&["example.com", "8000-8002", "-c", "3", "-t", "0.5"]);
        let req = build_request(&cli).unwrap();
        assert_eq!(req.host(), "example.com");
        assert_eq!((req.start_port(), req.end_port()), (8000, 8002));
        assert_eq!(req.concurrency(), 3);
        assert_eq!(req.connect_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn invalid_options_rejected() {
        assert!(build_request(&parse(&["h", "10-1"])).is_err());
        assert!(build_request(&parse(&["h", "--concurrency", "0"])).is_err());
        assert!(build_request(&parse(&["h", "--timeout", "0"])).is_err());
        assert!(build_request(&parse(&["h", "--timeout=-1"])).is_err());
        assert!(Cli::try_parse_from(["portprobe"]).is_err());
    }
}
