use crate::error::{Result, ScanError};

pub const MIN_PORT: u16 = 1;
pub const MAX_PORT: u16 = 65535;

/// Parse the optional `start-end` positional into an inclusive range.
///
/// Supported forms:
/// - absent or empty: `1-65535`
/// - inclusive range: `8000-8010`
/// - open halves: `-1024` is `1-1024`, `8000-` is `8000-65535`
/// - lone number: `8000` is `8000-65535`
pub fn parse_port_range(s: Option<&str>) -> Result<(u16, u16)> {
    let line = s.map(str::trim).unwrap_or("");
    let (a, b) = match line.split_once('-') {
        Some((a, b)) => (a.trim(), b.trim()),
        None => (line, ""),
    };

    let start = if a.is_empty() { MIN_PORT } else { parse_port_str(a)? };
    let end = if b.is_empty() { MAX_PORT } else { parse_port_str(b)? };
    if start > end {
        return Err(ScanError::InvalidRange { start, end });
    }
    Ok((start, end))
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s
        .parse::<u32>()
        .map_err(|_| ScanError::InvalidPort(s.to_string()))?;
    if val == 0 || val > u32::from(MAX_PORT) {
        return Err(ScanError::InvalidPort(format!("{val} (out of range)")));
    }
    Ok(val as u16)
}
