//! Open-file limit handling for large worker pools.

/// Descriptors kept free for the runtime, stdio and the JSON report.
pub const RESERVED_FDS: u64 = 64;

/// Raise the soft `RLIMIT_NOFILE` so `workers` sockets can be open at once,
/// never above the hard limit and never lowering it. Returns the soft limit
/// in effect afterwards.
#[cfg(unix)]
pub fn raise_fd_limit(workers: usize) -> std::io::Result<u64> {
    use rlimit::Resource;

    let wanted = (workers as u64).saturating_add(RESERVED_FDS);
    let (soft, hard) = Resource::NOFILE.get()?;
    if soft >= wanted {
        return Ok(soft);
    }
    let target = wanted.min(hard);
    Resource::NOFILE.set(target, hard)?;
    Ok(target)
}

#[cfg(not(unix))]
pub fn raise_fd_limit(_workers: usize) -> std::io::Result<u64> {
    Ok(u64::MAX)
}

/// Whether `limit` leaves room for `workers` concurrent sockets.
pub fn fits(limit: u64, workers: usize) -> bool {
    limit >= (workers as u64).saturating_add(RESERVED_FDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_accounts_for_reserve() {
        assert!(fits(1024, 100));
        assert!(!fits(256, 500));
        assert!(!fits(100, 100));
        assert!(fits(u64::MAX, usize::MAX));
    }

    #[cfg(unix)]
    #[test]
    fn raising_never_lowers_the_limit() {
        let (before, _) = rlimit::Resource::NOFILE.get().unwrap();
        let after = raise_fd_limit(1).unwrap();
        assert!(after >= before);
        let (now, _) = rlimit::Resource::NOFILE.get().unwrap();
        assert_eq!(now, after);
    }
}
