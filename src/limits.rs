use std::io;

use crate::error::ScanError;

/// Soft limit of open file descriptors for this process, i.e. how many
/// sockets may be held at once. `RLIM_INFINITY` maps to `usize::MAX`.
pub fn descriptor_limit() -> Result<usize, ScanError> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    // SAFETY: `limit` is a valid, writable rlimit.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return Err(ScanError::DescriptorLimitUnavailable(
            io::Error::last_os_error(),
        ));
    }

    let width = if limit.rlim_cur == libc::RLIM_INFINITY {
        usize::MAX
    } else {
        usize::try_from(limit.rlim_cur).unwrap_or(usize::MAX)
    };

    log::debug!("Open file descriptor limit is {}", limit.rlim_cur);

    Ok(width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_readable_and_positive() {
        let width = descriptor_limit().unwrap();
        assert!(width > 0);
    }
}
