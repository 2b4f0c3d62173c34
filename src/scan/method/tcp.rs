use std::{
    io,
    net::{SocketAddr, TcpStream},
    thread,
    time::Duration,
};

use crate::scan::{Executor, PortState};

const MAX_BACKOFF: Duration = Duration::from_secs(10);
const BACKOFF_CAP_FACTOR: u32 = 8;

/// How long to keep retrying a port while the process is out of file
/// descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RETRIES)
    }
}

impl RetryPolicy {
    pub const DEFAULT_RETRIES: u32 = 8;

    pub fn new(retries: u32) -> Self {
        Self { retries }
    }

    /// Delay before retry number `attempt` (starting at zero): one timeout
    /// interval, doubled per attempt, capped at eight intervals or
    /// [`MAX_BACKOFF`], whichever is lower.
    pub fn backoff(&self, attempt: u32, timeout: Duration) -> Duration {
        let cap = timeout
            .saturating_mul(BACKOFF_CAP_FACTOR)
            .min(MAX_BACKOFF)
            .max(timeout);

        timeout
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(cap)
    }

    // Up to a quarter is shaved off so parked probes don't wake in lockstep.
    fn jittered(&self, attempt: u32, timeout: Duration) -> Duration {
        let delay = self.backoff(attempt, timeout);
        delay - (delay / 4).mul_f64(rand::random::<f64>())
    }

    pub(crate) fn run<F>(&self, addr: &SocketAddr, timeout: Duration, mut connect: F) -> PortState
    where
        F: FnMut(&SocketAddr, Duration) -> io::Result<()>,
    {
        let mut attempt = 0;

        loop {
            let error = match connect(addr, timeout) {
                Ok(()) => return PortState::Open,
                Err(e) => e,
            };

            if !is_exhaustion(&error) {
                return PortState::Closed;
            }

            if attempt >= self.retries {
                log::warn!(
                    "Giving up on `{}` after {} retries: {}",
                    addr,
                    self.retries,
                    error
                );
                return PortState::Exhausted;
            }

            let delay = self.jittered(attempt, timeout);
            log::debug!(
                "Out of descriptors probing `{}`, retrying in {:.3}s",
                addr,
                delay.as_secs_f32()
            );

            thread::sleep(delay);
            attempt += 1;
        }
    }
}

fn is_exhaustion(error: &io::Error) -> bool {
    matches!(error.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

#[derive(Debug, Default)]
pub struct TcpScan {
    policy: RetryPolicy,
}

impl TcpScan {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl Executor for TcpScan {
    fn scan(&self, addr: &SocketAddr, timeout: Duration) -> PortState {
        // The stream is dropped right away; the handshake is the answer.
        self.policy.run(addr, timeout, |addr, timeout| {
            TcpStream::connect_timeout(addr, timeout).map(drop)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, TcpListener};

    use super::*;

    const TICK: Duration = Duration::from_millis(1);

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
    }

    fn exhausted() -> io::Error {
        io::Error::from_raw_os_error(libc::EMFILE)
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::default();
        let timeout = Duration::from_millis(500);

        assert_eq!(policy.backoff(0, timeout), Duration::from_millis(500));
        assert_eq!(policy.backoff(1, timeout), Duration::from_secs(1));
        assert_eq!(policy.backoff(2, timeout), Duration::from_secs(2));
        assert_eq!(policy.backoff(3, timeout), Duration::from_secs(4));
        assert_eq!(policy.backoff(4, timeout), Duration::from_secs(4));
        assert_eq!(policy.backoff(60, timeout), Duration::from_secs(4));

        let slow = Duration::from_secs(3);
        assert_eq!(policy.backoff(5, slow), MAX_BACKOFF);
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy::default();
        let timeout = Duration::from_millis(400);

        for attempt in 0..6 {
            let base = policy.backoff(attempt, timeout);
            let delay = policy.jittered(attempt, timeout);
            assert!(delay <= base);
            assert!(delay >= base - base / 4);
        }
    }

    #[test]
    fn exhaustion_is_retried_then_succeeds() {
        let mut calls = 0;
        let state = RetryPolicy::new(5).run(&loopback(80), TICK, |_, _| {
            calls += 1;
            if calls < 3 {
                Err(exhausted())
            } else {
                Ok(())
            }
        });

        assert_eq!(state, PortState::Open);
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhaustion_gives_up_after_ceiling() {
        let mut calls = 0;
        let state = RetryPolicy::new(3).run(&loopback(80), TICK, |_, _| {
            calls += 1;
            Err(io::Error::from_raw_os_error(libc::ENFILE))
        });

        assert_eq!(state, PortState::Exhausted);
        assert_eq!(calls, 4);
    }

    #[test]
    fn other_failures_are_closed_without_retry() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::TimedOut,
            io::ErrorKind::Other,
        ] {
            let mut calls = 0;
            let state = RetryPolicy::default().run(&loopback(80), TICK, |_, _| {
                calls += 1;
                Err(io::Error::from(kind))
            });

            assert_eq!(state, PortState::Closed);
            assert_eq!(calls, 1);
        }
    }

    #[test]
    fn listener_is_open() {
        let listener = TcpListener::bind(loopback(0)).unwrap();
        let addr = listener.local_addr().unwrap();

        let state = TcpScan::default().scan(&addr, Duration::from_millis(500));
        assert_eq!(state, PortState::Open);
    }

    #[test]
    fn released_port_is_closed() {
        let addr = TcpListener::bind(loopback(0))
            .unwrap()
            .local_addr()
            .unwrap();

        let state = TcpScan::default().scan(&addr, Duration::from_millis(500));
        assert_eq!(state, PortState::Closed);
    }
}
