use std::{net::IpAddr, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("upper port bound `{0}` is invalid (expected 1-65535)")]
    InvalidPortBound(String),
    #[error("timeout `{0}` is invalid (expected milliseconds greater than zero)")]
    InvalidTimeout(String),
    #[error("retry ceiling `{0}` is invalid")]
    InvalidRetries(String),
    #[error("failed to read the open file descriptor limit: {0}")]
    DescriptorLimitUnavailable(#[source] std::io::Error),
    #[error("failed to check target kind (ensure it's a domain or an IP address)")]
    HostParseFailed(#[source] url::ParseError),
    #[error("failed to resolve the given target: {0}")]
    ResolverFailed(#[source] std::io::Error),
    #[error("resolver didn't find any address mapped by `{0}`")]
    DomainLookupFailed(String),
    #[error("reverse lookup of `{0}` failed: {1}")]
    ReverseLookupFailed(IpAddr, String),
    #[error("failed to read service catalog `{0}`: {1}")]
    CatalogReadFailed(PathBuf, #[source] std::io::Error),
    #[error("failed to parse service catalog `{0}`: {1}")]
    CatalogParseFailed(PathBuf, #[source] serde_json::Error),
    #[error("failed to open ICMP channel (raw sockets usually require root): {0}")]
    IcmpChannelFailed(#[source] std::io::Error),
    #[error("failed to build echo request packet")]
    PacketBuildFailed,
    #[error("failed to send packet to `{0}`: {1}")]
    PacketSendFailed(IpAddr, #[source] std::io::Error),
    #[error("failed to receive packet from `{0}`: {1}")]
    PacketRecvFailed(IpAddr, #[source] std::io::Error),
    #[error("failed to build the probe worker pool: {0}")]
    WorkerPoolFailed(#[source] rayon::ThreadPoolBuildError),
}
