mod tcp;

pub use tcp::{RetryPolicy, TcpScan};
