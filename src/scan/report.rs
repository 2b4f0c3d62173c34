use std::{
    fmt::{self, Display},
    time::Duration,
};

use pad::PadStr;

use crate::scan::Target;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortOutcome {
    Open(String),
    Closed,
    /// Closed because the descriptor retry ceiling was hit.
    Exhausted,
}

impl Display for PortOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortOutcome::Open(service) => write!(f, "open ({})", service),
            PortOutcome::Closed => write!(f, "closed"),
            PortOutcome::Exhausted => write!(f, "closed (descriptors exhausted)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub outcome: PortOutcome,
}

impl PortResult {
    pub fn new(port: u16, outcome: PortOutcome) -> Self {
        Self { port, outcome }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    HostDown,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPort {
    pub port: u16,
    pub service: String,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub target: Target,
    pub terminal: Terminal,
    pub elapsed: Duration,
    /// Ascending by port.
    pub open: Vec<OpenPort>,
    pub closed: usize,
    /// Ports counted in `closed` that were never actually answered.
    pub exhausted: usize,
}

impl ScanReport {
    pub fn host_down(target: Target, elapsed: Duration) -> Self {
        Self {
            target,
            terminal: Terminal::HostDown,
            elapsed,
            open: Vec::new(),
            closed: 0,
            exhausted: 0,
        }
    }

    #[inline]
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.open.len() + self.closed
    }

    fn header(&self) -> String {
        let name = self.target.name().unwrap_or_default();
        format!("IP Address {}, Hostname {}", self.target.ip(), name)
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.header()];

        if self.terminal == Terminal::HostDown {
            lines.push("Host may be Down!".into());
            return lines;
        }

        lines.push(format!("Scan Duration: {:.4}s", self.elapsed.as_secs_f32()));

        if !self.open.is_empty() {
            lines.push(format!("{}{}Service", "Port".pad_to_width(8), "State".pad_to_width(7)));
            lines.extend(self.open.iter().map(|op| {
                format!(
                    "{}{}{}",
                    op.port.to_string().pad_to_width(8),
                    "open".pad_to_width(7),
                    op.service
                )
            }));
        }

        lines.push(format!(
            "There are {} ports open and {} ports closed.",
            self.open_count(),
            self.closed
        ));

        if self.exhausted > 0 {
            lines.push(format!(
                "{} of the closed ports were given up on after running out of file descriptors.",
                self.exhausted
            ));
        }

        lines
    }
}

impl Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.lines().iter().try_for_each(|line| writeln!(f, "{}", line))
    }
}

/// Builds the completed report once every probe task joined.
pub fn aggregate<I>(target: Target, outcomes: I, elapsed: Duration) -> ScanReport
where
    I: IntoIterator<Item = PortResult>,
{
    let mut open = Vec::new();
    let mut closed = 0;
    let mut exhausted = 0;

    for result in outcomes {
        match result.outcome {
            PortOutcome::Open(service) => open.push(OpenPort {
                port: result.port,
                service,
            }),
            PortOutcome::Closed => closed += 1,
            PortOutcome::Exhausted => {
                closed += 1;
                exhausted += 1;
            }
        }
    }

    open.sort_unstable_by_key(|op| op.port);

    ScanReport {
        target,
        terminal: Terminal::Completed,
        elapsed,
        open,
        closed,
        exhausted,
    }
}
