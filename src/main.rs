use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::{arg, crate_authors, crate_name, crate_version, ArgAction, ArgMatches, Command};
use gscan::{
    abort,
    catalog::ServiceCatalog,
    error::ScanError,
    limits, logger, resolver,
    scan::{RetryPolicy, ScanRequest, Scanner, TcpScan, Target},
};

const DEFAULT_PORTS: &str = "1024";
const DEFAULT_IP: &str = "8.8.8.8";
const DEFAULT_HOST: &str = "www.owasp.org";
const DEFAULT_RANGE: &str = "24";
const DEFAULT_CATALOG: &str = "./tcp.json";
const DEFAULT_TIMEOUT_MS: &str = "500";
const DEFAULT_RETRIES: &str = "8";

struct ParsedArgs {
    upper: u16,
    target: Target,
    range: String,
    catalog: PathBuf,
    timeout: Duration,
    retries: u32,
}

fn value<'a>(matches: &'a ArgMatches, id: &str, default: &'a str) -> &'a str {
    matches.get_one::<String>(id).map_or(default, String::as_str)
}

fn parse_upper(raw: &str) -> Result<u16, ScanError> {
    match raw.parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ScanError::InvalidPortBound(raw.into())),
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, ScanError> {
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ScanError::InvalidTimeout(raw.into())),
    }
}

fn parse_target(ip: &str, host: &str) -> Result<Target, ScanError> {
    // The hostname only wins once it was moved off its default.
    if host != DEFAULT_HOST {
        match resolver::lookup(host) {
            Ok(resolved) => return Ok(Target::named(resolved, host)),
            Err(e) => log::warn!("{}; falling back to `{}`", e, ip),
        }
    }

    Ok(Target::new(resolver::lookup(ip)?))
}

fn parse_args(matches: &ArgMatches) -> Result<ParsedArgs, ScanError> {
    let upper = parse_upper(value(matches, "ports", DEFAULT_PORTS))?;
    let target = parse_target(
        value(matches, "ip", DEFAULT_IP),
        value(matches, "host", DEFAULT_HOST),
    )?;
    let range = value(matches, "range", DEFAULT_RANGE).to_owned();
    let catalog = PathBuf::from(value(matches, "catalog", DEFAULT_CATALOG));
    let timeout = parse_timeout(value(matches, "timeout", DEFAULT_TIMEOUT_MS))?;

    let raw_retries = value(matches, "retries", DEFAULT_RETRIES);
    let retries = raw_retries
        .parse::<u32>()
        .map_err(|_| ScanError::InvalidRetries(raw_retries.into()))?;

    Ok(ParsedArgs {
        upper,
        target,
        range,
        catalog,
        timeout,
        retries,
    })
}

fn command() -> Command {
    Command::new(crate_name!())
        .about(
            "TCP connect port scanner.\n\
            Hosts that don't answer ICMP echo are skipped (raw sockets require sudo).",
        )
        .version(crate_version!())
        .author(crate_authors!())
        .args([
            // Miscellaneous arguments.
            arg!(-d --debug "Turns on debugging information").action(ArgAction::SetTrue),
            arg!(-c --catalog <FILE> "JSON service catalog").default_value(DEFAULT_CATALOG),
            arg!(-t --timeout <MS> "Connect timeout per attempt in milliseconds")
                .default_value(DEFAULT_TIMEOUT_MS),
            arg!(--retries <N> "Retries per port while out of file descriptors")
                .default_value(DEFAULT_RETRIES),
        ])
        .args([
            // Target selection.
            arg!(-p --ports <PORT> "Upper bound of the scanned ports").default_value(DEFAULT_PORTS),
            arg!(--ip <IP> "IP address to scan").default_value(DEFAULT_IP),
            arg!(--host <HOST> "Hostname to scan, takes precedence over --ip when set")
                .default_value(DEFAULT_HOST),
            arg!(--range <BITS> "IP range for scanning (not applied yet)")
                .default_value(DEFAULT_RANGE),
        ])
}

fn main() -> Result<()> {
    let matches = command().get_matches();

    // Set debug if desired.
    logger::init(matches.get_flag("debug"));

    // Extract arguments.
    let parsed = parse_args(&matches)?;

    log::debug!("Ignoring IP range `/{}`", parsed.range);

    // Sockets are bounded by the descriptor limit; without it there's no
    // safe admission width.
    let width = limits::descriptor_limit().unwrap_or_else(|e| abort(e));

    let catalog = ServiceCatalog::load_or_empty(&parsed.catalog);
    let request = ScanRequest::new(parsed.upper, parsed.timeout, width);

    // Start scanner.
    let report = Scanner::new(parsed.target, request, &catalog)
        .executor(TcpScan::new(RetryPolicy::new(parsed.retries)))
        .start()?;

    // Show result.
    print!("{}", report);

    Ok(())
}
