//! Fixed queries run through any [`Session`].
//!
//! Each query sends one well-known command and parses the answer. Transport and
//! timeout failures propagate unchanged; output that does not have the expected
//! shape is a [`ParseError`] carrying the raw text.

use std::net::Ipv4Addr;
use std::sync::LazyLock;

use log::{debug, info, warn};
use regex::Regex;

use crate::error::{ParseError, Result};
use crate::session::Session;

const ROUTE_COMMAND: &str = "ip r";
const LAN_COMMAND: &str = "ipmitool lan print";
const HARDWARE_ERROR_COMMAND: &str = r#"dmesg | grep -i "hardware error""#;
const BIOS_COMMAND: &str = "dmidecode -s bios-version";
const OS_RELEASE_COMMAND: &str = "cat /etc/os-release";
const CPU_COMMAND: &str = "lscpu";
const MC_INFO_COMMAND: &str = "ipmitool mc info";
const LSPCI_COMMAND: &str = "lspci";

static ROUTE_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"link src (\d{1,3}(?:\.\d{1,3}){3})").expect("valid regex"));
static LAN_IP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"IP Address\s*:\s*(\d{1,3}(?:\.\d{1,3}){3})").expect("valid regex")
});
static HARDWARE_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)hardware error").expect("valid regex"));
static PRETTY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^PRETTY_NAME="?([^"\n]+)"?\s*$"#).expect("valid regex")
});
static MODEL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Model name:\s*(.+?)\s*$").expect("valid regex"));
static FIRMWARE_REVISION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Firmware Revision\s*:\s*(\S+)").expect("valid regex"));

async fn run<S: Session>(session: &mut S, command: &str) -> Result<String> {
    let timeout = session.config().query_timeout();
    let result = session.execute_with_timeout(command, Some(timeout)).await?;
    Ok(result.stdout)
}

/// Host OS address: the `src` of the first link-scope route.
pub async fn host_ip<S: Session>(session: &mut S) -> Result<Ipv4Addr> {
    let output = run(session, ROUTE_COMMAND).await?;
    let ip = parse_host_ip(&output)?;
    info!("Host IP: {}", ip);
    Ok(ip)
}

/// Management controller address from its LAN configuration.
pub async fn management_ip<S: Session>(session: &mut S) -> Result<Ipv4Addr> {
    let output = run(session, LAN_COMMAND).await?;
    let ip = parse_management_ip(&output)?;
    info!("BMC IP: {}", ip);
    Ok(ip)
}

/// Whether the kernel log mentions a hardware error.
pub async fn has_hardware_error<S: Session>(session: &mut S) -> Result<bool> {
    let output = run(session, HARDWARE_ERROR_COMMAND).await?;
    let found = parse_hardware_error(&output);
    if found {
        warn!("Hardware error reported in kernel log");
    }
    Ok(found)
}

/// Firmware (BIOS) version string.
pub async fn bios_version<S: Session>(session: &mut S) -> Result<String> {
    let output = run(session, BIOS_COMMAND).await?;
    parse_bios_version(&output)
}

/// Operating system name, from `/etc/os-release`.
pub async fn os_version<S: Session>(session: &mut S) -> Result<String> {
    let output = run(session, OS_RELEASE_COMMAND).await?;
    capture(&PRETTY_NAME, "os_version", &output)
}

/// Processor model name.
pub async fn cpu_model<S: Session>(session: &mut S) -> Result<String> {
    let output = run(session, CPU_COMMAND).await?;
    capture(&MODEL_NAME, "cpu_model", &output)
}

/// Management controller firmware revision.
pub async fn bmc_version<S: Session>(session: &mut S) -> Result<String> {
    let output = run(session, MC_INFO_COMMAND).await?;
    capture(&FIRMWARE_REVISION, "bmc_version", &output)
}

/// Raw PCI device listing.
pub async fn lspci<S: Session>(session: &mut S) -> Result<String> {
    run(session, LSPCI_COMMAND).await
}

fn parse_ip(re: &Regex, query: &'static str, output: &str) -> std::result::Result<Ipv4Addr, ParseError> {
    re.captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| {
            debug!("{}: no address in {:?}", query, output);
            ParseError::new(query, output)
        })
}

pub(crate) fn parse_host_ip(output: &str) -> std::result::Result<Ipv4Addr, ParseError> {
    parse_ip(&ROUTE_SRC, "host_ip", output)
}

pub(crate) fn parse_management_ip(output: &str) -> std::result::Result<Ipv4Addr, ParseError> {
    parse_ip(&LAN_IP, "management_ip", output)
}

/// Searches command output only; the echoed command itself contains the phrase.
pub(crate) fn parse_hardware_error(output: &str) -> bool {
    HARDWARE_ERROR.is_match(output)
}

pub(crate) fn parse_bios_version(output: &str) -> Result<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ParseError::new("bios_version", output).into())
}

fn capture(re: &Regex, query: &'static str, output: &str) -> Result<String> {
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::new(query, output).into())
}
