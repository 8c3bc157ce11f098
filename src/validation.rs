//! Centralized validation functions for jailsync.
//!
//! This module provides unified validation for:
//! - Network prefixes (CIDR or bare address)
//! - Port numbers
//! - Rule group names (used as jail section and file names)
//! - Provider URLs

use anyhow::{bail, Result};
use ipnet::IpNet;
use std::net::IpAddr;

/// Maximum length of a rule group name.
pub const MAX_GROUP_NAME_LEN: usize = 64;

/// Validate a network prefix and return it in canonical form.
///
/// A bare address is widened to a /32 (IPv4) or /128 (IPv6) network, and
/// host bits are cleared so `10.1.2.3/8` and `10.0.0.0/8` compare equal.
///
/// # Examples
/// ```
/// use jailsync::validation::validate_cidr;
/// assert_eq!(validate_cidr("69.162.124.7/24").unwrap().to_string(), "69.162.124.0/24");
/// assert_eq!(validate_cidr("192.0.2.1").unwrap().to_string(), "192.0.2.1/32");
/// assert!(validate_cidr("10.0.0.0/33").is_err());
/// ```
pub fn validate_cidr(input: &str) -> Result<IpNet> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        bail!("Empty network prefix");
    }

    let net = if trimmed.contains('/') {
        trimmed
            .parse::<IpNet>()
            .map_err(|_| anyhow::anyhow!("Invalid CIDR: {}", trimmed))?
    } else {
        let ip: IpAddr = trimmed
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid IP address: {}", trimmed))?;
        IpNet::from(ip)
    };

    Ok(net.trunc())
}

/// Validate a port number (1-65535).
///
/// # Examples
/// ```
/// use jailsync::validation::validate_port;
/// assert_eq!(validate_port(443).unwrap(), 443);
/// assert!(validate_port(0).is_err());
/// assert!(validate_port(70000).is_err());
/// ```
pub fn validate_port(port: u32) -> Result<u16> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => bail!("Invalid port {}: must be between 1 and 65535", port),
    }
}

/// Check whether a rule group name is safe to use as a jail section and file name.
///
/// # Examples
/// ```
/// use jailsync::validation::is_valid_group_name;
/// assert!(is_valid_group_name("jailsync-sshd"));
/// assert!(!is_valid_group_name("../etc/passwd"));
/// assert!(!is_valid_group_name(""));
/// ```
pub fn is_valid_group_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_GROUP_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Validate a rule group name with a descriptive error.
pub fn validate_group_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Rule group name cannot be empty");
    }
    if !is_valid_group_name(name) {
        bail!(
            "Invalid rule group name '{}'. Use up to {} characters from [A-Za-z0-9._-], not starting with '.'",
            name,
            MAX_GROUP_NAME_LEN
        );
    }
    Ok(())
}

/// Validate that a provider URL uses HTTPS.
///
/// Plain HTTP is accepted only for loopback hosts, which keeps local test
/// fixtures usable without weakening production configuration.
///
/// # Examples
/// ```
/// use jailsync::validation::validate_source_url;
/// assert!(validate_source_url("https://uptimerobot.com/inc/files/ips/IPv4.json").is_ok());
/// assert!(validate_source_url("http://127.0.0.1:8080/ips.json").is_ok());
/// assert!(validate_source_url("http://example.com/ips.json").is_err());
/// ```
pub fn validate_source_url(url: &str) -> Result<()> {
    const LOOPBACK: &[&str] = &["127.0.0.1", "localhost", "[::1]"];

    let host = if let Some(rest) = url.strip_prefix("https://") {
        url_host(rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        let host = url_host(rest);
        if !LOOPBACK.contains(&host) {
            bail!("Allow-list source URL must use HTTPS: {}", url);
        }
        host
    } else {
        bail!("Allow-list source URL must use HTTPS: {}", url);
    };

    if host.is_empty() {
        bail!("Allow-list source URL has no host: {}", url);
    }
    Ok(())
}

/// Host part of `host[:port][/path]`, brackets kept for IPv6 literals.
fn url_host(rest: &str) -> &str {
    let authority = rest
        .split(|c| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or("");
    if authority.starts_with('[') {
        authority.split_inclusive(']').next().unwrap_or(authority)
    } else {
        authority.split(':').next().unwrap_or("")
    }
}
