//! Small helpers shared by the CLI commands.
//!
//! - [`check_root`] - refuse to touch the daemon or firewall without root
//! - [`format_duration`] - render ban durations (3600 → "1h")
//! - [`truncate`] - truncate strings with ellipsis

use anyhow::Result;

/// Check if running as root (effective UID == 0).
///
/// Writing jail files, reloading fail2ban and editing ufw rules all need it.
pub fn check_root() -> Result<()> {
    // SAFETY: geteuid() has no preconditions and never fails.
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        anyhow::bail!(
            "This operation requires root privileges. Please run with sudo, \
             or use 'jailsync reconcile --dry-run' to preview the plan."
        )
    }
    Ok(())
}

/// Render a duration in seconds using the largest exact unit.
///
/// # Examples
/// ```
/// use jailsync::utils::format_duration;
/// assert_eq!(format_duration(3600), "1h");
/// assert_eq!(format_duration(604800), "1w");
/// assert_eq!(format_duration(90), "90s");
/// ```
pub fn format_duration(seconds: u64) -> String {
    const UNITS: &[(u64, &str)] = &[(604_800, "w"), (86_400, "d"), (3_600, "h"), (60, "m")];

    if seconds == 0 {
        return "0s".to_string();
    }
    for (size, suffix) in UNITS {
        if seconds % size == 0 {
            return format!("{}{}", seconds / size, suffix);
        }
    }
    format!("{}s", seconds)
}

/// Truncate a string to `max_len` characters, adding "..." when shortened.
///
/// # Examples
/// ```
/// use jailsync::utils::truncate;
/// assert_eq!(truncate("short", 10), "short");
/// assert_eq!(truncate("this is long", 10), "this is...");
/// ```
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}
