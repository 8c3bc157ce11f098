//! Configuration management for jailsync.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::policy::RuleGroup;
use crate::validation::{validate_group_name, validate_port, validate_source_url};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/jailsync/config.yaml";

/// Upper bound for the fetch timeout; a pass must never hang on the provider
const MAX_FETCH_TIMEOUT_SECS: u64 = 300;

/// Locales shipped in `i18n/`
const SUPPORTED_LANGUAGES: &[&str] = &["en", "fr"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Language for messages (en, fr)
    pub language: String,

    /// Advisory lock held for the duration of a pass
    pub lock_file: PathBuf,

    /// Last pass record and last good allow-list
    pub state_file: PathBuf,

    pub allowlist: AllowlistConfig,
    pub probe: ProbeConfig,
    pub daemon: DaemonConfig,
    pub firewall: FirewallConfig,
    pub policy: PolicyConfig,
    pub applier: ApplierConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            lock_file: PathBuf::from("/run/jailsync.lock"),
            state_file: PathBuf::from("/var/lib/jailsync/state.json"),
            allowlist: AllowlistConfig::default(),
            probe: ProbeConfig::default(),
            daemon: DaemonConfig::default(),
            firewall: FirewallConfig::default(),
            policy: PolicyConfig::default(),
            applier: ApplierConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_LANGUAGES.contains(&self.language.as_str()) {
            anyhow::bail!(
                "language must be one of {}, got '{}'",
                SUPPORTED_LANGUAGES.join(", "),
                self.language
            );
        }

        validate_source_url(&self.allowlist.source_url)?;

        if self.allowlist.ports.is_empty() {
            anyhow::bail!("allowlist.ports cannot be empty");
        }
        for port in &self.allowlist.ports {
            validate_port(u32::from(*port))?;
        }

        if self.allowlist.timeout_secs == 0 || self.allowlist.timeout_secs > MAX_FETCH_TIMEOUT_SECS {
            anyhow::bail!(
                "allowlist.timeout_secs must be between 1 and {}, got {}",
                MAX_FETCH_TIMEOUT_SECS,
                self.allowlist.timeout_secs
            );
        }

        if self.allowlist.prefix_field.trim().is_empty() {
            anyhow::bail!("allowlist.prefix_field cannot be empty");
        }

        if self.allowlist.label.trim().is_empty() || self.allowlist.label.contains('\'') {
            anyhow::bail!(
                "allowlist.label must be non-empty and free of quotes: {:?}",
                self.allowlist.label
            );
        }

        validate_group_name(&self.daemon.managed_prefix)
            .context("daemon.managed_prefix is not usable as a name prefix")?;

        if self.probe.web.iter().chain(&self.probe.database).any(|u| u.trim().is_empty()) {
            anyhow::bail!("probe candidates cannot contain empty unit names");
        }

        if self.policy.ban_max_seconds < self.policy.ban_seconds {
            anyhow::bail!(
                "policy.ban_max_seconds ({}) must not be below policy.ban_seconds ({})",
                self.policy.ban_max_seconds,
                self.policy.ban_seconds
            );
        }

        let mut names = HashSet::new();
        for group in &self.policy.extra_groups {
            group
                .validate()
                .with_context(|| format!("Invalid policy.extra_groups entry '{}'", group.name))?;
            if !group.name.starts_with(&self.daemon.managed_prefix) {
                anyhow::bail!(
                    "Extra rule group '{}' must start with the managed prefix '{}'",
                    group.name,
                    self.daemon.managed_prefix
                );
            }
            if !names.insert(group.name.as_str()) {
                anyhow::bail!("Duplicate extra rule group '{}'", group.name);
            }
        }

        Ok(())
    }

    /// Save configuration to YAML file atomically
    ///
    /// Uses tempfile + rename pattern to prevent corruption on crash.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        let parent_dir = path.parent().unwrap_or(Path::new("/etc/jailsync"));
        std::fs::create_dir_all(parent_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", parent_dir))?;
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .context("Failed to create temporary file for config")?;

        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.allowlist.timeout_secs)
    }
}

/// Allow-list provider settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AllowlistConfig {
    pub source_url: String,
    /// Dotted path to the entry array (unset = the response is the array)
    pub items_path: Option<String>,
    /// Field carrying the prefix in each entry
    pub prefix_field: String,
    /// Comment attached to every firewall rule this tool creates
    pub label: String,
    pub ports: Vec<u16>,
    /// Deadline for the whole fetch, retries included
    pub timeout_secs: u64,
    /// Reuse the last good list when the provider fails
    pub use_cached_on_failure: bool,
}

impl Default for AllowlistConfig {
    fn default() -> Self {
        Self {
            source_url: "https://uptimerobot.com/inc/files/ips/IPv4andIPv6.json".to_string(),
            items_path: None,
            prefix_field: "ip".to_string(),
            label: "jailsync-monitor".to_string(),
            ports: vec![80, 443],
            timeout_secs: 10,
            use_cached_on_failure: false,
        }
    }
}

/// Service units to probe, highest priority first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub web: Vec<String>,
    pub database: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            web: ["nginx", "caddy", "apache2", "httpd", "lighttpd"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            database: ["mysql", "mariadb", "postgresql"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub jail_dir: PathBuf,
    /// Where filters shipped by jailsync are written
    pub filter_dir: PathBuf,
    pub client: String,
    /// Groups whose name starts with this prefix belong to jailsync
    pub managed_prefix: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            jail_dir: PathBuf::from("/etc/fail2ban/jail.d"),
            filter_dir: PathBuf::from("/etc/fail2ban/filter.d"),
            client: "fail2ban-client".to_string(),
            managed_prefix: "jailsync-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FirewallConfig {
    pub ufw: String,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            ufw: "ufw".to_string(),
        }
    }
}

/// Tuning shared by the generated rule groups
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    pub ban_seconds: u64,
    pub ban_max_seconds: u64,
    pub escalating: bool,
    /// Operator-defined groups appended after the generated ones
    pub extra_groups: Vec<RuleGroup>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            ban_seconds: 3600,
            ban_max_seconds: 7 * 24 * 3600,
            escalating: true,
            extra_groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplierConfig {
    /// Apply daemon and firewall changes at the same time
    pub concurrent_targets: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::fixtures::group;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.allowlist.ports, vec![80, 443]);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.probe.web[0], "nginx");
        assert_eq!(config.daemon.managed_prefix, "jailsync-");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
allowlist:
  source_url: "https://example.com/ips.json"
  items_path: "data.prefixes"
applier:
  concurrent_targets: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.allowlist.items_path.as_deref(), Some("data.prefixes"));
        assert_eq!(config.allowlist.prefix_field, "ip");
        assert!(config.applier.concurrent_targets);
        assert_eq!(config.daemon, DaemonConfig::default());
    }

    #[test]
    fn test_validation_rejects_http_source() {
        let mut config = Config::default();
        config.allowlist.source_url = "http://example.com/ips.json".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("HTTPS"));
    }

    #[test]
    fn test_validation_rejects_bad_ports() {
        let mut config = Config::default();
        config.allowlist.ports = vec![];
        assert!(config.validate().is_err());

        config.allowlist.ports = vec![0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_language() {
        let mut config = Config::default();
        assert_eq!(config.language, "en");

        config.language = "fr".to_string();
        assert!(config.validate().is_ok());

        config.language = "de".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("language"));
    }

    #[test]
    fn test_validation_rejects_bad_timeout() {
        let mut config = Config::default();
        config.allowlist.timeout_secs = 0;
        assert!(config.validate().is_err());
        config.allowlist.timeout_secs = 301;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_quoted_label() {
        let mut config = Config::default();
        config.allowlist.label = "it's".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_prefix() {
        let mut config = Config::default();
        config.daemon.managed_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_ban_bounds() {
        let mut config = Config::default();
        config.policy.ban_seconds = 100;
        config.policy.ban_max_seconds = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extra_groups_must_be_managed() {
        let mut config = Config::default();
        config.policy.extra_groups = vec![group("recidive")];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("managed prefix"));

        config.policy.extra_groups = vec![group("jailsync-recidive")];
        assert!(config.validate().is_ok());

        config.policy.extra_groups = vec![group("jailsync-recidive"), group("jailsync-recidive")];
        assert!(config.validate().unwrap_err().to_string().contains("Duplicate"));
    }

    #[test]
    fn test_extra_group_yaml() {
        let yaml = r#"
policy:
  extra_groups:
    - name: jailsync-postfix
      enabled: true
      match_spec:
        filter: postfix
        log_path: /var/log/mail.log
      threshold:
        max_attempts: 3
        window_seconds: 600
      ban_duration_seconds: 3600
      ban_duration_max_seconds: 3600
      escalating: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        let g = &config.policy.extra_groups[0];
        assert_eq!(g.match_spec.port, None);
        assert_eq!(g.action_scope, crate::policy::ActionScope::SinglePort);
    }

    #[test]
    fn test_extra_group_with_own_filter_yaml() {
        let yaml = r#"
daemon:
  filter_dir: /srv/fail2ban/filter.d
policy:
  extra_groups:
    - name: jailsync-gitea
      enabled: true
      match_spec:
        filter: jailsync-gitea
        log_path: |
          /var/log/gitea/gitea.log
          /var/log/gitea/http.log
        definition:
          failregex: '.*Failed authentication attempt for .* from <HOST>:\d+'
      threshold:
        max_attempts: 5
        window_seconds: 600
      ban_duration_seconds: 3600
      ban_duration_max_seconds: 3600
      escalating: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.daemon.filter_dir,
            PathBuf::from("/srv/fail2ban/filter.d")
        );
        let def = config.policy.extra_groups[0]
            .match_spec
            .definition
            .as_ref()
            .unwrap();
        assert!(def.failregex.contains("<HOST>"));
        assert_eq!(def.datepattern, None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.allowlist.use_cached_on_failure = true;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/jailsync/config.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "allowlist: [unclosed").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
