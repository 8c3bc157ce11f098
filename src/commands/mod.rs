//! CLI command implementations.

pub mod fetch;
pub mod init;
pub mod probe;
pub mod reconcile;
pub mod status;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::OnceLock;

use crate::config::Config;

/// Set by `--lang`; wins over the config file's `language`
static LANGUAGE_OVERRIDE: OnceLock<String> = OnceLock::new();

/// Use `lang` for all user-facing output of this process.
pub fn override_language(lang: &str) {
    let _ = LANGUAGE_OVERRIDE.set(lang.to_string());
    rust_i18n::set_locale(lang);
}

/// Load the config and switch output to its language unless `--lang` was given.
pub(crate) fn load_config(config_path: &Path) -> Result<Config> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    if LANGUAGE_OVERRIDE.get().is_none() {
        rust_i18n::set_locale(&config.language);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use rust_i18n::t;

    macro_rules! assert_translated {
        ($($key:literal),+ $(,)?) => {$(
            let en = t!($key, locale = "en");
            let fr = t!($key, locale = "fr");
            assert_ne!(en, $key);
            assert_ne!(en, fr, "{} is not translated", $key);
        )+};
    }

    #[test]
    fn test_messages_translated() {
        assert_translated!(
            "status.last_pass_never",
            "status.daemon_active",
            "status.jail_enabled",
            "probe.none",
            "fetch.entries",
            "init.next_step",
        );
    }

    #[test]
    fn test_message_arguments() {
        assert_eq!(
            t!("fetch.entries", locale = "en", count = 3),
            "Entries: 3"
        );
        assert_eq!(
            t!("status.changes", locale = "fr", daemon = 1, firewall = 2),
            "Modifications : 1 démon, 2 pare-feu"
        );
    }
}
