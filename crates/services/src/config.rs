use std::env;
use std::path::PathBuf;
use std::time::Duration;

use learn_core::model::{Identity, UserId};
use url::Url;

use crate::error::ConfigError;

const DEFAULT_SECTIONS_PER_MODULE: u32 = 10;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-side sync settings.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Durable store endpoint. `None` runs local-only.
    pub api_base_url: Option<Url>,
    /// Directory for the file-backed mirror. `None` keeps it in memory.
    pub mirror_dir: Option<PathBuf>,
    /// Threshold assumed when nothing is known about a module.
    pub start_section: u32,
    /// Unlock-ahead override for privileged or test contexts.
    pub forced_unlock: Option<u32>,
    pub identity: Identity,
    pub sections_per_module: u32,
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            mirror_dir: None,
            start_section: 1,
            forced_unlock: None,
            identity: Identity::Anonymous,
            sections_per_module: DEFAULT_SECTIONS_PER_MODULE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl SyncConfig {
    /// Read settings from `PROGRESS_*` environment variables.
    ///
    /// Unset or blank variables fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a set variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] with an injectable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a present value cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let api_base_url = get("PROGRESS_API_BASE_URL")
            .map(|raw| parse_url("PROGRESS_API_BASE_URL", &raw))
            .transpose()?;
        let mirror_dir = get("PROGRESS_MIRROR_DIR").map(PathBuf::from);
        let start_section = get("PROGRESS_START_SECTION")
            .map(|raw| parse_u32("PROGRESS_START_SECTION", &raw))
            .transpose()?
            .unwrap_or(defaults.start_section);
        let forced_unlock = get("PROGRESS_FORCE_UNLOCK")
            .map(|raw| parse_u32("PROGRESS_FORCE_UNLOCK", &raw))
            .transpose()?;
        let identity = get("PROGRESS_USER_ID")
            .map(|raw| {
                raw.parse::<UserId>()
                    .map(Identity::User)
                    .map_err(|_| ConfigError::InvalidNumber {
                        var: "PROGRESS_USER_ID",
                        raw,
                    })
            })
            .transpose()?
            .unwrap_or(Identity::Anonymous);
        let sections_per_module = get("PROGRESS_SECTIONS_PER_MODULE")
            .map(|raw| parse_u32("PROGRESS_SECTIONS_PER_MODULE", &raw))
            .transpose()?
            .unwrap_or(defaults.sections_per_module);

        Ok(Self {
            api_base_url,
            mirror_dir,
            start_section,
            forced_unlock,
            identity,
            sections_per_module,
            request_timeout: defaults.request_timeout,
        })
    }

    /// True when a durable store is configured and the session has a user.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.api_base_url.is_some() && !self.identity.is_anonymous()
    }
}

pub(crate) fn parse_u32(var: &'static str, raw: &str) -> Result<u32, ConfigError> {
    raw.parse::<u32>().map_err(|_| ConfigError::InvalidNumber {
        var,
        raw: raw.to_string(),
    })
}

pub(crate) fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|_| ConfigError::InvalidUrl {
        var,
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_is_offline_and_anonymous() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.api_base_url.is_none());
        assert!(config.identity.is_anonymous());
        assert_eq!(config.start_section, 1);
        assert!(!config.is_online());
    }

    #[test]
    fn reads_all_variables() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("PROGRESS_API_BASE_URL", "http://127.0.0.1:8787/"),
            ("PROGRESS_MIRROR_DIR", "/tmp/mirror"),
            ("PROGRESS_START_SECTION", "2"),
            ("PROGRESS_FORCE_UNLOCK", "4"),
            ("PROGRESS_USER_ID", "17"),
            ("PROGRESS_SECTIONS_PER_MODULE", "6"),
        ]))
        .unwrap();

        assert_eq!(config.start_section, 2);
        assert_eq!(config.forced_unlock, Some(4));
        assert_eq!(config.identity, Identity::User(UserId::new(17)));
        assert_eq!(config.sections_per_module, 6);
        assert!(config.is_online());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config =
            SyncConfig::from_lookup(lookup(&[("PROGRESS_START_SECTION", "  ")])).unwrap();
        assert_eq!(config.start_section, 1);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = SyncConfig::from_lookup(lookup(&[("PROGRESS_FORCE_UNLOCK", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                var: "PROGRESS_FORCE_UNLOCK",
                ..
            }
        ));

        let err = SyncConfig::from_lookup(lookup(&[("PROGRESS_API_BASE_URL", "not a url")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }
}
