use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::adapters::{bark, nextdns, qustodio};
use crate::models::Capability;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_VENDOR_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ACCOUNT_DEADLINE_SECS: u64 = 120;
const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Runtime settings, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit database file; `None` means the platform data directory.
    pub db_path: Option<PathBuf>,
    pub port: u16,
    /// Timeout for each outbound vendor request.
    pub vendor_timeout: Duration,
    /// Outer deadline for one account's whole enforcement pass.
    pub account_deadline: Duration,
    /// Maximum accounts enforced at once within a job. `0` disables the cap.
    pub max_concurrency: usize,
    pub nextdns_base_url: String,
    pub bark_base_url: String,
    pub qustodio_base_url: String,
    /// Capability tables replacing an adapter's defaults, keyed by platform id.
    pub capability_overrides: HashMap<String, Vec<Capability>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            port: DEFAULT_PORT,
            vendor_timeout: Duration::from_secs(DEFAULT_VENDOR_TIMEOUT_SECS),
            account_deadline: Duration::from_secs(DEFAULT_ACCOUNT_DEADLINE_SECS),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            nextdns_base_url: nextdns::DEFAULT_BASE_URL.to_string(),
            bark_base_url: bark::DEFAULT_BASE_URL.to_string(),
            qustodio_base_url: qustodio::DEFAULT_BASE_URL.to_string(),
            capability_overrides: HashMap::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset or blank keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(path) = get("GUARDLINE_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(port) = get("GUARDLINE_PORT") {
            config.port = parse_number("GUARDLINE_PORT", &port)?;
        }
        if let Some(secs) = get("GUARDLINE_VENDOR_TIMEOUT_SECS") {
            config.vendor_timeout =
                Duration::from_secs(parse_number("GUARDLINE_VENDOR_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = get("GUARDLINE_ACCOUNT_DEADLINE_SECS") {
            config.account_deadline =
                Duration::from_secs(parse_number("GUARDLINE_ACCOUNT_DEADLINE_SECS", &secs)?);
        }
        if let Some(n) = get("GUARDLINE_MAX_CONCURRENCY") {
            config.max_concurrency = parse_number("GUARDLINE_MAX_CONCURRENCY", &n)?;
        }
        if let Some(url) = get("NEXTDNS_BASE_URL") {
            config.nextdns_base_url = url;
        }
        if let Some(url) = get("BARK_BASE_URL") {
            config.bark_base_url = url;
        }
        if let Some(url) = get("QUSTODIO_BASE_URL") {
            config.qustodio_base_url = url;
        }
        if let Some(path) = get("GUARDLINE_CAPABILITIES_FILE") {
            config.capability_overrides = load_capabilities(Path::new(&path))?;
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a non-negative integer, got {:?}", key, value))
}

/// Read a `{ "<platform_id>": [Capability, ...] }` file.
pub fn load_capabilities(path: &Path) -> Result<HashMap<String, Vec<Capability>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read capabilities file {}", path.display()))?;
    let tables = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse capabilities file {}", path.display()))?;
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RuleCategory, SupportLevel};
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.vendor_timeout, Duration::from_secs(30));
        assert_eq!(config.account_deadline, Duration::from_secs(120));
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.nextdns_base_url, "https://api.nextdns.io");
        assert!(config.db_path.is_none());
        assert!(config.capability_overrides.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GUARDLINE_MAX_CONCURRENCY", "0"),
            ("GUARDLINE_VENDOR_TIMEOUT_SECS", "5"),
            ("BARK_BASE_URL", "http://localhost:9999"),
            ("GUARDLINE_DB_PATH", "  "),
        ]))
        .unwrap();

        assert_eq!(config.max_concurrency, 0);
        assert_eq!(config.vendor_timeout, Duration::from_secs(5));
        assert_eq!(config.bark_base_url, "http://localhost:9999");
        assert!(config.db_path.is_none());
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = Config::from_lookup(lookup(&[("GUARDLINE_MAX_CONCURRENCY", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("GUARDLINE_MAX_CONCURRENCY"));
    }

    #[test]
    fn loads_capability_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "nextdns": [
                {{ "category": "web_safesearch", "support": "partial", "direction": "push_only", "note": "beta" }}
            ] }}"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config =
            Config::from_lookup(lookup(&[("GUARDLINE_CAPABILITIES_FILE", path.as_str())])).unwrap();

        let caps = &config.capability_overrides["nextdns"];
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].category, RuleCategory::WebSafeSearch);
        assert_eq!(caps[0].support, SupportLevel::Partial);
    }
}
