use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::{HarvestSource, SourceKind};
use crate::validation;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Settings consumed by the import stage.
#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    #[serde(default = "default_validator_profiles")]
    pub validator_profiles: Vec<String>,
    #[serde(default)]
    pub reject_invalid: bool,
    #[serde(default)]
    pub skip_responsible_party: Option<OneOrMany>,
    #[serde(default)]
    pub extras_not_overwritten: Vec<String>,
    #[serde(default = "default_true")]
    pub probe_services: bool,
    #[serde(default)]
    pub debug_exceptions: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            validator_profiles: default_validator_profiles(),
            reject_invalid: false,
            skip_responsible_party: None,
            extras_not_overwritten: Vec::new(),
            probe_services: true,
            debug_exceptions: false,
        }
    }
}

impl HarvestConfig {
    /// Debug mode is on when configured or when `HARVEST_DEBUG` is set.
    pub fn debug_enabled(&self) -> bool {
        self.debug_exceptions || std::env::var_os("HARVEST_DEBUG").is_some()
    }
}

fn default_validator_profiles() -> Vec<String> {
    vec!["iso19139".to_string(), "gemini2".to_string()]
}

fn default_true() -> bool {
    true
}

/// A value that may be written as a single string or a list of strings.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_csw_timeout_secs")]
    pub csw_timeout_secs: u64,
    #[serde(default = "default_csw_page_size")]
    pub csw_page_size: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            csw_timeout_secs: default_csw_timeout_secs(),
            csw_page_size: default_csw_page_size(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_probe_timeout_secs() -> u64 {
    10
}
fn default_csw_timeout_secs() -> u64 {
    60
}
fn default_csw_page_size() -> usize {
    25
}
fn default_user_agent() -> String {
    format!("spatial-harvest/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

/// Named sources, grouped by kind.
///
/// ```toml
/// [sources.waf.rivers]
/// url = "https://example.org/metadata/"
/// owner = "environment-agency"
/// ```
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub csw: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub waf: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub doc: BTreeMap<String, SourceConfig>,
}

impl SourcesConfig {
    /// Every configured source as `(kind, name, config)`, in kind then name order.
    pub fn iter(&self) -> impl Iterator<Item = (SourceKind, &String, &SourceConfig)> {
        self.csw
            .iter()
            .map(|(n, c)| (SourceKind::Csw, n, c))
            .chain(self.waf.iter().map(|(n, c)| (SourceKind::Waf, n, c)))
            .chain(self.doc.iter().map(|(n, c)| (SourceKind::Doc, n, c)))
    }

    pub fn len(&self) -> usize {
        self.csw.len() + self.waf.len() + self.doc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub validator_profiles: Option<Vec<String>>,
    #[serde(default)]
    pub skip_responsible_party: Option<OneOrMany>,
}

impl SourceConfig {
    /// The stored source record for this config entry.
    pub fn to_source(&self, kind: SourceKind, name: &str) -> HarvestSource {
        HarvestSource {
            id: format!("{}:{}", kind, name),
            kind,
            url: self.url.clone(),
            owner: self.owner.clone(),
            active: self.active,
            validator_profiles: self.validator_profiles.clone(),
            skip_responsible_party: self.skip_responsible_party.as_ref().map(OneOrMany::to_vec),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate http
    if config.http.timeout_secs == 0 {
        anyhow::bail!("http.timeout_secs must be > 0");
    }
    if config.http.probe_timeout_secs == 0 {
        anyhow::bail!("http.probe_timeout_secs must be > 0");
    }
    if config.http.csw_timeout_secs == 0 {
        anyhow::bail!("http.csw_timeout_secs must be > 0");
    }
    if !(1..=500).contains(&config.http.csw_page_size) {
        anyhow::bail!("http.csw_page_size must be in [1, 500]");
    }

    // Validate profiles
    check_profiles("harvest.validator_profiles", &config.harvest.validator_profiles)?;

    // Validate sources
    for (kind, name, source) in config.sources.iter() {
        let parsed = url::Url::parse(&source.url).with_context(|| {
            format!("sources.{}.{}.url is not a valid URL: {}", kind, name, source.url)
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!(
                "sources.{}.{}.url must be an http(s) URL, got scheme '{}'",
                kind,
                name,
                parsed.scheme()
            );
        }
        if let Some(profiles) = &source.validator_profiles {
            check_profiles(
                &format!("sources.{}.{}.validator_profiles", kind, name),
                profiles,
            )?;
        }
    }

    Ok(())
}

fn check_profiles(field: &str, profiles: &[String]) -> Result<()> {
    for profile in profiles {
        if !validation::KNOWN_PROFILES.contains(&profile.as_str()) {
            anyhow::bail!(
                "Unknown validator profile '{}' in {}. Available: {}",
                profile,
                field,
                validation::KNOWN_PROFILES.join(", ")
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse("[db]\npath = \"./data/harvest.sqlite\"\n").unwrap();
        assert_eq!(config.harvest.validator_profiles, vec!["iso19139", "gemini2"]);
        assert!(!config.harvest.reject_invalid);
        assert!(config.harvest.probe_services);
        assert_eq!(config.http.csw_page_size, 25);
        assert_eq!(config.http.probe_timeout_secs, 10);
        assert_eq!(config.logging.filter, "info");
        assert!(config.sources.is_empty());
    }

    #[test]
    fn skip_responsible_party_accepts_string_or_list() {
        let one = parse(
            "[db]\npath = \"x\"\n[harvest]\nskip_responsible_party = \"Ordnance Survey\"\n",
        )
        .unwrap();
        assert_eq!(
            one.harvest.skip_responsible_party.unwrap().to_vec(),
            vec!["Ordnance Survey"]
        );

        let many = parse(
            "[db]\npath = \"x\"\n[harvest]\nskip_responsible_party = [\"A\", \"B\"]\n",
        )
        .unwrap();
        assert_eq!(many.harvest.skip_responsible_party.unwrap().to_vec(), vec!["A", "B"]);
    }

    #[test]
    fn sources_are_listed_by_kind() {
        let config = parse(
            r#"
[db]
path = "x"

[sources.waf.rivers]
url = "http://example.org/waf/"
owner = "ea"

[sources.csw.national]
url = "http://example.org/csw"
active = false
"#,
        )
        .unwrap();
        let listed: Vec<_> = config
            .sources
            .iter()
            .map(|(k, n, c)| (k, n.clone(), c.active))
            .collect();
        assert_eq!(
            listed,
            vec![
                (SourceKind::Csw, "national".to_string(), false),
                (SourceKind::Waf, "rivers".to_string(), true),
            ]
        );
    }

    #[test]
    fn rejects_unknown_profile_and_bad_urls() {
        let err = parse("[db]\npath = \"x\"\n[harvest]\nvalidator_profiles = [\"fgdc\"]\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown validator profile 'fgdc'"));

        let err = parse("[db]\npath = \"x\"\n[sources.doc.one]\nurl = \"ftp://host/file.xml\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("must be an http(s) URL"));

        let err = parse("[db]\npath = \"x\"\n[http]\ncsw_page_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("csw_page_size"));
    }
}
