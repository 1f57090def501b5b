//! Extension traits for harvest sources.
//!
//! Every configured source is served by one [`SourceAdapter`]. The three
//! built-in adapters cover CSW services, single documents and
//! web-accessible folders; custom adapters can be registered alongside them
//! and run through the same gather → fetch → import pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             AdapterRegistry              │
//! │  ┌─────────┐ ┌─────────┐ ┌────────────┐  │
//! │  │  CSW    │ │  Doc    │ │  WAF /     │  │
//! │  │         │ │         │ │  custom    │  │
//! │  └─────────┘ └─────────┘ └────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!          run_job() → reconciliation engine
//! ```
//!
//! # Usage
//!
//! ```rust
//! use spatial_harvest::traits::AdapterRegistry;
//!
//! let mut adapters = AdapterRegistry::new();
//! // adapters.register(Box::new(MyAdapter::new()));
//! assert!(adapters.is_empty());
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::error::{FetchError, GatherError};
use crate::http::HttpFetcher;
use crate::models::{DiscoveryRecord, HarvestAttempt, HarvestSource, SourceKind};

// ═══════════════════════════════════════════════════════════════════════
// SourceAdapter Trait
// ═══════════════════════════════════════════════════════════════════════

/// What a gather step produced.
#[derive(Debug, Default)]
pub struct Gathered {
    /// One record per identity to harvest.
    pub records: Vec<DiscoveryRecord>,
    /// Problems with individual identities. They are recorded as gather
    /// errors against the job but do not abort it.
    pub errors: Vec<String>,
}

/// A harvest source that can enumerate identities and fetch their content.
///
/// # Lifecycle
///
/// 1. [`gather`](SourceAdapter::gather) lists the identities. An `Err` aborts
///    the whole job.
/// 2. [`fetch`](SourceAdapter::fetch) is called for each gathered attempt.
///    Adapters that downloaded documents during gather return the content
///    already on the attempt, which is what the default implementation does.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Instance name from the config, e.g. `"rivers"`.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Source id (`"<kind>:<name>"`) used to key jobs and attempts.
    fn source_id(&self) -> String {
        format!("{}:{}", self.kind(), self.name())
    }

    /// The persisted description of this source.
    fn source(&self) -> HarvestSource;

    async fn gather(&self) -> Result<Gathered, GatherError>;

    async fn fetch(&self, attempt: &HarvestAttempt) -> Result<String, FetchError> {
        attempt.content.clone().ok_or_else(|| FetchError::EmptyRecord {
            guid: attempt.guid.clone(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of source adapters (built-in and custom).
///
/// Use [`AdapterRegistry::from_config`] to create a registry pre-loaded with
/// one adapter per configured source, then optionally call
/// [`register`](AdapterRegistry::register) to add custom ones.
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Create a registry holding an adapter for every configured source.
    pub fn from_config(config: &Config) -> Result<Self> {
        use crate::connector_csw::CswAdapter;
        use crate::connector_doc::DocAdapter;
        use crate::connector_waf::WafAdapter;

        let http = HttpFetcher::from_config(&config.http)?;
        let mut registry = Self::new();

        for (name, cfg) in &config.sources.csw {
            registry.register(Box::new(CswAdapter::new(
                name.clone(),
                cfg.clone(),
                &http,
                &config.http,
            )?));
        }
        for (name, cfg) in &config.sources.waf {
            registry.register(Box::new(WafAdapter::new(
                name.clone(),
                cfg.clone(),
                http.clone(),
            )));
        }
        for (name, cfg) in &config.sources.doc {
            registry.register(Box::new(DocAdapter::new(
                name.clone(),
                cfg.clone(),
                http.clone(),
            )));
        }

        Ok(registry)
    }

    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>) {
        self.adapters.push(Arc::from(adapter));
    }

    pub fn adapters(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }

    pub fn adapters_by_kind(&self, kind: SourceKind) -> Vec<Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .filter(|a| a.kind() == kind)
            .cloned()
            .collect()
    }

    /// Find an adapter by source id (`"waf:rivers"`).
    pub fn find(&self, source_id: &str) -> Option<&dyn SourceAdapter> {
        self.adapters
            .iter()
            .find(|a| a.source_id() == source_id)
            .map(|a| a.as_ref())
    }

    /// Resolve a CLI target: `all`, a kind (`waf`) or a source id (`waf:rivers`).
    pub fn select(&self, target: &str) -> Result<Vec<Arc<dyn SourceAdapter>>> {
        if target == "all" {
            return Ok(self.adapters.clone());
        }
        if !target.contains(':') {
            let kind: SourceKind = target.parse()?;
            return Ok(self.adapters_by_kind(kind));
        }
        match self.adapters.iter().find(|a| a.source_id() == target) {
            Some(adapter) => Ok(vec![adapter.clone()]),
            None => anyhow::bail!(
                "Unknown source: '{}'. Run `harvest sources` to list configured sources.",
                target
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        toml::from_str(
            r#"
[db]
path = "unused.sqlite"

[sources.csw.national]
url = "http://example.org/csw"

[sources.waf.rivers]
url = "http://example.org/waf/"

[sources.waf.lakes]
url = "http://example.org/lakes/"

[sources.doc.single]
url = "http://example.org/doc.xml"
"#,
        )
        .unwrap()
    }

    #[test]
    fn registry_holds_one_adapter_per_source() {
        let registry = AdapterRegistry::from_config(&config()).unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.adapters_by_kind(SourceKind::Waf).len(), 2);
        assert!(registry.find("doc:single").is_some());
        assert!(registry.find("doc:missing").is_none());
    }

    #[test]
    fn select_resolves_targets() {
        let registry = AdapterRegistry::from_config(&config()).unwrap();
        assert_eq!(registry.select("all").unwrap().len(), 4);
        assert_eq!(registry.select("waf").unwrap().len(), 2);
        let one = registry.select("csw:national").unwrap();
        assert_eq!(one[0].source_id(), "csw:national");
        assert!(registry.select("waf:nope").is_err());
        assert!(registry.select("ftp").is_err());
    }
}
