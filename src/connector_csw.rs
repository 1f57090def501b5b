//! CSW source adapter.
//!
//! Gathers every record identifier a catalog service lists, then fetches
//! each record with `GetRecordById`.
//!
//! # Configuration
//!
//! ```toml
//! [sources.csw.national]
//! url = "https://csw.example.org/geonetwork/srv/en/csw"
//! owner = "national-mapping-agency"
//! ```
//!
//! Paging and the request timeout come from `[http]` (`csw_page_size`,
//! `csw_timeout_secs`).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{HttpConfig, SourceConfig};
use crate::csw::{CswClient, CswService};
use crate::error::{FetchError, GatherError};
use crate::http::HttpFetcher;
use crate::models::{DiscoveryRecord, HarvestAttempt, HarvestSource, SourceKind};
use crate::traits::{Gathered, SourceAdapter};

pub struct CswAdapter {
    name: String,
    config: SourceConfig,
    client: Arc<dyn CswClient>,
    page_size: usize,
}

impl CswAdapter {
    pub fn new(
        name: String,
        config: SourceConfig,
        http: &HttpFetcher,
        http_config: &HttpConfig,
    ) -> Result<Self> {
        let fetcher = http.with_timeout(Duration::from_secs(http_config.csw_timeout_secs));
        let client = CswService::new(&config.url, fetcher)?;
        Ok(Self::with_client(
            name,
            config,
            Arc::new(client),
            http_config.csw_page_size,
        ))
    }

    /// Build an adapter around an existing client.
    pub fn with_client(
        name: String,
        config: SourceConfig,
        client: Arc<dyn CswClient>,
        page_size: usize,
    ) -> Self {
        Self {
            name,
            config,
            client,
            page_size,
        }
    }
}

#[async_trait]
impl SourceAdapter for CswAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Csw
    }

    fn source(&self) -> HarvestSource {
        self.config.to_source(SourceKind::Csw, &self.name)
    }

    async fn gather(&self) -> Result<Gathered, GatherError> {
        let listed = self
            .client
            .get_identifiers(self.page_size)
            .await
            .map_err(|e| {
                GatherError::new(format!(
                    "Error gathering the identifiers from the CSW server [{}]",
                    e
                ))
            })?;

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for identifier in listed {
            let Some(id) = identifier else {
                warn!(source = %self.source_id(), "CSW returned a record without an identifier");
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            records.push(DiscoveryRecord {
                guid: id.clone(),
                source_reference: id,
                content: None,
            });
        }

        if records.is_empty() {
            return Err(GatherError::new("No records received from the CSW server"));
        }
        debug!(source = %self.source_id(), count = records.len(), "CSW identifiers gathered");

        Ok(Gathered {
            records,
            errors: Vec::new(),
        })
    }

    async fn fetch(&self, attempt: &HarvestAttempt) -> Result<String, FetchError> {
        let record = self
            .client
            .get_record_by_id(&attempt.source_reference)
            .await
            .map_err(|e| FetchError::Csw {
                guid: attempt.guid.clone(),
                reason: e.to_string(),
            })?;
        record.ok_or_else(|| FetchError::EmptyRecord {
            guid: attempt.guid.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HarvestJob;

    struct FakeCsw {
        ids: Vec<Option<String>>,
        fail: bool,
    }

    #[async_trait]
    impl CswClient for FakeCsw {
        async fn get_identifiers(&self, _page_size: usize) -> Result<Vec<Option<String>>> {
            if self.fail {
                anyhow::bail!("connection refused");
            }
            Ok(self.ids.clone())
        }

        async fn get_record_by_id(&self, id: &str) -> Result<Option<String>> {
            match id {
                "missing" => Ok(None),
                "broken" => anyhow::bail!("service exception"),
                other => Ok(Some(format!("<MD_Metadata id=\"{}\"/>", other))),
            }
        }
    }

    fn adapter(ids: Vec<Option<&str>>, fail: bool) -> CswAdapter {
        let config = SourceConfig {
            url: "http://example.org/csw".to_string(),
            owner: Some("publisher".to_string()),
            active: true,
            validator_profiles: None,
            skip_responsible_party: None,
        };
        let client = FakeCsw {
            ids: ids.into_iter().map(|i| i.map(str::to_string)).collect(),
            fail,
        };
        CswAdapter::with_client("national".to_string(), config, Arc::new(client), 10)
    }

    #[tokio::test]
    async fn gather_dedupes_and_skips_missing_ids() {
        let gathered = adapter(vec![Some("a"), None, Some("b"), Some("a")], false)
            .gather()
            .await
            .unwrap();
        let guids: Vec<&str> = gathered.records.iter().map(|r| r.guid.as_str()).collect();
        assert_eq!(guids, vec!["a", "b"]);
        assert_eq!(gathered.records[0].source_reference, "a");
        assert!(gathered.records[0].content.is_none());
    }

    #[tokio::test]
    async fn gather_failures_abort() {
        let err = adapter(vec![], true).gather().await.unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Error gathering the identifiers from the CSW server ["));

        let err = adapter(vec![None], false).gather().await.unwrap_err();
        assert_eq!(err.to_string(), "No records received from the CSW server");
    }

    #[tokio::test]
    async fn fetch_maps_empty_and_failed_records() {
        let adapter = adapter(vec![Some("a")], false);
        let job = HarvestJob::new(&adapter.source_id());
        let attempt = |id: &str| {
            HarvestAttempt::new(
                &job,
                DiscoveryRecord {
                    guid: id.to_string(),
                    source_reference: id.to_string(),
                    content: None,
                },
            )
        };

        let body = adapter.fetch(&attempt("a")).await.unwrap();
        assert!(body.contains("id=\"a\""));

        let err = adapter.fetch(&attempt("missing")).await.unwrap_err();
        assert_eq!(err.to_string(), "Empty record for GUID missing");

        let err = adapter.fetch(&attempt("broken")).await.unwrap_err();
        assert!(matches!(err, FetchError::Csw { .. }));
    }
}
