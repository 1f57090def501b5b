//! Single-document source adapter.
//!
//! The gather step downloads the one configured URL and reads its GUID, so
//! the single attempt it produces already carries its content and the fetch
//! step has nothing left to do.
//!
//! ```toml
//! [sources.doc.country-parks]
//! url = "https://example.org/metadata/country-parks.xml"
//! ```

use async_trait::async_trait;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::GatherError;
use crate::gemini::extract_metadata_document;
use crate::http::HttpFetcher;
use crate::models::{DiscoveryRecord, HarvestSource, SourceKind};
use crate::traits::{Gathered, SourceAdapter};

pub struct DocAdapter {
    name: String,
    config: SourceConfig,
    http: HttpFetcher,
}

impl DocAdapter {
    pub fn new(name: String, config: SourceConfig, http: HttpFetcher) -> Self {
        Self { name, config, http }
    }
}

#[async_trait]
impl SourceAdapter for DocAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Doc
    }

    fn source(&self) -> HarvestSource {
        self.config.to_source(SourceKind::Doc, &self.name)
    }

    async fn gather(&self) -> Result<Gathered, GatherError> {
        let url = &self.config.url;
        let fetched = self
            .http
            .get_content(url)
            .await
            .map_err(|e| GatherError::new(format!("Unable to get document: {}", e)))?;

        let (document, guid) = extract_metadata_document(&fetched.body).map_err(|e| {
            GatherError::new(format!(
                "Error parsing the document. Is this a valid Gemini document?: {} [{}]",
                url, e
            ))
        })?;
        let guid = guid.ok_or_else(|| {
            GatherError::new(format!("Could not get the GUID for source {}", url))
        })?;
        debug!(url = %url, guid = %guid, "Got GUID");

        Ok(Gathered {
            records: vec![DiscoveryRecord {
                guid,
                source_reference: url.clone(),
                content: Some(document),
            }],
            errors: Vec::new(),
        })
    }
}
