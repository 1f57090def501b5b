//! Web-accessible folder (WAF) source adapter.
//!
//! A WAF is a directory listing served over HTTP. The gather step reads the
//! index page, follows every link that names a file in the same directory,
//! and downloads each document to learn its GUID. Links carrying a path,
//! query, fragment or `mailto:` are ignored.
//!
//! Problems with individual files are recorded as gather errors and the job
//! continues with the rest. An index with no usable links aborts the job.

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::config::SourceConfig;
use crate::error::GatherError;
use crate::gemini::extract_metadata_document;
use crate::http::HttpFetcher;
use crate::models::{DiscoveryRecord, HarvestSource, SourceKind};
use crate::traits::{Gathered, SourceAdapter};

const NO_LINKS_MESSAGE: &str = "Couldn't find any links to metadata files. (N.B. A common error is for the WAF to contain links that include path information. Links are discarded if they contain slashes. For example, it should be href=\"rivers.xml\" rather than href=\"/metadata/rivers.xml\".)";

pub struct WafAdapter {
    name: String,
    config: SourceConfig,
    http: HttpFetcher,
}

impl WafAdapter {
    pub fn new(name: String, config: SourceConfig, http: HttpFetcher) -> Self {
        Self { name, config, http }
    }
}

#[async_trait]
impl SourceAdapter for WafAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Waf
    }

    fn source(&self) -> HarvestSource {
        self.config.to_source(SourceKind::Waf, &self.name)
    }

    async fn gather(&self) -> Result<Gathered, GatherError> {
        let index = self
            .http
            .get_content(&self.config.url)
            .await
            .map_err(|e| GatherError::new(format!("Unable to get WAF content: {}", e)))?;

        // Links resolve against the URL the index was actually served from,
        // so "/folder" redirected to "/folder/" gives the right base.
        let base = waf_base_url(&index.final_url).ok_or_else(|| {
            GatherError::new(format!("Error extracting URLs from {}", index.final_url))
        })?;
        let links = extract_links(&index.body);
        if links.is_empty() {
            return Err(GatherError::new(NO_LINKS_MESSAGE));
        }

        let mut gathered = Gathered::default();
        for link in links {
            let url = format!("{}{}", base, link);
            let fetched = match self.http.get_content(&url).await {
                Ok(f) => f,
                Err(e) => {
                    gathered
                        .errors
                        .push(format!("Unable to get WAF link: {}", e));
                    continue;
                }
            };
            match extract_metadata_document(&fetched.body) {
                Ok((document, Some(guid))) => {
                    debug!(url = %url, guid = %guid, "Got GUID");
                    gathered.records.push(DiscoveryRecord {
                        guid,
                        source_reference: url,
                        content: Some(document),
                    });
                }
                Ok((_, None)) => gathered
                    .errors
                    .push(format!("Could not get the GUID for source {}", url)),
                Err(e) => gathered.errors.push(format!("{} ({})", e, url)),
            }
        }

        Ok(gathered)
    }
}

/// File links in a WAF index page, in page order.
pub fn extract_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .filter(|href| {
            let keep = !href.contains('?')
                && !href.contains('/')
                && !href.contains('#')
                && !href.contains("mailto:");
            if !keep {
                debug!(href = %href, "Ignoring WAF link");
            }
            keep
        })
        .map(str::to_string)
        .collect()
}

/// Directory URL that the links of an index page are relative to.
///
/// `scheme://host/path1/index.html?q#f` becomes `scheme://host/path1/`.
pub fn waf_base_url(index_url: &str) -> Option<String> {
    let mut url = Url::parse(index_url).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    let path = url.path().to_string();
    let dir = match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "/",
    };
    url.set_path(dir);
    Some(url.to_string())
}
