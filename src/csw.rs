//! Catalogue Service for the Web (CSW 2.0.2) client.
//!
//! Only the two operations the harvester needs are implemented, both as
//! key-value-pair GET requests: paged `GetRecords` to enumerate identifiers
//! and `GetRecordById` to fetch one full ISO 19139 record.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::ParseError;
use crate::gemini::{extract_metadata_document, parse_tree, XmlElement};
use crate::http::HttpFetcher;

const GMD_NAMESPACE: &str = "http://www.isotc211.org/2005/gmd";

/// The catalog-service operations a CSW source depends on.
#[async_trait]
pub trait CswClient: Send + Sync {
    /// Every record identifier the service lists, in service order. Records
    /// without an identifier appear as `None`.
    async fn get_identifiers(&self, page_size: usize) -> Result<Vec<Option<String>>>;

    /// The `MD_Metadata` document for `id`, or `None` when the service
    /// returned no record.
    async fn get_record_by_id(&self, id: &str) -> Result<Option<String>>;
}

/// One page of `GetRecords` results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    pub identifiers: Vec<Option<String>>,
    pub matched: usize,
    pub next_record: usize,
}

/// CSW client over HTTP.
pub struct CswService {
    endpoint: Url,
    http: HttpFetcher,
}

impl CswService {
    pub fn new(endpoint: &str, http: HttpFetcher) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("Invalid CSW endpoint: {}", endpoint))?;
        Ok(Self { endpoint, http })
    }

    fn request_url(&self, params: &[(&str, &str)]) -> String {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("service", "CSW").append_pair("version", "2.0.2");
            for (k, v) in params {
                query.append_pair(k, v);
            }
        }
        url.to_string()
    }

    async fn get(&self, url: &str) -> Result<String> {
        let content = self.http.get_content(url).await?;
        Ok(content.body)
    }
}

#[async_trait]
impl CswClient for CswService {
    async fn get_identifiers(&self, page_size: usize) -> Result<Vec<Option<String>>> {
        let page_size = page_size.to_string();
        let mut identifiers = Vec::new();
        let mut start = 1usize;

        loop {
            let start_position = start.to_string();
            let url = self.request_url(&[
                ("request", "GetRecords"),
                ("typeNames", "gmd:MD_Metadata"),
                ("resultType", "results"),
                ("elementSetName", "brief"),
                ("outputSchema", GMD_NAMESPACE),
                ("namespace", "xmlns(gmd=http://www.isotc211.org/2005/gmd)"),
                ("startPosition", &start_position),
                ("maxRecords", &page_size),
            ]);
            debug!(url = %url, start, "CSW GetRecords");
            let body = self.get(&url).await?;
            let page = parse_search_results(&body)?;
            let returned = page.identifiers.len();
            identifiers.extend(page.identifiers);

            if returned == 0
                || page.next_record == 0
                || page.next_record <= start
                || page.next_record > page.matched
            {
                break;
            }
            start = page.next_record;
        }

        Ok(identifiers)
    }

    async fn get_record_by_id(&self, id: &str) -> Result<Option<String>> {
        let url = self.request_url(&[
            ("request", "GetRecordById"),
            ("id", id),
            ("elementSetName", "full"),
            ("outputSchema", GMD_NAMESPACE),
        ]);
        debug!(url = %url, "CSW GetRecordById");
        let body = self.get(&url).await?;
        parse_record_response(&body)
    }
}

fn exception_text(root: &XmlElement) -> Option<String> {
    if root.local_name() != "ExceptionReport" {
        return None;
    }
    let text = root
        .values("Exception/ExceptionText")
        .join("; ");
    Some(if text.is_empty() {
        "Unknown service exception".to_string()
    } else {
        text
    })
}

/// Parse a `GetRecords` response.
pub fn parse_search_results(body: &str) -> Result<SearchPage> {
    let root = parse_tree(body).context("Invalid GetRecords response")?;
    if let Some(text) = exception_text(&root) {
        anyhow::bail!("CSW service exception: {}", text);
    }
    let results = root
        .find_with_ancestors("SearchResults")
        .map(|(el, _)| el)
        .context("GetRecords response has no SearchResults element")?;

    let number = |name: &str| -> usize {
        results
            .attr(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    };

    let identifiers = results
        .child_elements()
        .map(|record| {
            record.first_value(&[
                "fileIdentifier/CharacterString",
                "identifier",
            ])
        })
        .collect();

    Ok(SearchPage {
        identifiers,
        matched: number("numberOfRecordsMatched"),
        next_record: number("nextRecord"),
    })
}

/// Parse a `GetRecordById` response into the metadata document it carries.
pub fn parse_record_response(body: &str) -> Result<Option<String>> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let root = parse_tree(body).context("Invalid GetRecordById response")?;
    if let Some(text) = exception_text(&root) {
        anyhow::bail!("CSW service exception: {}", text);
    }
    match extract_metadata_document(body) {
        Ok((xml, _)) => Ok(Some(xml)),
        Err(ParseError::MissingMetadataElement) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_page() {
        let body = r#"<csw:GetRecordsResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2" xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco">
  <csw:SearchStatus timestamp="2012-01-01T00:00:00"/>
  <csw:SearchResults numberOfRecordsMatched="3" numberOfRecordsReturned="2" nextRecord="3">
    <gmd:MD_Metadata><gmd:fileIdentifier><gco:CharacterString>a</gco:CharacterString></gmd:fileIdentifier></gmd:MD_Metadata>
    <gmd:MD_Metadata><gmd:fileIdentifier gco:nilReason="missing"/></gmd:MD_Metadata>
  </csw:SearchResults>
</csw:GetRecordsResponse>"#;
        let page = parse_search_results(body).unwrap();
        assert_eq!(page.identifiers, vec![Some("a".to_string()), None]);
        assert_eq!(page.matched, 3);
        assert_eq!(page.next_record, 3);
    }

    #[test]
    fn exception_report_is_an_error() {
        let body = r#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows"><ows:Exception exceptionCode="NoApplicableCode"><ows:ExceptionText>boom</ows:ExceptionText></ows:Exception></ows:ExceptionReport>"#;
        let err = parse_search_results(body).unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(parse_record_response(body).is_err());
    }

    #[test]
    fn empty_record_response_is_none() {
        let body = r#"<csw:GetRecordByIdResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2"/>"#;
        assert_eq!(parse_record_response(body).unwrap(), None);
        assert_eq!(parse_record_response("").unwrap(), None);
    }

    #[test]
    fn request_urls_carry_service_and_version() {
        let http = HttpFetcher::new(std::time::Duration::from_secs(60), "test").unwrap();
        let service = CswService::new("http://example.org/csw?token=1", http).unwrap();
        let url = service.request_url(&[("request", "GetRecordById"), ("id", "a b")]);
        assert!(url.starts_with("http://example.org/csw?token=1&service=CSW&version=2.0.2"));
        assert!(url.contains("id=a+b"));
    }
}
