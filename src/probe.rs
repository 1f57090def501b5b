//! Map-service detection for resource URLs.
//!
//! A resource is treated as a WMS when a `GetCapabilities` request against
//! it returns a recognisable capabilities document. Both probe operations
//! fail closed: any network, parse or protocol problem answers "not a map
//! service" or "no endpoints".

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::info;
use url::Url;

use crate::gemini::{parse_tree, XmlElement};
use crate::http::HttpFetcher;

const WMS_NAMESPACE: &str = "http://www.opengis.net/wms";

#[async_trait]
pub trait ServiceProbe: Send + Sync {
    /// Whether `url` serves a Web Map Service.
    async fn is_map_service(&self, url: &str) -> bool;

    /// Base endpoints the service advertises for its operations.
    async fn base_endpoints(&self, url: &str) -> BTreeSet<String>;
}

/// Probe that never detects a map service. Used when probing is disabled.
pub struct NoServiceProbe;

#[async_trait]
impl ServiceProbe for NoServiceProbe {
    async fn is_map_service(&self, _url: &str) -> bool {
        false
    }

    async fn base_endpoints(&self, _url: &str) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// WMS probe issuing `GetCapabilities` requests.
pub struct WmsProbe {
    http: HttpFetcher,
}

impl WmsProbe {
    /// `http` should carry the short probe timeout.
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    async fn capabilities(&self, url: &str, version: Option<&str>) -> Option<XmlElement> {
        let request = match capabilities_url(url, version) {
            Some(u) => u,
            None => {
                info!(url = %url, "WMS check skipped, URL does not parse");
                return None;
            }
        };
        let content = match self.http.get_content(&request).await {
            Ok(c) => c,
            Err(e) => {
                info!(url = %request, error = %e, "WMS check failed to fetch capabilities");
                return None;
            }
        };
        match parse_tree(&content.body) {
            Ok(root) => Some(root),
            Err(e) => {
                info!(url = %request, error = %e, "WMS check got unparsable capabilities");
                None
            }
        }
    }
}

#[async_trait]
impl ServiceProbe for WmsProbe {
    async fn is_map_service(&self, url: &str) -> bool {
        if let Some(root) = self.capabilities(url, Some("1.3")).await {
            if is_wms_1_3(&root) {
                return true;
            }
        }
        if let Some(root) = self.capabilities(url, Some("1.1.1")).await {
            if is_wms_1_1_1(&root) {
                return true;
            }
        }
        info!(url = %url, "WMS check for URL failed");
        false
    }

    async fn base_endpoints(&self, url: &str) -> BTreeSet<String> {
        match self.capabilities(url, None).await {
            Some(root) => advertised_endpoints(&root),
            None => BTreeSet::new(),
        }
    }
}

/// `url` with `service=WMS&request=GetCapabilities` (and `version` when
/// given) replacing any existing values of those parameters.
pub fn capabilities_url(url: &str, version: Option<&str>) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| {
            !matches!(
                k.to_ascii_lowercase().as_str(),
                "service" | "request" | "version"
            )
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut query = parsed.query_pairs_mut();
        query.clear();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        query
            .append_pair("service", "WMS")
            .append_pair("request", "GetCapabilities");
        if let Some(v) = version {
            query.append_pair("version", v);
        }
    }
    Some(parsed.to_string())
}

fn has_service_exception(root: &XmlElement) -> bool {
    root.local_name() == "ServiceExceptionReport"
        || root
            .descendants()
            .iter()
            .any(|e| e.local_name() == "ServiceException")
}

/// A WMS 1.3 capabilities document: `WMS_Capabilities` in the WMS namespace.
pub fn is_wms_1_3(root: &XmlElement) -> bool {
    root.local_name() == "WMS_Capabilities"
        && root.own_namespace() == Some(WMS_NAMESPACE)
        && !has_service_exception(root)
}

/// A WMS 1.1.1 capabilities document offering at least one named layer.
pub fn is_wms_1_1_1(root: &XmlElement) -> bool {
    root.local_name() == "WMT_MS_Capabilities"
        && !has_service_exception(root)
        && root
            .descendants()
            .iter()
            .filter(|e| e.local_name() == "Layer")
            .any(|layer| !layer.values("Name").is_empty())
}

/// `OnlineResource` hrefs found under `HTTP` elements, without query strings.
pub fn advertised_endpoints(root: &XmlElement) -> BTreeSet<String> {
    root.descendants()
        .into_iter()
        .filter(|e| e.local_name() == "HTTP")
        .flat_map(|http| http.descendants())
        .filter(|e| e.local_name() == "OnlineResource")
        .filter_map(|e| e.attr("href"))
        .map(|href| href.split('?').next().unwrap_or(href).to_string())
        .filter(|href| !href.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WMS_130: &str = r#"<?xml version="1.0"?>
<WMS_Capabilities version="1.3.0" xmlns="http://www.opengis.net/wms" xmlns:xlink="http://www.w3.org/1999/xlink">
  <Service><Name>WMS</Name></Service>
  <Capability>
    <Request>
      <GetCapabilities>
        <DCPType><HTTP>
          <Get><OnlineResource xlink:href="http://maps.example.org/wms?"/></Get>
          <Post><OnlineResource xlink:href="http://maps.example.org/wms-post"/></Post>
        </HTTP></DCPType>
      </GetCapabilities>
      <GetMap>
        <DCPType><HTTP><Get><OnlineResource xlink:href="http://maps.example.org/wms?map=a"/></Get></HTTP></DCPType>
      </GetMap>
    </Request>
    <Layer><Name>parks</Name></Layer>
  </Capability>
</WMS_Capabilities>"#;

    #[test]
    fn builds_capabilities_url() {
        let url = capabilities_url(
            "http://maps.example.org/wms?map=parks&REQUEST=GetMap&version=1.0",
            Some("1.3"),
        )
        .unwrap();
        assert_eq!(
            url,
            "http://maps.example.org/wms?map=parks&service=WMS&request=GetCapabilities&version=1.3"
        );
        let url = capabilities_url("http://maps.example.org/wms", None).unwrap();
        assert_eq!(
            url,
            "http://maps.example.org/wms?service=WMS&request=GetCapabilities"
        );
        assert!(capabilities_url("not a url", None).is_none());
    }

    #[test]
    fn recognises_wms_versions() {
        let root = parse_tree(WMS_130).unwrap();
        assert!(is_wms_1_3(&root));
        assert!(!is_wms_1_1_1(&root));

        let old = parse_tree(
            r#"<WMT_MS_Capabilities version="1.1.1"><Capability><Layer><Title>t</Title><Layer><Name>rivers</Name></Layer></Layer></Capability></WMT_MS_Capabilities>"#,
        )
        .unwrap();
        assert!(is_wms_1_1_1(&old));

        let unnamed = parse_tree(
            r#"<WMT_MS_Capabilities version="1.1.1"><Capability><Layer><Title>t</Title></Layer></Capability></WMT_MS_Capabilities>"#,
        )
        .unwrap();
        assert!(!is_wms_1_1_1(&unnamed));

        let wrong_ns = parse_tree(r#"<WMS_Capabilities xmlns="urn:other"/>"#).unwrap();
        assert!(!is_wms_1_3(&wrong_ns));
    }

    #[test]
    fn collects_base_endpoints_without_queries() {
        let root = parse_tree(WMS_130).unwrap();
        let endpoints: Vec<String> = advertised_endpoints(&root).into_iter().collect();
        assert_eq!(
            endpoints,
            vec![
                "http://maps.example.org/wms".to_string(),
                "http://maps.example.org/wms-post".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn no_service_probe_answers_no() {
        let probe = NoServiceProbe;
        assert!(!probe.is_map_service("http://example.org/").await);
        assert!(probe.base_endpoints("http://example.org/").await.is_empty());
    }
}
