//! GEMINI / ISO 19139 document reading.
//!
//! Documents are parsed with `quick-xml` into a small element tree that is
//! queried with slash-separated paths of local names (`*` matches any
//! element, a trailing `@name` selects an attribute). Namespace prefixes are
//! ignored when matching, which lets one path cover `gmd:`/`srv:` variants
//! and the different prefixes publishers choose.
//!
//! [`extract_metadata_document`] pulls the `MD_Metadata` element out of
//! whatever a source returned, and [`GeminiDocument::read_values`] produces
//! the flat field set the import stage works from.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::Serialize;

use crate::error::ParseError;

// ═══════════════════════════════════════════════════════════════════════
// Element tree
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// One element with its attributes, children and byte span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
    start: usize,
    end: usize,
}

fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

impl XmlElement {
    fn from_start(e: &BytesStart<'_>, start: usize) -> Result<Self, ParseError> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| ParseError::Xml(err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| ParseError::Xml(err.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
            start,
            end: start,
        })
    }

    /// Qualified name as written in the document, e.g. `gmd:MD_Metadata`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// Attribute value by local name (`href` matches `xlink:href`).
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| !k.starts_with("xmlns") && local_part(k) == local)
            .map(|(_, v)| v.as_str())
    }

    /// Namespace declarations made on this element.
    pub fn namespace_declarations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .filter(|(k, _)| k == "xmlns" || k.starts_with("xmlns:"))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// Concatenated descendant text, trimmed.
    pub fn text(&self) -> String {
        fn collect(el: &XmlElement, out: &mut String) {
            for child in &el.children {
                match child {
                    XmlNode::Text(t) => out.push_str(t),
                    XmlNode::Element(e) => collect(e, out),
                }
            }
        }
        let mut out = String::new();
        collect(self, &mut out);
        out.trim().to_string()
    }

    /// Elements reached by following `path` from this element.
    pub fn select(&self, path: &str) -> Vec<&XmlElement> {
        let mut current = vec![self];
        for step in path.split('/').filter(|s| !s.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|el| {
                    el.child_elements()
                        .filter(move |c| step == "*" || c.local_name() == step)
                })
                .collect();
        }
        current
    }

    /// Non-empty text or attribute values at `path`, in document order.
    pub fn values(&self, path: &str) -> Vec<String> {
        let (element_path, attribute) = match path.rsplit_once('@') {
            Some((p, a)) => (p.trim_end_matches('/'), Some(a)),
            None => (path, None),
        };
        self.select(element_path)
            .into_iter()
            .filter_map(|el| match attribute {
                Some(a) => el.attr(a).map(|v| v.trim().to_string()),
                None => Some(el.text()),
            })
            .filter(|v| !v.is_empty())
            .collect()
    }

    /// First non-empty value found by trying each path in turn.
    pub fn first_value(&self, paths: &[&str]) -> Option<String> {
        paths
            .iter()
            .find_map(|p| self.values(p).into_iter().next())
    }

    /// Every element below this one, depth-first in document order.
    pub fn descendants(&self) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        for child in self.child_elements() {
            out.push(child);
            out.extend(child.descendants());
        }
        out
    }

    /// The namespace URI bound to this element's prefix, when the binding is
    /// declared on the element itself.
    pub fn own_namespace(&self) -> Option<&str> {
        let key = match self.name.split_once(':') {
            Some((prefix, _)) => format!("xmlns:{}", prefix),
            None => "xmlns".to_string(),
        };
        self.namespace_declarations()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// Depth-first search for the first element named `local`, returning it
    /// together with its ancestors (outermost first).
    pub fn find_with_ancestors<'a>(
        &'a self,
        local: &str,
    ) -> Option<(&'a XmlElement, Vec<&'a XmlElement>)> {
        if self.local_name() == local {
            return Some((self, Vec::new()));
        }
        for child in self.child_elements() {
            if let Some((found, mut ancestors)) = child.find_with_ancestors(local) {
                ancestors.insert(0, self);
                return Some((found, ancestors));
            }
        }
        None
    }
}

fn attach(
    el: XmlElement,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
) -> Result<(), ParseError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(el)),
        None if root.is_none() => *root = Some(el),
        None => return Err(ParseError::Xml("junk after document element".to_string())),
    }
    Ok(())
}

/// Parse `content` into its root element.
pub fn parse_tree(content: &str) -> Result<XmlElement, ParseError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let position = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| ParseError::Xml(format!("{} at position {}", e, position)))?;
        match event {
            Event::Start(e) => stack.push(XmlElement::from_start(&e, position)?),
            Event::Empty(e) => {
                let mut el = XmlElement::from_start(&e, position)?;
                el.end = reader.buffer_position() as usize;
                attach(el, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let mut el = stack
                    .pop()
                    .ok_or_else(|| ParseError::Xml("unexpected closing tag".to_string()))?;
                el.end = reader.buffer_position() as usize;
                attach(el, &mut stack, &mut root)?;
            }
            Event::Text(t) => {
                if let Some(parent) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| ParseError::Xml(e.to_string()))?
                        .into_owned();
                    parent.children.push(XmlNode::Text(text));
                }
            }
            Event::CData(c) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    parent.children.push(XmlNode::Text(text));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Xml(format!(
            "unexpected end of document, <{}> is not closed",
            open.name
        )));
    }
    root.ok_or_else(|| ParseError::Xml("document has no root element".to_string()))
}

// ═══════════════════════════════════════════════════════════════════════
// Metadata extraction
// ═══════════════════════════════════════════════════════════════════════

/// Pull the `MD_Metadata` element out of `content`.
///
/// Returns the element's text and its `fileIdentifier`. When the element is
/// nested inside another document (a CSW response, say), namespace
/// declarations made on its ancestors are copied onto it so the extracted
/// text stands alone.
pub fn extract_metadata_document(content: &str) -> Result<(String, Option<String>), ParseError> {
    if content.trim().is_empty() {
        return Err(ParseError::Blank);
    }
    let root = parse_tree(content)?;
    let (metadata, ancestors) = root
        .find_with_ancestors("MD_Metadata")
        .ok_or(ParseError::MissingMetadataElement)?;

    let guid = metadata.first_value(&["fileIdentifier/CharacterString"]);

    if ancestors.is_empty() {
        return Ok((content[metadata.start..metadata.end].to_string(), guid));
    }

    let mut extra = String::new();
    let declared: Vec<&str> = metadata.namespace_declarations().map(|(k, _)| k).collect();
    let mut seen: Vec<&str> = Vec::new();
    for ancestor in ancestors.iter().rev() {
        for (key, value) in ancestor.namespace_declarations() {
            if declared.contains(&key) || seen.contains(&key) {
                continue;
            }
            seen.push(key);
            extra.push_str(&format!(" {}=\"{}\"", key, escape_attribute(value)));
        }
    }

    let tag_end = metadata.start + 1 + metadata.name.len();
    let text = format!(
        "<{}{}{}",
        metadata.name,
        extra,
        &content[tag_end..metadata.end]
    );
    Ok((text, guid))
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

// ═══════════════════════════════════════════════════════════════════════
// Field values
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn has_zero_area(&self) -> bool {
        self.north == self.south || self.east == self.west
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceDate {
    #[serde(rename = "type")]
    pub date_type: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsibleOrganisation {
    pub organisation_name: String,
    pub role: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceLocator {
    pub url: String,
    pub name: String,
    pub description: String,
    pub protocol: String,
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoupledResource {
    pub href: Option<String>,
    pub uuid: Option<String>,
    pub title: Option<String>,
}

/// The flat field set read from one GEMINI document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeminiValues {
    pub guid: String,
    pub title: String,
    pub abstract_text: String,
    pub resource_type: String,
    pub bbox: Option<BoundingBox>,
    pub metadata_date: String,
    pub metadata_language: String,
    pub spatial_reference_system: String,
    pub dataset_reference_dates: Vec<ReferenceDate>,
    pub responsible_organisations: Vec<ResponsibleOrganisation>,
    pub resource_locators: Vec<ResourceLocator>,
    pub tags: Vec<String>,
    pub use_constraints: Vec<String>,
    pub use_constraints_anchor_href: Option<String>,
    pub use_constraints_anchor_title: Option<String>,
    pub limitations_on_public_access: Vec<String>,
    pub temporal_extent_begin: Vec<String>,
    pub temporal_extent_end: Vec<String>,
    pub contact_email: String,
    pub frequency_of_update: String,
    pub spatial_data_service_type: String,
    pub coupled_resources: Vec<CoupledResource>,
}

impl GeminiValues {
    pub fn is_non_geographic(&self) -> bool {
        self.resource_type == "nonGeographicDataset"
    }
}

const IDENT: &str = "identificationInfo/*";

/// A parsed GEMINI document.
#[derive(Debug, Clone)]
pub struct GeminiDocument {
    root: XmlElement,
}

impl GeminiDocument {
    pub fn parse(content: &str) -> Result<Self, ParseError> {
        if content.trim().is_empty() {
            return Err(ParseError::Blank);
        }
        Ok(Self {
            root: parse_tree(content)?,
        })
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    fn value(&self, paths: &[&str]) -> String {
        self.root.first_value(paths).unwrap_or_default()
    }

    fn ident(&self, rest: &str) -> String {
        format!("{}/{}", IDENT, rest)
    }

    fn ident_value(&self, rest: &str) -> String {
        self.value(&[self.ident(rest).as_str()])
    }

    /// The organisations named as points of contact for the resource.
    pub fn responsible_organisations(&self) -> Vec<ResponsibleOrganisation> {
        self.root
            .select(&self.ident("pointOfContact/CI_ResponsibleParty"))
            .into_iter()
            .map(|party| ResponsibleOrganisation {
                organisation_name: party
                    .first_value(&["organisationName/CharacterString"])
                    .unwrap_or_default(),
                role: party
                    .first_value(&["role/CI_RoleCode/@codeListValue", "role/CI_RoleCode"])
                    .unwrap_or_default(),
                email: party.first_value(&[
                    "contactInfo/CI_Contact/address/CI_Address/electronicMailAddress/CharacterString",
                ]),
            })
            .collect()
    }

    fn bbox(&self) -> Option<BoundingBox> {
        let base = self.ident("extent/EX_Extent/geographicElement/EX_GeographicBoundingBox");
        let coord = |name: &str| -> Option<f64> {
            let path = format!("{}/{}/Decimal", base, name);
            self.root
                .first_value(&[path.as_str()])
                .and_then(|v| v.parse::<f64>().ok())
        };
        Some(BoundingBox {
            west: coord("westBoundLongitude")?,
            east: coord("eastBoundLongitude")?,
            south: coord("southBoundLatitude")?,
            north: coord("northBoundLatitude")?,
        })
    }

    /// Read every field the import stage needs.
    pub fn read_values(&self) -> Result<GeminiValues, ParseError> {
        let guid = self.value(&["fileIdentifier/CharacterString"]);
        if guid.is_empty() {
            return Err(ParseError::MissingField("guid"));
        }
        let title = self.ident_value("citation/CI_Citation/title/CharacterString");
        if title.is_empty() {
            return Err(ParseError::MissingField("title"));
        }

        let dataset_reference_dates = self
            .root
            .select(&self.ident("citation/CI_Citation/date/CI_Date"))
            .into_iter()
            .map(|d| ReferenceDate {
                date_type: d
                    .first_value(&["dateType/CI_DateTypeCode/@codeListValue"])
                    .unwrap_or_default(),
                value: d.first_value(&["date/*"]).unwrap_or_default(),
            })
            .collect();

        let resource_locators = self
            .root
            .select("distributionInfo/MD_Distribution/transferOptions/MD_DigitalTransferOptions/onLine/CI_OnlineResource")
            .into_iter()
            .map(|r| ResourceLocator {
                url: r.first_value(&["linkage/URL"]).unwrap_or_default(),
                name: r.first_value(&["name/CharacterString"]).unwrap_or_default(),
                description: r
                    .first_value(&["description/CharacterString"])
                    .unwrap_or_default(),
                protocol: r
                    .first_value(&["protocol/CharacterString"])
                    .unwrap_or_default(),
                function: r
                    .first_value(&["function/CI_OnLineFunctionCode/@codeListValue"])
                    .unwrap_or_default(),
            })
            .collect();

        let anchor = self
            .root
            .select(&self.ident("resourceConstraints/*/useLimitation/Anchor"))
            .into_iter()
            .next();

        let coupled_resources = self
            .root
            .select("identificationInfo/SV_ServiceIdentification/operatesOn")
            .into_iter()
            .map(|op| CoupledResource {
                href: op.attr("href").map(str::to_string),
                uuid: op.attr("uuidref").map(str::to_string),
                title: op.attr("title").map(str::to_string),
            })
            .collect();

        Ok(GeminiValues {
            guid,
            title,
            abstract_text: self.ident_value("abstract/CharacterString"),
            resource_type: self.value(&[
                "hierarchyLevel/MD_ScopeCode/@codeListValue",
                "hierarchyLevel/MD_ScopeCode",
            ]),
            bbox: self.bbox(),
            metadata_date: self.value(&["dateStamp/*"]),
            metadata_language: self.value(&[
                "language/LanguageCode/@codeListValue",
                "language/CharacterString",
            ]),
            spatial_reference_system: self.value(&[
                "referenceSystemInfo/MD_ReferenceSystem/referenceSystemIdentifier/RS_Identifier/code/*",
            ]),
            dataset_reference_dates,
            responsible_organisations: self.responsible_organisations(),
            resource_locators,
            tags: self
                .root
                .values(&self.ident("descriptiveKeywords/MD_Keywords/keyword/*")),
            use_constraints: self
                .root
                .values(&self.ident("resourceConstraints/*/useLimitation/CharacterString")),
            use_constraints_anchor_href: anchor.and_then(|a| a.attr("href").map(str::to_string)),
            use_constraints_anchor_title: anchor
                .map(|a| a.text())
                .filter(|t| !t.is_empty()),
            limitations_on_public_access: self
                .root
                .values(&self.ident("resourceConstraints/MD_LegalConstraints/otherConstraints/*")),
            temporal_extent_begin: self.root.values(&self.ident(
                "extent/EX_Extent/temporalElement/EX_TemporalExtent/extent/TimePeriod/beginPosition",
            )),
            temporal_extent_end: self.root.values(&self.ident(
                "extent/EX_Extent/temporalElement/EX_TemporalExtent/extent/TimePeriod/endPosition",
            )),
            contact_email: self.value(&[
                "contact/CI_ResponsibleParty/contactInfo/CI_Contact/address/CI_Address/electronicMailAddress/CharacterString",
            ]),
            frequency_of_update: self.ident_value(
                "resourceMaintenance/MD_MaintenanceInformation/maintenanceAndUpdateFrequency/MD_MaintenanceFrequencyCode/@codeListValue",
            ),
            spatial_data_service_type: self.value(&[
                "identificationInfo/SV_ServiceIdentification/serviceType/LocalName",
            ]),
            coupled_resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET1: &str = include_str!("../tests/fixtures/gemini2.1/dataset1.xml");

    #[test]
    fn reads_fixture_values() {
        let doc = GeminiDocument::parse(DATASET1).unwrap();
        let values = doc.read_values().unwrap();

        assert_eq!(values.guid, "test-dataset-1");
        assert_eq!(values.title, "Country Parks (Scotland)");
        assert_eq!(values.resource_type, "dataset");
        assert_eq!(values.metadata_date, "2011-09-23");
        assert_eq!(values.metadata_language, "eng");
        assert_eq!(values.spatial_reference_system, "urn:ogc:def:crs:EPSG::27700");
        assert_eq!(values.tags, vec!["Protected sites", "Parks & Gardens"]);
        assert_eq!(values.contact_email, "metadata@example.org");
        assert_eq!(values.frequency_of_update, "irregular");
        assert_eq!(values.temporal_extent_begin, vec!["1998"]);
        assert_eq!(values.temporal_extent_end, vec!["2010"]);
        assert_eq!(values.limitations_on_public_access, vec!["no limitations"]);
        assert_eq!(values.use_constraints, vec!["Copyright Scottish Natural Heritage"]);
        assert_eq!(values.dataset_reference_dates.len(), 2);
        assert_eq!(values.dataset_reference_dates[1].date_type, "revision");

        let bbox = values.bbox.unwrap();
        assert_eq!(bbox.west, -8.97114288);
        assert_eq!(bbox.north, 61.06066944);
        assert!(!bbox.has_zero_area());

        assert_eq!(values.responsible_organisations.len(), 2);
        assert_eq!(values.responsible_organisations[0].role, "owner");
        assert_eq!(
            values.responsible_organisations[0].email.as_deref(),
            Some("data_supply@snh.gov.uk")
        );

        assert_eq!(values.resource_locators.len(), 2);
        assert_eq!(values.resource_locators[0].function, "information");
        assert_eq!(values.resource_locators[1].name, "Download");
    }

    #[test]
    fn extracts_metadata_from_a_wrapper_with_inherited_namespaces() {
        let wrapped = r#"<csw:GetRecordByIdResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2" xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco">
  <gmd:MD_Metadata>
    <gmd:fileIdentifier><gco:CharacterString>abc-123</gco:CharacterString></gmd:fileIdentifier>
  </gmd:MD_Metadata>
</csw:GetRecordByIdResponse>"#;
        let (text, guid) = extract_metadata_document(wrapped).unwrap();
        assert_eq!(guid.as_deref(), Some("abc-123"));
        assert!(text.starts_with("<gmd:MD_Metadata xmlns:"));
        assert!(text.contains(r#"xmlns:gmd="http://www.isotc211.org/2005/gmd""#));
        assert!(text.ends_with("</gmd:MD_Metadata>"));

        // The extracted text parses on its own.
        let root = parse_tree(&text).unwrap();
        assert_eq!(root.local_name(), "MD_Metadata");
    }

    #[test]
    fn extraction_errors_are_distinct() {
        assert_eq!(extract_metadata_document("  \n"), Err(ParseError::Blank));
        assert!(matches!(
            extract_metadata_document("<a><b></a>"),
            Err(ParseError::Xml(_))
        ));
        assert_eq!(
            extract_metadata_document("<html><body/></html>"),
            Err(ParseError::MissingMetadataElement)
        );
    }

    #[test]
    fn missing_identifier_is_none_and_missing_title_fails() {
        let doc = r#"<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd"/>"#;
        let (_, guid) = extract_metadata_document(doc).unwrap();
        assert_eq!(guid, None);

        let doc = r#"<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco"><gmd:fileIdentifier><gco:CharacterString>x</gco:CharacterString></gmd:fileIdentifier></gmd:MD_Metadata>"#;
        let err = GeminiDocument::parse(doc).unwrap().read_values().unwrap_err();
        assert_eq!(err, ParseError::MissingField("title"));
    }

    #[test]
    fn select_supports_wildcards_and_attributes() {
        let root = parse_tree(
            r#"<r xmlns:x="urn:x"><x:a k="1"><b>one</b></x:a><c k="2"><b>two</b></c></r>"#,
        )
        .unwrap();
        assert_eq!(root.values("*/b"), vec!["one", "two"]);
        assert_eq!(root.values("a/@k"), vec!["1"]);
        assert_eq!(root.first_value(&["missing", "c/b"]).as_deref(), Some("two"));
    }
}
