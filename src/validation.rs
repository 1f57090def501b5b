//! Structural validation of GEMINI documents against named profiles.
//!
//! Each profile is an ordered rule set run over a parsed
//! [`GeminiDocument`]. Profiles run in the configured order and evaluation
//! stops at the first profile that fails, so the report always describes a
//! single profile.

use anyhow::Result;

use crate::gemini::{GeminiDocument, XmlElement};

/// Profile names accepted in configuration.
pub const KNOWN_PROFILES: &[&str] = &["iso19139", "gemini2", "constraints"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Profile {
    Iso19139,
    Gemini2,
    Constraints,
}

impl Profile {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "iso19139" => Some(Profile::Iso19139),
            "gemini2" => Some(Profile::Gemini2),
            "constraints" => Some(Profile::Constraints),
            _ => None,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Profile::Iso19139 => "ISO19139 XSD Schema",
            Profile::Gemini2 => "GEMINI 2.1 Schematron",
            Profile::Constraints => "ISO19139 Table A.1 Constraints Schematron",
        }
    }

    fn check(&self, root: &XmlElement) -> Vec<String> {
        match self {
            Profile::Iso19139 => check_iso19139(root),
            Profile::Gemini2 => check_gemini2(root),
            Profile::Constraints => check_constraints(root),
        }
    }
}

/// Outcome of validating one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    /// Empty when valid. Otherwise the first message is a header naming the
    /// failing profile and the rest are the individual rule failures.
    pub messages: Vec<String>,
}

impl ValidationReport {
    /// Diagnostic text recorded against an attempt.
    ///
    /// With `reject` the text announces that the import is aborted;
    /// otherwise it says the errors were tolerated.
    pub fn diagnostic(&self, reject: bool) -> String {
        let mut out = String::new();
        if reject {
            out.push_str("** ABORT! ** Import of this object is aborted because of errors associated with validation.\n\n");
        }
        if let Some((header, details)) = self.messages.split_first() {
            out.push_str(header);
            out.push_str(":\n\n");
            out.push_str(&details.join("\n\n"));
            out.push_str("\n\n");
        }
        if !reject {
            out.push_str(
                "Validation errors have not caused the import of this object to be aborted.\n\n",
            );
        }
        out
    }
}

/// An ordered set of validation profiles.
#[derive(Debug, Clone)]
pub struct Validators {
    profiles: Vec<Profile>,
}

impl Validators {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let profiles = names
            .iter()
            .map(|n| {
                let name = n.as_ref().trim();
                Profile::from_name(name).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Unknown validator profile '{}'. Available: {}",
                        name,
                        KNOWN_PROFILES.join(", ")
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { profiles })
    }

    pub fn is_valid(&self, document: &GeminiDocument) -> ValidationReport {
        for profile in &self.profiles {
            let failures = profile.check(document.root());
            if !failures.is_empty() {
                let mut messages = vec![format!(
                    "Validating against \"{}\" profile failed",
                    profile.title()
                )];
                messages.extend(failures);
                return ValidationReport {
                    valid: false,
                    messages,
                };
            }
        }
        ValidationReport {
            valid: true,
            messages: Vec::new(),
        }
    }
}

fn has(root: &XmlElement, path: &str) -> bool {
    !root.select(path).is_empty()
}

fn has_value(root: &XmlElement, path: &str) -> bool {
    !root.values(path).is_empty()
}

fn check_iso19139(root: &XmlElement) -> Vec<String> {
    if root.local_name() != "MD_Metadata" {
        return vec![format!(
            "Element '{}': No matching global declaration available for the validation root.",
            root.name()
        )];
    }
    let mut failures = Vec::new();
    for (element, path) in [
        ("gmd:fileIdentifier", "fileIdentifier"),
        ("gmd:contact", "contact"),
        ("gmd:dateStamp", "dateStamp"),
        ("gmd:identificationInfo", "identificationInfo"),
    ] {
        if !has(root, path) {
            failures.push(format!(
                "Element '{}': This element is expected but is missing.",
                element
            ));
        }
    }
    failures
}

fn check_gemini2(root: &XmlElement) -> Vec<String> {
    let ident = "identificationInfo/*";
    let mut failures = Vec::new();

    if !has_value(root, &format!("{}/citation/CI_Citation/title/*", ident)) {
        failures.push("Resource title is mandatory.".to_string());
    }
    if !has_value(root, &format!("{}/abstract/*", ident)) {
        failures.push("Resource abstract is mandatory.".to_string());
    }

    let resource_type = root
        .first_value(&["hierarchyLevel/MD_ScopeCode/@codeListValue"])
        .unwrap_or_default();
    if resource_type.is_empty() {
        failures.push("Resource type is mandatory.".to_string());
    }

    let parties = root.select(&format!("{}/pointOfContact/CI_ResponsibleParty", ident));
    let with_role = parties.iter().any(|p| {
        has_value(p, "organisationName/*") && has_value(p, "role/CI_RoleCode/@codeListValue")
    });
    if !with_role {
        failures.push(
            "Responsible organisation is mandatory, with an organisation name and a role."
                .to_string(),
        );
    }

    if !has_value(root, "dateStamp/*") {
        failures.push("Metadata date is mandatory.".to_string());
    }
    if !has_value(root, &format!("{}/descriptiveKeywords/MD_Keywords/keyword/*", ident)) {
        failures.push("Keyword is mandatory.".to_string());
    }

    if matches!(resource_type.as_str(), "dataset" | "series")
        && !has(
            root,
            &format!(
                "{}/extent/EX_Extent/geographicElement/EX_GeographicBoundingBox",
                ident
            ),
        )
    {
        failures.push(
            "Geographic bounding box is mandatory for datasets and dataset series.".to_string(),
        );
    }

    let use_constraints = has_value(root, &format!("{}/resourceConstraints/*/useLimitation/*", ident));
    let access_limits = has(
        root,
        &format!("{}/resourceConstraints/MD_LegalConstraints", ident),
    );
    if !use_constraints && !access_limits {
        failures.push(
            "Conditions applying to access and use or limitations on public access are mandatory."
                .to_string(),
        );
    }

    if !has_value(
        root,
        "contact/CI_ResponsibleParty/contactInfo/CI_Contact/address/CI_Address/electronicMailAddress/*",
    ) {
        failures.push("Metadata point of contact must have an email address.".to_string());
    }

    failures
}

fn check_constraints(root: &XmlElement) -> Vec<String> {
    let mut failures = Vec::new();
    for bbox in root.select(
        "identificationInfo/*/extent/EX_Extent/geographicElement/EX_GeographicBoundingBox",
    ) {
        let coord = |name: &str| {
            let path = format!("{}/Decimal", name);
            bbox.first_value(&[path.as_str()])
                .and_then(|v| v.parse::<f64>().ok())
        };
        let (west, east, south, north) = match (
            coord("westBoundLongitude"),
            coord("eastBoundLongitude"),
            coord("southBoundLatitude"),
            coord("northBoundLatitude"),
        ) {
            (Some(w), Some(e), Some(s), Some(n)) => (w, e, s, n),
            _ => {
                failures.push("Bounding box coordinates must be decimal numbers.".to_string());
                continue;
            }
        };
        if !(-180.0..=180.0).contains(&west) || !(-180.0..=180.0).contains(&east) {
            failures.push("Bounding box longitudes must lie between -180 and 180.".to_string());
        }
        if !(-90.0..=90.0).contains(&south) || !(-90.0..=90.0).contains(&north) {
            failures.push("Bounding box latitudes must lie between -90 and 90.".to_string());
        }
        if west > east {
            failures.push("West bound longitude must not exceed east bound longitude.".to_string());
        }
        if south > north {
            failures.push("South bound latitude must not exceed north bound latitude.".to_string());
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET1: &str = include_str!("../tests/fixtures/gemini2.1/dataset1.xml");

    #[test]
    fn fixture_passes_all_profiles() {
        let doc = GeminiDocument::parse(DATASET1).unwrap();
        let validators = Validators::new(KNOWN_PROFILES).unwrap();
        let report = validators.is_valid(&doc);
        assert!(report.valid, "{:?}", report.messages);
    }

    #[test]
    fn first_failing_profile_is_reported() {
        let doc = GeminiDocument::parse(
            r#"<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd"><gmd:contact/></gmd:MD_Metadata>"#,
        )
        .unwrap();
        let report = Validators::new(&["iso19139", "gemini2"]).unwrap().is_valid(&doc);
        assert!(!report.valid);
        assert_eq!(
            report.messages[0],
            "Validating against \"ISO19139 XSD Schema\" profile failed"
        );
        assert_eq!(report.messages.len(), 4);
        assert!(report.messages[1].contains("gmd:fileIdentifier"));
    }

    #[test]
    fn diagnostic_text_depends_on_reject_flag() {
        let report = ValidationReport {
            valid: false,
            messages: vec!["Header".to_string(), "a".to_string(), "b".to_string()],
        };
        assert_eq!(
            report.diagnostic(false),
            "Header:\n\na\n\nb\n\nValidation errors have not caused the import of this object to be aborted.\n\n"
        );
        assert!(report
            .diagnostic(true)
            .starts_with("** ABORT! ** Import of this object is aborted"));
        assert!(!report.diagnostic(true).contains("have not caused"));
    }

    #[test]
    fn unknown_profile_is_an_error() {
        assert!(Validators::new(&["fgdc"]).is_err());
    }

    #[test]
    fn constraints_catch_inverted_bbox() {
        let doc = GeminiDocument::parse(&DATASET1.replace("-8.97114288", "5.5")).unwrap();
        let report = Validators::new(&["constraints"]).unwrap().is_valid(&doc);
        assert!(!report.valid);
        assert!(report.messages[1].contains("West bound longitude"));
    }
}
