//! Projection of GEMINI field values into a catalog entry payload.
//!
//! Most of this module is pure: tag and name munging, licence splitting,
//! the responsible-party summary and resource matching. The two parts that
//! need collaborators are name generation (probes the catalog for free
//! names) and resource construction (probes each URL for a map service).

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Utc};
use deunicode::deunicode;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::gemini::{BoundingBox, GeminiValues, ResourceLocator, ResponsibleOrganisation};
use crate::models::{
    CatalogEntry, CatalogEntryPayload, EntryState, HarvestAttempt, Resource, ResponsibleParty, Tag,
};
use crate::probe::ServiceProbe;
use crate::store::CatalogWriter;

/// Longest tag kept from a document, before munging.
pub const MAX_TAG_LENGTH: usize = 50;

const MIN_NAME_LENGTH: usize = 2;
const MAX_NAME_LENGTH: usize = 100;
/// Suffixes tried after the bare name: `name1` to `name100`.
const NAME_SUFFIX_ATTEMPTS: usize = 100;

lazy_static! {
    static ref NAME_SEPARATORS: Regex = Regex::new(r"[ .:/]").unwrap();
    static ref NAME_DISALLOWED: Regex = Regex::new(r"[^a-zA-Z0-9\-_]").unwrap();
    static ref NAME_DASH_RUNS: Regex = Regex::new(r"-+").unwrap();
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Could not generate a unique name from the title or the GUID. Please choose a more unique title.")]
    NoUniqueName,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Everything the payload is derived from besides the document values.
pub struct PayloadInput<'a> {
    pub values: &'a GeminiValues,
    pub attempt: &'a HarvestAttempt,
    pub owner: Option<&'a str>,
    pub metadata_date: NaiveDateTime,
    /// The entry being updated, `None` on create.
    pub existing: Option<&'a CatalogEntry>,
    pub reactivate: bool,
    pub extras_not_overwritten: &'a [String],
}

/// Build the full payload for an accepted attempt.
pub async fn build_payload(
    input: PayloadInput<'_>,
    catalog: &dyn CatalogWriter,
    probe: &dyn ServiceProbe,
) -> Result<CatalogEntryPayload, PayloadError> {
    let values = input.values;

    let name = match input.existing {
        Some(entry) if entry.title == values.title => entry.name.clone(),
        _ => match gen_new_name(&values.title, catalog).await? {
            Some(name) => name,
            None => gen_new_name(&values.guid, catalog)
                .await?
                .ok_or(PayloadError::NoUniqueName)?,
        },
    };

    let mut resources = build_resources(&values.resource_locators, probe).await;
    pick_preview(&mut resources);
    if let Some(entry) = input.existing {
        match_existing_resources(&mut resources, &entry.resources);
    }

    Ok(CatalogEntryPayload {
        name,
        title: values.title.clone(),
        notes: values.abstract_text.clone(),
        owner: input.owner.map(str::to_string),
        state: input.reactivate.then_some(EntryState::Active),
        tags: build_tags(&values.tags),
        extras: build_extras(&input),
        resources,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Extras
// ═══════════════════════════════════════════════════════════════════════

fn json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn build_extras(input: &PayloadInput<'_>) -> BTreeMap<String, String> {
    let values = input.values;
    let mut extras = BTreeMap::new();
    let mut put = |key: &str, value: String| {
        extras.insert(key.to_string(), value);
    };

    put("UKLP", "True".to_string());
    put("import_source", "harvest".to_string());
    put("harvest_object_id", input.attempt.id.clone());
    put(
        "harvest_source_reference",
        input.attempt.source_reference.clone(),
    );
    put(
        "metadata-date",
        input.metadata_date.format("%Y-%m-%d").to_string(),
    );

    let (provider, parties) = process_responsible_organisations(&values.responsible_organisations);
    put("provider", provider);
    put(
        "responsible-party",
        parties
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
    );

    let coord = |f: fn(&BoundingBox) -> f64| {
        values.bbox.as_ref().map(|b| f(b).to_string()).unwrap_or_default()
    };
    put("bbox-east-long", coord(|b| b.east));
    put("bbox-north-lat", coord(|b| b.north));
    put("bbox-south-lat", coord(|b| b.south));
    put("bbox-west-long", coord(|b| b.west));
    put(
        "spatial-reference-system",
        values.spatial_reference_system.clone(),
    );
    put("guid", values.guid.clone());
    put(
        "dataset-reference-date",
        json(&values.dataset_reference_dates),
    );
    put("resource-type", values.resource_type.clone());
    put("metadata-language", values.metadata_language.clone());
    put("coupled-resource", json(&values.coupled_resources));
    put("contact-email", values.contact_email.clone());
    put("frequency-of-update", values.frequency_of_update.clone());
    put(
        "spatial-data-service-type",
        values.spatial_data_service_type.clone(),
    );

    let licence = process_licence(
        &values.use_constraints,
        values.use_constraints_anchor_href.as_deref(),
        values.use_constraints_anchor_title.as_deref(),
    );
    put(
        "licence",
        if licence.licence.is_empty() {
            String::new()
        } else {
            json(&licence.licence)
        },
    );
    if let Some(url) = licence.licence_url {
        put("licence_url", url);
    }
    if let Some(title) = licence.licence_url_title {
        put("licence_url_title", title);
    }

    put(
        "access_constraints",
        json(&values.limitations_on_public_access),
    );
    if !values.temporal_extent_begin.is_empty() {
        put(
            "temporal_coverage-from",
            json(&values.temporal_extent_begin),
        );
    }
    if !values.temporal_extent_end.is_empty() {
        put("temporal_coverage-to", json(&values.temporal_extent_end));
    }

    if let Some(bbox) = &values.bbox {
        put("spatial", extent_geojson(bbox.west, bbox.south, bbox.east, bbox.north));
    }

    // Extras edited outside harvesting win over harvested values.
    if let Some(entry) = input.existing {
        for key in input.extras_not_overwritten {
            if let Some(value) = entry.extras.get(key) {
                extras.insert(key.clone(), value.clone());
            }
        }
    }

    extras
}

/// GeoJSON polygon for a bounding box, min corner first.
pub fn extent_geojson(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> String {
    format!(
        "{{\"type\":\"Polygon\",\"coordinates\":[[[{minx}, {miny}],[{minx}, {maxy}], [{maxx}, {maxy}], [{maxx}, {miny}], [{minx}, {miny}]]]}}",
        minx = min_x,
        miny = min_y,
        maxx = max_x,
        maxy = max_y
    )
}

/// The provider (first owner, else first publisher, else empty) and every
/// organisation with the roles it plays, in order of first appearance.
pub fn process_responsible_organisations(
    organisations: &[ResponsibleOrganisation],
) -> (String, Vec<ResponsibleParty>) {
    let mut parties: Vec<ResponsibleParty> = Vec::new();
    let mut owner = None;
    let mut publisher = None;

    for org in organisations {
        let name = &org.organisation_name;
        match org.role.as_str() {
            "owner" if owner.is_none() => owner = Some(name.clone()),
            "publisher" if publisher.is_none() => publisher = Some(name.clone()),
            _ => {}
        }
        match parties.iter_mut().find(|p| &p.name == name) {
            Some(party) => {
                if !party.roles.contains(&org.role) {
                    party.roles.push(org.role.clone());
                }
            }
            None => parties.push(ResponsibleParty {
                name: name.clone(),
                roles: vec![org.role.clone()],
            }),
        }
    }

    (owner.or(publisher).unwrap_or_default(), parties)
}

/// Licence information split out of the use-constraint fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LicenceExtras {
    /// Free text, followed by any URL after the first.
    pub licence: Vec<String>,
    pub licence_url: Option<String>,
    pub licence_url_title: Option<String>,
}

fn is_url(s: &str) -> bool {
    Url::parse(s)
        .map(|u| u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

/// Split use constraints into licence text and licence URL.
///
/// An anchor href outranks URLs written in the free text. A bare anchor
/// title with no free text is treated as free text.
pub fn process_licence(
    use_constraints: &[String],
    anchor_href: Option<&str>,
    anchor_title: Option<&str>,
) -> LicenceExtras {
    let mut constraints: Vec<String> = use_constraints.to_vec();
    let mut title = anchor_title.filter(|t| !t.is_empty());
    if constraints.is_empty() {
        if let Some(t) = title.take() {
            constraints.push(t.to_string());
        }
    }

    let mut urls: Vec<(String, Option<String>)> = Vec::new();
    if let Some(href) = anchor_href.filter(|h| !h.is_empty()) {
        urls.push((href.to_string(), title.map(str::to_string)));
    }
    let mut extras = LicenceExtras::default();
    for constraint in constraints {
        if is_url(&constraint) {
            urls.push((constraint, None));
        } else {
            extras.licence.push(constraint);
        }
    }

    let mut urls = urls.into_iter();
    if let Some((url, title)) = urls.next() {
        extras.licence_url = Some(url);
        extras.licence_url_title = title;
    }
    extras.licence.extend(urls.map(|(url, _)| url));
    extras
}

// ═══════════════════════════════════════════════════════════════════════
// Tags and names
// ═══════════════════════════════════════════════════════════════════════

/// Tag name accepted by the catalog: ASCII, lower case, `[a-z0-9 -]` with
/// spaces turned into hyphens.
pub fn munge_tag(tag: &str) -> String {
    let ascii = deunicode(tag).to_lowercase();
    ascii
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '-')
        .map(|c| if c == ' ' { '-' } else { c })
        .collect()
}

/// Tags truncated to [`MAX_TAG_LENGTH`] and munged. Tags that munge to
/// nothing are dropped.
pub fn build_tags(tags: &[String]) -> Vec<Tag> {
    tags.iter()
        .filter_map(|tag| {
            let display_name: String = tag.chars().take(MAX_TAG_LENGTH).collect();
            let name = munge_tag(&display_name);
            if name.is_empty() {
                debug!(tag = %tag, "Dropping tag with no usable characters");
                return None;
            }
            Some(Tag { name, display_name })
        })
        .collect()
}

/// Slug for an entry name: `[a-z0-9-_]`, 2 to 100 characters.
pub fn munge_title_to_name(title: &str) -> String {
    let ascii = deunicode(title);
    let name = NAME_SEPARATORS.replace_all(&ascii, "-");
    let name = NAME_DISALLOWED.replace_all(&name, "").to_lowercase();
    let name = NAME_DASH_RUNS.replace_all(&name, "-");
    let mut name: String = name.trim_matches('-').chars().take(MAX_NAME_LENGTH).collect();
    while name.len() < MIN_NAME_LENGTH {
        name.push('_');
    }
    name
}

/// First free name derived from `title`: the slug itself, then the slug
/// with `1` to `100` appended. `None` when all of them are taken.
pub async fn gen_new_name(
    title: &str,
    catalog: &dyn CatalogWriter,
) -> anyhow::Result<Option<String>> {
    let mut name = munge_title_to_name(title).replace('_', "-");
    while name.contains("--") {
        name = name.replace("--", "-");
    }

    if !catalog.name_exists(&name).await? {
        return Ok(Some(name));
    }
    for counter in 1..=NAME_SUFFIX_ATTEMPTS {
        let suffix = counter.to_string();
        let base: String = name
            .chars()
            .take(MAX_NAME_LENGTH - suffix.len())
            .collect();
        let candidate = format!("{}{}", base, suffix);
        if !catalog.name_exists(&candidate).await? {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

// ═══════════════════════════════════════════════════════════════════════
// Resources
// ═══════════════════════════════════════════════════════════════════════

/// One resource per locator with a URL, probing each for a map service.
pub async fn build_resources(
    locators: &[ResourceLocator],
    probe: &dyn ServiceProbe,
) -> Vec<Resource> {
    let mut resources = Vec::new();
    for locator in locators.iter().filter(|l| !l.url.is_empty()) {
        let mut resource = Resource {
            url: locator.url.clone(),
            name: locator.name.clone(),
            description: [&locator.description, &locator.function]
                .into_iter()
                .find(|s| !s.is_empty())
                .cloned()
                .unwrap_or_else(|| "Resource locator".to_string()),
            resource_locator_protocol: locator.protocol.clone(),
            resource_locator_function: locator.function.clone(),
            ..Default::default()
        };

        if probe.is_map_service(&locator.url).await {
            let base_urls = probe.base_endpoints(&locator.url).await;
            resource.format = Some("WMS".to_string());
            resource.verified = true;
            resource.verified_date = Some(Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string());
            resource.wms_base_urls = Some(base_urls.into_iter().collect::<Vec<_>>().join(" "));
        }
        resources.push(resource);
    }
    resources
}

/// Flag the resource to use for map previews: the first verified map
/// service, else the first map service.
pub fn pick_preview(resources: &mut [Resource]) {
    let index = resources
        .iter()
        .position(|r| r.is_wms() && r.verified)
        .or_else(|| resources.iter().position(Resource::is_wms));
    if let Some(i) = index {
        resources[i].recommended_wms_preview = true;
    }
}

/// Give new resources the ids of the existing resources they correspond
/// to, so an update keeps resource identity.
///
/// The first pass matches on url, name and description; the second on url
/// alone. Each existing resource is matched at most once.
pub fn match_existing_resources(resources: &mut [Resource], existing: &[Resource]) {
    let mut unmatched: Vec<&Resource> = existing.iter().filter(|r| r.id.is_some()).collect();
    let total = resources.len();
    let mut matched = 0;

    let passes: [fn(&Resource, &Resource) -> bool; 2] = [
        |a, b| a.url == b.url && a.name == b.name && a.description == b.description,
        |a, b| a.url == b.url,
    ];
    for same in passes {
        for resource in resources.iter_mut().filter(|r| r.id.is_none()) {
            if let Some(pos) = unmatched.iter().position(|old| same(&*resource, *old)) {
                resource.id = unmatched.remove(pos).id.clone();
                matched += 1;
            }
        }
    }
    info!("Matched resources to existing ones: {}/{}", matched, total);
}
