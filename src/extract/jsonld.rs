//! Schema.org JSON-LD extractor (`Dataset` and friends).

use super::json::{number, text, text_of};
use super::{
    invalid, parse_datetime, read_source, Extraction, ExtractorConfig, FieldPolicy,
    MetadataExtractor,
};
use crate::classify::{classify, OnlineResource};
use crate::error::ExtractionError;
use crate::models::{Metadata, MetadataRelationship, Resource, ResourceKind};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, warn};

pub const SUPPORTED_TYPES: &[&str] = &["Dataset", "DataCatalog", "CreativeWork"];

const RELATION_PROPERTIES: &[&str] = &["isPartOf", "isBasedOn", "hasPart", "sameAs"];

const CONTACT_PROPERTIES: &[&str] = &["creator", "publisher", "author"];

#[derive(Debug, Clone, Default)]
pub struct JsonLdExtractor {
    config: ExtractorConfig,
}

impl JsonLdExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// The dataset node: the document itself, or the first supported node of
    /// an `@graph`.
    fn parse(&self, path: &Path) -> Result<Map<String, Value>, ExtractionError> {
        let content = read_source(path)?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| ExtractionError::extraction(path, format!("invalid JSON-LD: {e}")))?;
        let Value::Object(mut document) = value else {
            return Err(ExtractionError::extraction(
                path,
                "expected a JSON-LD object at the top level",
            ));
        };

        let graph_node = document
            .get("@graph")
            .and_then(Value::as_array)
            .and_then(|nodes| {
                let objects = nodes.iter().filter_map(Value::as_object);
                objects
                    .clone()
                    .find(|node| has_supported_type(node))
                    .or_else(|| objects.clone().next())
                    .cloned()
            });
        if let Some(mut node) = graph_node {
            if let Some(context) = document.remove("@context") {
                node.entry("@context").or_insert(context);
            }
            return Ok(node);
        }
        Ok(document)
    }

    fn check_structure(&self, data: &Map<String, Value>, path: &Path) -> Result<(), ExtractionError> {
        if !self.config.strict_mode {
            return Ok(());
        }
        if !data.contains_key("@context") {
            return Err(ExtractionError::extraction(
                path,
                "missing @context, not a JSON-LD document",
            ));
        }
        if !has_supported_type(data) {
            let declared = types(data).join(", ");
            return Err(ExtractionError::extraction(
                path,
                format!(
                    "unsupported @type: {declared}. Expected one of: {}",
                    SUPPORTED_TYPES.join(", ")
                ),
            ));
        }
        Ok(())
    }

    fn to_metadata(
        &self,
        data: &Map<String, Value>,
        path: &Path,
    ) -> Result<Extraction, ExtractionError> {
        let mut policy = FieldPolicy::new(self.config.strict_mode);
        let invalid = invalid(path);

        let title = policy
            .mandatory("title", text_of(data, &["name", "headline"]))
            .map_err(&invalid)?;
        let abstract_text = policy
            .mandatory("abstract", text_of(data, &["description", "abstract"]))
            .map_err(&invalid)?;

        let coordinates = match spatial_coordinates(data) {
            Spatial::Coordinates(coordinates) => coordinates,
            Spatial::Malformed(reason) => {
                policy.dropped("bounding box", reason);
                [None; 4]
            }
        };
        let bbox = policy.bounding_box(coordinates).map_err(&invalid)?;

        let (start, end) = temporal_coverage(data);
        let (start, end) = policy.temporal(start, end).map_err(&invalid)?;

        let (organization, email) = contact(data);
        let resources: Vec<OnlineResource> = distributions(data)
            .into_iter()
            .filter_map(online_resource)
            .collect();
        let landing = text_of(data, &["url"]);
        let distribution = classify(&resources, landing.as_deref(), &self.config.profile, None);

        let builder = Metadata::builder(title, abstract_text)
            .keywords(keywords(data))
            .bounding_box(bbox)
            .temporal_extent(start, end)
            .contact_organization(organization)
            .contact_email(email)
            .metadata_date(
                text_of(data, &["dateModified", "datePublished"])
                    .as_deref()
                    .and_then(parse_datetime),
            )
            .dataset_language(named(data.get("inLanguage")))
            .topic_category(named(data.get("about")))
            .download_url(distribution.download_url)
            .landing_page_url(distribution.landing_page_url)
            .access_type(distribution.access_type)
            .relationships(relationships(data));

        policy.finish(builder, path)
    }
}

impl MetadataExtractor for JsonLdExtractor {
    fn format_name(&self) -> &'static str {
        "jsonld"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jsonld"]
    }

    fn sniff(&self, head: &str) -> bool {
        head.trim_start().starts_with('{') && head.contains("\"@context\"")
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractionError> {
        let data = self.parse(path)?;
        self.check_structure(&data, path)?;
        let extraction = self.to_metadata(&data, path)?;
        debug!(
            path = %path.display(),
            gaps = extraction.gaps.len(),
            "extracted JSON-LD metadata"
        );
        Ok(extraction)
    }

    fn extract_resources(&self, path: &Path) -> Vec<Resource> {
        let data = match self.parse(path) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "resource discovery failed");
                return Vec::new();
            }
        };

        distributions(&data)
            .into_iter()
            .filter_map(|dist| {
                let mut resource = online_resource(dist)?.to_resource(&self.config.profile)?;
                if resource.kind == ResourceKind::RemoteFile {
                    if let Some(format) = text_of(dist, &["encodingFormat", "fileFormat"]) {
                        resource.format = Some(format);
                    }
                }
                Some(resource)
            })
            .collect()
    }
}

/// `@type` values with any `schema:` or vocabulary URL prefix stripped.
fn types(data: &Map<String, Value>) -> Vec<String> {
    let declared: Vec<&Value> = match data.get("@type") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
        None => Vec::new(),
    };
    declared
        .into_iter()
        .filter_map(Value::as_str)
        .map(|t| t.rsplit(['/', ':', '#']).next().unwrap_or(t).to_string())
        .collect()
}

fn has_supported_type(data: &Map<String, Value>) -> bool {
    types(data)
        .iter()
        .any(|t| SUPPORTED_TYPES.contains(&t.as_str()))
}

/// A bare string, or the `name` of an object.
fn named(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Object(map) => text_of(map, &["name", "alternateName", "@value"]),
        Value::Array(items) => items.iter().find_map(|item| named(Some(item))),
        other => text(other),
    }
}

fn keywords(data: &Map<String, Value>) -> Vec<String> {
    match data.get("keywords") {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| named(Some(item)))
            .collect(),
        _ => Vec::new(),
    }
}

enum Spatial {
    Coordinates([Option<f64>; 4]),
    Malformed(String),
}

fn spatial_coordinates(data: &Map<String, Value>) -> Spatial {
    let place = match data.get("spatialCoverage") {
        Some(Value::Object(map)) => map,
        Some(Value::Array(items)) => match items.iter().find_map(Value::as_object) {
            Some(map) => map,
            None => return Spatial::Coordinates([None; 4]),
        },
        _ => return Spatial::Coordinates([None; 4]),
    };
    let geo = place.get("geo").and_then(Value::as_object).unwrap_or(place);

    if let Some(raw) = geo.get("box").and_then(Value::as_str) {
        // "south west north east", commas optional.
        let parts: Vec<&str> = raw
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();
        let values: Vec<f64> = parts.iter().filter_map(|p| p.parse().ok()).collect();
        return match values.as_slice() {
            [south, west, north, east] if parts.len() == 4 => {
                Spatial::Coordinates([Some(*west), Some(*east), Some(*south), Some(*north)])
            }
            _ => Spatial::Malformed(format!("box {raw:?} is not \"south west north east\"")),
        };
    }

    let latitude = geo.get("latitude").and_then(number);
    let longitude = geo.get("longitude").and_then(number);
    match (latitude, longitude) {
        (Some(lat), Some(lon)) => Spatial::Coordinates([Some(lon), Some(lon), Some(lat), Some(lat)]),
        _ => Spatial::Coordinates([None; 4]),
    }
}

/// ISO 8601 interval (`start/end`, `..` for an open end) or a single instant,
/// which is used as both start and end.
fn temporal_coverage(data: &Map<String, Value>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let Some(coverage) = data.get("temporalCoverage").and_then(text) else {
        return (None, None);
    };
    match coverage.split_once('/') {
        Some((start, end)) => (parse_datetime(start), parse_datetime(end)),
        None => {
            let instant = parse_datetime(&coverage);
            (instant, instant)
        }
    }
}

/// Creator, then publisher, then author; the first with a name wins.
fn contact(data: &Map<String, Value>) -> (Option<String>, Option<String>) {
    for property in CONTACT_PROPERTIES {
        let entity = match data.get(*property) {
            Some(Value::Array(items)) => items.first(),
            other => other,
        };
        match entity {
            Some(Value::Object(map)) => {
                if let Some(name) = text_of(map, &["name"]) {
                    return (Some(name), text_of(map, &["email"]));
                }
            }
            Some(other) => {
                if let Some(name) = text(other) {
                    return (Some(name), None);
                }
            }
            None => {}
        }
    }
    (None, None)
}

fn distributions(data: &Map<String, Value>) -> Vec<&Map<String, Value>> {
    match data.get("distribution") {
        Some(Value::Object(map)) => vec![map],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

/// `contentUrl` is a download, or file access when it names a folder; a bare
/// `url` is an information page.
fn online_resource(dist: &Map<String, Value>) -> Option<OnlineResource> {
    let name = text_of(dist, &["name", "description"]).unwrap_or_default();
    if let Some(url) = text_of(dist, &["contentUrl"]) {
        let function = if url.ends_with('/') { "fileAccess" } else { "download" };
        return Some(OnlineResource::new(url, name, function));
    }
    text_of(dist, &["url"]).map(|url| OnlineResource::new(url, name, "information"))
}

fn relationships(data: &Map<String, Value>) -> Vec<MetadataRelationship> {
    let mut out = Vec::new();
    for property in RELATION_PROPERTIES {
        let targets: Vec<&Value> = match data.get(*property) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(other) => vec![other],
            None => continue,
        };
        for target in targets {
            let target = match target {
                Value::Object(map) => text_of(map, &["@id", "url"]),
                other => text(other),
            };
            if let Some(rel) = target.and_then(|t| MetadataRelationship::new(*property, t).ok()) {
                out.push(rel);
            }
        }
    }
    out
}
