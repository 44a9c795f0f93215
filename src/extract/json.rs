//! Plain JSON extractor for catalogue exports and hand-written records.
//!
//! Field names vary between producers, so most fields accept several aliases
//! (`bounding_box` / `boundingBoxes`, `west` / `west_longitude` /
//! `westBoundLongitude`, ...). The first alias with a usable value wins.

use super::{
    invalid, parse_datetime, read_source, Extraction, ExtractorConfig, FieldPolicy,
    MetadataExtractor,
};
use crate::classify::{classify, OnlineResource};
use crate::error::ExtractionError;
use crate::models::{Metadata, MetadataRelationship, Resource};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, warn};

const KEYWORD_LISTS: &[&str] = &["keywords", "keywordsTheme", "keywordsPlace", "keywordsOther"];

const WEST: &[&str] = &["west", "west_longitude", "westBoundLongitude"];
const EAST: &[&str] = &["east", "east_longitude", "eastBoundLongitude"];
const SOUTH: &[&str] = &["south", "south_latitude", "southBoundLatitude"];
const NORTH: &[&str] = &["north", "north_latitude", "northBoundLatitude"];

#[derive(Debug, Clone, Default)]
pub struct JsonExtractor {
    config: ExtractorConfig,
}

impl JsonExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    fn parse(&self, path: &Path) -> Result<Map<String, Value>, ExtractionError> {
        let content = read_source(path)?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| ExtractionError::extraction(path, format!("invalid JSON: {e}")))?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(ExtractionError::extraction(
                path,
                "expected a JSON object at the top level",
            )),
        }
    }

    fn to_metadata(
        &self,
        data: &Map<String, Value>,
        path: &Path,
    ) -> Result<Extraction, ExtractionError> {
        let mut policy = FieldPolicy::new(self.config.strict_mode);
        let invalid = invalid(path);

        let title = policy
            .mandatory("title", text_of(data, &["title"]))
            .map_err(&invalid)?;
        let abstract_text = policy
            .mandatory("abstract", text_of(data, &["abstract", "description"]))
            .map_err(&invalid)?;

        let bbox = policy
            .complete_bounding_box(bbox_coordinates(data))
            .map_err(&invalid)?;

        let (start, end) = temporal_extent(data);
        let (start, end) = policy.temporal(start, end).map_err(&invalid)?;

        let (organization, email) = contact(data);

        let resources = online_resources(data);
        let landing = text_of(data, &["uri", "landingPageUrl", "landing_page_url"]);
        let distribution = classify(&resources, landing.as_deref(), &self.config.profile, None);

        let builder = Metadata::builder(title, abstract_text)
            .keywords(keywords(data))
            .bounding_box(bbox)
            .temporal_extent(start, end)
            .contact_organization(organization)
            .contact_email(email)
            .metadata_date(
                text_of(data, &["metadata_date", "metadataDate"])
                    .as_deref()
                    .and_then(parse_datetime),
            )
            .dataset_language(text_of(data, &["language", "datasetLanguage"]))
            .topic_category(topic_category(data))
            .download_url(distribution.download_url)
            .landing_page_url(distribution.landing_page_url)
            .access_type(distribution.access_type)
            .relationships(relationships(data));

        policy.finish(builder, path)
    }
}

impl MetadataExtractor for JsonExtractor {
    fn format_name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn sniff(&self, head: &str) -> bool {
        head.trim_start().starts_with('{') && !head.contains("\"@context\"")
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractionError> {
        let data = self.parse(path)?;
        let extraction = self.to_metadata(&data, path)?;
        debug!(
            path = %path.display(),
            gaps = extraction.gaps.len(),
            "extracted JSON metadata"
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

        let mut found: Vec<Resource> = Vec::new();
        for resource in online_resources(&data)
            .iter()
            .filter_map(|r| r.to_resource(&self.config.profile))
        {
            if !found.iter().any(|f| f.url == resource.url) {
                found.push(resource);
            }
        }
        found
    }
}

/// String value, or a number rendered as text. Blank strings count as absent.
pub(super) fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First alias holding a usable text value.
pub(super) fn text_of(data: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| data.get(*key).and_then(text))
}

/// A number, or a string holding one.
pub(super) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// An object, or the first object of an array.
fn first_object<'a>(data: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Map<String, Value>> {
    keys.iter().find_map(|key| match data.get(*key)? {
        Value::Object(map) => Some(map),
        Value::Array(items) => items.iter().find_map(Value::as_object),
        _ => None,
    })
}

fn bbox_coordinates(data: &Map<String, Value>) -> [Option<f64>; 4] {
    let Some(bbox) = first_object(data, &["bounding_box", "boundingBox", "boundingBoxes"]) else {
        return [None; 4];
    };
    [WEST, EAST, SOUTH, NORTH]
        .map(|aliases| aliases.iter().find_map(|key| bbox.get(*key).and_then(number)))
}

fn temporal_extent(data: &Map<String, Value>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let Some(extent) = first_object(data, &["temporal_extent", "temporalExtent", "temporalExtents"])
    else {
        return (None, None);
    };
    let start = text_of(extent, &["start", "begin"]);
    let end = text_of(extent, &["end"]);
    (
        start.as_deref().and_then(parse_datetime),
        end.as_deref().and_then(parse_datetime),
    )
}

fn contact(data: &Map<String, Value>) -> (Option<String>, Option<String>) {
    if let Some(contact) = first_object(data, &["contact"]) {
        return (
            text_of(contact, &["organization", "organisation", "organisationName"]),
            text_of(contact, &["email"]),
        );
    }
    match first_object(data, &["responsibleParties"]) {
        Some(party) => (
            text_of(party, &["organisationName", "organizationName"]),
            text_of(party, &["email"]),
        ),
        None => (None, None),
    }
}

fn topic_category(data: &Map<String, Value>) -> Option<String> {
    text_of(data, &["topic_category", "topicCategory"]).or_else(|| {
        data.get("topicCategories")?
            .as_array()?
            .iter()
            .find_map(|item| match item {
                Value::Object(map) => text_of(map, &["value", "label"]),
                other => text(other),
            })
    })
}

/// Generic and themed keyword lists, in that order. Items are bare strings or
/// objects carrying `value` or `label`; a comma-separated string also works.
fn keywords(data: &Map<String, Value>) -> Vec<String> {
    let mut out = Vec::new();
    for key in KEYWORD_LISTS {
        match data.get(*key) {
            Some(Value::Array(items)) => out.extend(items.iter().filter_map(|item| match item {
                Value::Object(map) => text_of(map, &["value", "label"]),
                other => text(other),
            })),
            Some(Value::String(s)) => {
                out.extend(s.split(',').map(str::trim).filter(|k| !k.is_empty()).map(str::to_string))
            }
            _ => {}
        }
    }
    out
}

fn online_resources(data: &Map<String, Value>) -> Vec<OnlineResource> {
    let mut resources: Vec<OnlineResource> = data
        .get("onlineResources")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|item| {
                    let url = text_of(item, &["url", "href"])?;
                    Some(
                        OnlineResource::new(
                            url,
                            text_of(item, &["name", "title"]).unwrap_or_default(),
                            text_of(item, &["function"]).unwrap_or_default(),
                        )
                        .with_protocol(text_of(item, &["protocol"]).unwrap_or_default()),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    // A bare download link stands in for a distribution block.
    if resources.is_empty() {
        if let Some(url) = text_of(data, &["downloadUrl", "download_url"]) {
            resources.push(OnlineResource::new(url, "", "download"));
        }
    }
    resources
}

fn relationships(data: &Map<String, Value>) -> Vec<MetadataRelationship> {
    let Some(items) = data.get("relationships").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|item| {
            let relation = text_of(item, &["relation"])?;
            let target = text_of(item, &["target"])?;
            MetadataRelationship::new(relation, target).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::extract::FieldGap;
    use crate::models::{AccessType, ResourceKind};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn missing_abstract_uses_placeholder() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "x.json", r#"{"title": "X"}"#);

        let extraction = JsonExtractor::default().extract(&path).unwrap();
        assert_eq!(extraction.metadata.title(), "X");
        assert_eq!(extraction.metadata.abstract_text(), "[Missing abstract]");
        assert_eq!(extraction.placeholders().collect::<Vec<_>>(), ["abstract"]);
    }

    #[test]
    fn missing_abstract_fails_in_strict_mode() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "x.json", r#"{"title": "X"}"#);

        let err = JsonExtractor::new(ExtractorConfig::strict())
            .extract(&path)
            .unwrap_err();
        match err {
            ExtractionError::Validation { source, .. } => {
                assert_eq!(source, ValidationError::EmptyField { field: "abstract" })
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn themed_keywords_are_merged_without_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "k.json",
            r#"{"title": "T", "abstract": "A",
                "keywords": ["A", "B"],
                "keywordsTheme": [{"value": "A"}, {"label": "C"}],
                "keywordsPlace": ["B", "D"]}"#,
        );

        let m = JsonExtractor::default().extract(&path).unwrap().metadata;
        assert_eq!(m.keywords(), ["A", "B", "C", "D"]);
    }

    #[test]
    fn catalogue_aliases() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "ceh.json",
            r#"{
                "title": "Land cover",
                "description": "Land cover map",
                "uri": "https://catalogue.ceh.ac.uk/id/abc",
                "boundingBoxes": [{"westBoundLongitude": "-9.0", "eastBoundLongitude": 2.1,
                                   "southBoundLatitude": 49.8, "northBoundLatitude": 61.0}],
                "temporalExtents": [{"begin": "2017-01-01", "end": "2017-12-31"}],
                "responsibleParties": [{"organisationName": "UKCEH", "email": "info@ceh.ac.uk"}],
                "metadataDate": "2020-02-02T00:00:00Z",
                "datasetLanguage": "eng",
                "topicCategories": [{"value": "imageryBaseMapsEarthCover"}],
                "onlineResources": [
                    {"url": "https://catalogue.ceh.ac.uk/datastore/eidchub/abc", "name": "Browse", "function": "fileAccess"}
                ],
                "relationships": [{"relation": "https://vocabs.ceh.ac.uk/eidc#supersedes", "target": "https://catalogue.ceh.ac.uk/id/0b1c2d3e-4f50-4a6b-8c7d-9e0f1a2b3c4d"}]
            }"#,
        );

        let extraction = JsonExtractor::default().extract(&path).unwrap();
        assert!(extraction.is_complete());
        let m = extraction.metadata;
        assert_eq!(m.abstract_text(), "Land cover map");
        assert_eq!(m.bounding_box().unwrap().west(), -9.0);
        assert!(m.has_temporal_extent());
        assert_eq!(m.contact_organization(), Some("UKCEH"));
        assert_eq!(m.contact_email(), Some("info@ceh.ac.uk"));
        assert_eq!(m.topic_category(), Some("imageryBaseMapsEarthCover"));
        assert_eq!(m.access_type(), AccessType::FileAccess);
        assert_eq!(
            m.download_url(),
            Some("https://catalogue.ceh.ac.uk/datastore/eidchub/abc")
        );
        assert_eq!(m.landing_page_url(), Some("https://catalogue.ceh.ac.uk/id/abc"));
        assert_eq!(m.relationships().len(), 1);
    }

    #[test]
    fn short_bbox_names_and_inverted_extent() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "b.json",
            r#"{"title": "T", "abstract": "A",
                "bounding_box": {"west": 10, "east": 5, "south": 0, "north": 1},
                "temporal_extent": {"start": "2020-01-01", "end": "2021-01-01"}}"#,
        );

        let lenient = JsonExtractor::default().extract(&path).unwrap();
        assert!(lenient.metadata.bounding_box().is_none());
        assert!(lenient.metadata.has_temporal_extent());
        assert_eq!(lenient.gaps.len(), 1);

        assert!(JsonExtractor::new(ExtractorConfig::strict())
            .extract(&path)
            .is_err());
    }

    #[test]
    fn partial_bbox_is_dropped_or_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "p.json",
            r#"{"title": "T", "abstract": "A",
                "bounding_box": {"west": -4, "east": 1, "south": 50}}"#,
        );

        let lenient = JsonExtractor::default().extract(&path).unwrap();
        assert!(lenient.metadata.bounding_box().is_none());
        assert!(matches!(
            lenient.gaps.as_slice(),
            [FieldGap::Dropped { field: "bounding box", .. }]
        ));

        match JsonExtractor::new(ExtractorConfig::strict())
            .extract(&path)
            .unwrap_err()
        {
            ExtractionError::Validation { source, .. } => assert_eq!(
                source,
                ValidationError::Incomplete {
                    field: "bounding box",
                    found: 3
                }
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn syntax_errors_always_fail() {
        let dir = TempDir::new().unwrap();
        let bad = write(&dir, "bad.json", r#"{"title": "#);
        let array = write(&dir, "array.json", r#"[1, 2]"#);

        for path in [bad, array] {
            let err = JsonExtractor::default().extract(&path).unwrap_err();
            assert!(matches!(err, ExtractionError::Extraction { .. }));
        }
    }

    #[test]
    fn resources_from_online_resources() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "r.json",
            r#"{"title": "Test Dataset", "abstract": "Abstract",
                "onlineResources": [
                    {"url": "https://data-package.ceh.ac.uk/data/123.zip", "name": "Data Download", "function": "download"},
                    {"url": "https://catalogue.ceh.ac.uk/datastore/eidchub/123", "name": "Supporting Docs", "function": "information"}
                ]}"#,
        );

        let resources = JsonExtractor::default().extract_resources(&path);
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].kind, ResourceKind::RemoteFile);
        assert_eq!(resources[0].url.as_deref(), Some("https://data-package.ceh.ac.uk/data/123.zip"));
        assert_eq!(resources[1].kind, ResourceKind::WebFolder);
    }

    #[test]
    fn legacy_download_url_becomes_resource() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "legacy.json",
            r#"{"title": "Legacy Dataset", "abstract": "Abstract", "downloadUrl": "https://example.com/legacy.zip"}"#,
        );

        let resources = JsonExtractor::default().extract_resources(&path);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].kind, ResourceKind::RemoteFile);

        let m = JsonExtractor::default().extract(&path).unwrap().metadata;
        assert_eq!(m.download_url(), Some("https://example.com/legacy.zip"));
        assert!(m.landing_page_url().is_none());
    }
}
