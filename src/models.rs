//! Canonical metadata record and the value objects it aggregates.
//!
//! Every type here validates itself on construction; there is no way to hold
//! a `BoundingBox` with `west > east` or a `Metadata` with a blank title.

use crate::config::DEFAULT_LANGUAGE;
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use url::Url;
use uuid::Uuid;

/// Geographic extent in decimal degrees (WGS 84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    west: f64,
    east: f64,
    south: f64,
    north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, east: f64, south: f64, north: f64) -> Result<Self, ValidationError> {
        for (field, value) in [
            ("west longitude", west),
            ("east longitude", east),
            ("south latitude", south),
            ("north latitude", north),
        ] {
            if !value.is_finite() {
                return Err(ValidationError::NotFinite { field });
            }
        }

        check_range("west longitude", west, -180.0, 180.0)?;
        check_range("east longitude", east, -180.0, 180.0)?;
        check_range("south latitude", south, -90.0, 90.0)?;
        check_range("north latitude", north, -90.0, 90.0)?;

        if west > east {
            return Err(ValidationError::Inverted {
                low_field: "west longitude",
                low: west,
                high_field: "east longitude",
                high: east,
            });
        }
        if south > north {
            return Err(ValidationError::Inverted {
                low_field: "south latitude",
                low: south,
                high_field: "north latitude",
                high: north,
            });
        }

        Ok(Self {
            west,
            east,
            south,
            north,
        })
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    pub fn east(&self) -> f64 {
        self.east
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    /// Centre point as `(longitude, latitude)`.
    pub fn center(&self) -> (f64, f64) {
        ((self.west + self.east) / 2.0, (self.south + self.north) / 2.0)
    }

    /// Rough area in square degrees.
    pub fn area(&self) -> f64 {
        (self.east - self.west) * (self.north - self.south)
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Start must not come after end when both are known.
pub fn validate_temporal_extent(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), ValidationError> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(ValidationError::TemporalOrder {
                start: s.to_rfc3339(),
                end: e.to_rfc3339(),
            });
        }
    }
    Ok(())
}

/// How the dataset payload is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum AccessType {
    /// A single archive to download.
    #[default]
    #[serde(rename = "download")]
    Download,
    /// A browsable web folder of individual files.
    #[serde(rename = "fileAccess")]
    FileAccess,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Download => "download",
            AccessType::FileAccess => "fileAccess",
        }
    }

    /// Maps an ISO `CI_OnLineFunctionCode` (case-insensitive) to an access type.
    pub fn from_function_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "download" => Some(AccessType::Download),
            "fileaccess" => Some(AccessType::FileAccess),
            _ => None,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed link from one metadata record to another resource.
///
/// `target_id` and `target_url` are derived from `target` on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRelationship {
    relation: String,
    target: String,
}

impl MetadataRelationship {
    pub fn new(
        relation: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let relation = relation.into().trim().to_string();
        let target = target.into().trim().to_string();
        if relation.is_empty() {
            return Err(ValidationError::EmptyField { field: "relation" });
        }
        if target.is_empty() {
            return Err(ValidationError::EmptyField { field: "target" });
        }
        Ok(Self { relation, target })
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// The target as a UUID, either bare or as the last path segment of a URL.
    pub fn target_id(&self) -> Option<Uuid> {
        if let Ok(id) = Uuid::parse_str(&self.target) {
            return Some(id);
        }
        let url = Url::parse(&self.target).ok()?;
        let last = url
            .path_segments()?
            .filter(|segment| !segment.is_empty())
            .last()?;
        Uuid::parse_str(last).ok()
    }

    /// The target when it is an absolute http(s) URL.
    pub fn target_url(&self) -> Option<&str> {
        match Url::parse(&self.target) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(&self.target),
            _ => None,
        }
    }
}

impl Serialize for MetadataRelationship {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MetadataRelationship", 4)?;
        state.serialize_field("relation", &self.relation)?;
        state.serialize_field("target", &self.target)?;
        state.serialize_field("targetId", &self.target_id().map(|id| id.to_string()))?;
        state.serialize_field("targetUrl", &self.target_url())?;
        state.end()
    }
}

/// The normalized, validated description of one dataset.
///
/// Built through [`MetadataBuilder`]; fields are read-only afterwards. To change
/// a record, call [`Metadata::into_builder`] and build a new one, which re-checks
/// every invariant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    title: String,
    #[serde(rename = "abstract")]
    abstract_text: String,
    keywords: Vec<String>,
    bounding_box: Option<BoundingBox>,
    temporal_extent_start: Option<DateTime<Utc>>,
    temporal_extent_end: Option<DateTime<Utc>>,
    contact_organization: Option<String>,
    contact_email: Option<String>,
    metadata_date: DateTime<Utc>,
    dataset_language: String,
    topic_category: Option<String>,
    download_url: Option<String>,
    landing_page_url: Option<String>,
    access_type: AccessType,
    relationships: Vec<MetadataRelationship>,
}

impl Metadata {
    pub fn builder(title: impl Into<String>, abstract_text: impl Into<String>) -> MetadataBuilder {
        MetadataBuilder::new(title, abstract_text)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn abstract_text(&self) -> &str {
        &self.abstract_text
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn bounding_box(&self) -> Option<&BoundingBox> {
        self.bounding_box.as_ref()
    }

    pub fn temporal_extent_start(&self) -> Option<DateTime<Utc>> {
        self.temporal_extent_start
    }

    pub fn temporal_extent_end(&self) -> Option<DateTime<Utc>> {
        self.temporal_extent_end
    }

    pub fn contact_organization(&self) -> Option<&str> {
        self.contact_organization.as_deref()
    }

    pub fn contact_email(&self) -> Option<&str> {
        self.contact_email.as_deref()
    }

    pub fn metadata_date(&self) -> DateTime<Utc> {
        self.metadata_date
    }

    pub fn dataset_language(&self) -> &str {
        &self.dataset_language
    }

    pub fn topic_category(&self) -> Option<&str> {
        self.topic_category.as_deref()
    }

    pub fn download_url(&self) -> Option<&str> {
        self.download_url.as_deref()
    }

    pub fn landing_page_url(&self) -> Option<&str> {
        self.landing_page_url.as_deref()
    }

    pub fn access_type(&self) -> AccessType {
        self.access_type
    }

    pub fn relationships(&self) -> &[MetadataRelationship] {
        &self.relationships
    }

    pub fn is_geospatial(&self) -> bool {
        self.bounding_box.is_some()
    }

    pub fn has_temporal_extent(&self) -> bool {
        self.temporal_extent_start.is_some() && self.temporal_extent_end.is_some()
    }

    /// Reopens the record for modification. `build()` re-validates.
    pub fn into_builder(self) -> MetadataBuilder {
        MetadataBuilder {
            title: self.title,
            abstract_text: self.abstract_text,
            keywords: self.keywords,
            bounding_box: self.bounding_box,
            temporal_extent_start: self.temporal_extent_start,
            temporal_extent_end: self.temporal_extent_end,
            contact_organization: self.contact_organization,
            contact_email: self.contact_email,
            metadata_date: Some(self.metadata_date),
            dataset_language: Some(self.dataset_language),
            topic_category: self.topic_category,
            download_url: self.download_url,
            landing_page_url: self.landing_page_url,
            access_type: self.access_type,
            relationships: self.relationships,
        }
    }

    /// Multi-line human-readable summary of the key fields.
    pub fn summary(&self) -> String {
        let abstract_line = if self.abstract_text.chars().count() > 100 {
            let head: String = self.abstract_text.chars().take(100).collect();
            format!("Abstract: {}...", head)
        } else {
            format!("Abstract: {}", self.abstract_text)
        };
        let keywords = if self.keywords.is_empty() {
            "None".to_string()
        } else {
            self.keywords.join(", ")
        };

        let mut lines = vec![
            format!("Title: {}", self.title),
            abstract_line,
            format!("Keywords: {}", keywords),
            format!(
                "Geospatial: {}",
                if self.is_geospatial() { "Yes" } else { "No" }
            ),
        ];

        if let Some(bbox) = &self.bounding_box {
            let (lon, lat) = bbox.center();
            lines.push(format!("Center: {:.2}°N, {:.2}°E", lat, lon));
        }

        if let (Some(start), Some(end)) = (self.temporal_extent_start, self.temporal_extent_end) {
            lines.push(format!(
                "Temporal: {} - {}",
                start.format("%Y"),
                end.format("%Y")
            ));
        }

        lines.join("\n")
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Metadata: {}", self.title)
    }
}

/// Accumulates fields for a [`Metadata`] record; `build()` enforces invariants.
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    title: String,
    abstract_text: String,
    keywords: Vec<String>,
    bounding_box: Option<BoundingBox>,
    temporal_extent_start: Option<DateTime<Utc>>,
    temporal_extent_end: Option<DateTime<Utc>>,
    contact_organization: Option<String>,
    contact_email: Option<String>,
    metadata_date: Option<DateTime<Utc>>,
    dataset_language: Option<String>,
    topic_category: Option<String>,
    download_url: Option<String>,
    landing_page_url: Option<String>,
    access_type: AccessType,
    relationships: Vec<MetadataRelationship>,
}

impl MetadataBuilder {
    pub fn new(title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            abstract_text: abstract_text.into(),
            keywords: Vec::new(),
            bounding_box: None,
            temporal_extent_start: None,
            temporal_extent_end: None,
            contact_organization: None,
            contact_email: None,
            metadata_date: None,
            dataset_language: None,
            topic_category: None,
            download_url: None,
            landing_page_url: None,
            access_type: AccessType::Download,
            relationships: Vec::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn abstract_text(mut self, abstract_text: impl Into<String>) -> Self {
        self.abstract_text = abstract_text.into();
        self
    }

    /// Appends a keyword unless it is blank or already present.
    pub fn keyword(mut self, keyword: impl AsRef<str>) -> Self {
        push_keyword(&mut self.keywords, keyword.as_ref());
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for keyword in keywords {
            push_keyword(&mut self.keywords, keyword.as_ref());
        }
        self
    }

    pub fn bounding_box(mut self, bbox: Option<BoundingBox>) -> Self {
        self.bounding_box = bbox;
        self
    }

    pub fn temporal_extent(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.temporal_extent_start = start;
        self.temporal_extent_end = end;
        self
    }

    pub fn contact_organization(mut self, organization: impl Into<Option<String>>) -> Self {
        self.contact_organization = non_blank(organization.into());
        self
    }

    pub fn contact_email(mut self, email: impl Into<Option<String>>) -> Self {
        self.contact_email = non_blank(email.into());
        self
    }

    /// Defaults to the build time when never set.
    pub fn metadata_date(mut self, date: Option<DateTime<Utc>>) -> Self {
        self.metadata_date = date;
        self
    }

    pub fn dataset_language(mut self, language: impl Into<Option<String>>) -> Self {
        self.dataset_language = non_blank(language.into());
        self
    }

    pub fn topic_category(mut self, topic: impl Into<Option<String>>) -> Self {
        self.topic_category = non_blank(topic.into());
        self
    }

    pub fn download_url(mut self, url: impl Into<Option<String>>) -> Self {
        self.download_url = non_blank(url.into());
        self
    }

    pub fn landing_page_url(mut self, url: impl Into<Option<String>>) -> Self {
        self.landing_page_url = non_blank(url.into());
        self
    }

    pub fn access_type(mut self, access_type: AccessType) -> Self {
        self.access_type = access_type;
        self
    }

    pub fn relationship(mut self, relationship: MetadataRelationship) -> Self {
        if !self.relationships.contains(&relationship) {
            self.relationships.push(relationship);
        }
        self
    }

    pub fn relationships<I>(mut self, relationships: I) -> Self
    where
        I: IntoIterator<Item = MetadataRelationship>,
    {
        for relationship in relationships {
            self = self.relationship(relationship);
        }
        self
    }

    pub fn build(self) -> Result<Metadata, ValidationError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(ValidationError::EmptyField { field: "title" });
        }
        let abstract_text = self.abstract_text.trim().to_string();
        if abstract_text.is_empty() {
            return Err(ValidationError::EmptyField { field: "abstract" });
        }
        validate_temporal_extent(self.temporal_extent_start, self.temporal_extent_end)?;

        Ok(Metadata {
            title,
            abstract_text,
            keywords: self.keywords,
            bounding_box: self.bounding_box,
            temporal_extent_start: self.temporal_extent_start,
            temporal_extent_end: self.temporal_extent_end,
            contact_organization: self.contact_organization,
            contact_email: self.contact_email,
            metadata_date: self.metadata_date.unwrap_or_else(Utc::now),
            dataset_language: self
                .dataset_language
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            topic_category: self.topic_category,
            download_url: self.download_url,
            landing_page_url: self.landing_page_url,
            access_type: self.access_type,
            relationships: self.relationships,
        })
    }
}

fn push_keyword(keywords: &mut Vec<String>, keyword: &str) {
    let keyword = keyword.trim();
    if !keyword.is_empty() && !keywords.iter().any(|k| k == keyword) {
        keywords.push(keyword.to_string());
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Serialized with the same token `as_str` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    #[serde(rename = "file")]
    RemoteFile,
    #[serde(rename = "folder")]
    WebFolder,
    #[serde(rename = "api")]
    ApiEndpoint,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::RemoteFile => "file",
            ResourceKind::WebFolder => "folder",
            ResourceKind::ApiEndpoint => "api",
        }
    }
}

/// Something a metadata record points at that a downstream crawler may fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_id: String,
    #[serde(rename = "resourceType")]
    pub kind: ResourceKind,
    pub url: Option<String>,
    pub file_path: Option<PathBuf>,
    pub format: Option<String>,
    pub size_bytes: Option<u64>,
    pub checksum: Option<String>,
    pub description: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl Resource {
    fn remote(kind: ResourceKind, url: &str, description: &str) -> Self {
        let description = description.trim();
        Self {
            resource_id: url.to_string(),
            kind,
            url: Some(url.to_string()),
            file_path: None,
            format: None,
            size_bytes: None,
            checksum: None,
            description: (!description.is_empty()).then(|| description.to_string()),
            discovered_at: Utc::now(),
        }
    }

    /// A downloadable file; `format` comes from the URL path extension.
    pub fn remote_file(url: &str, description: &str) -> Self {
        let mut resource = Self::remote(ResourceKind::RemoteFile, url, description);
        resource.format = url_extension(url);
        resource
    }

    pub fn web_folder(url: &str, description: &str) -> Self {
        Self::remote(ResourceKind::WebFolder, url, description)
    }

    pub fn api_endpoint(url: &str, description: &str) -> Self {
        Self::remote(ResourceKind::ApiEndpoint, url, description)
    }

    pub fn is_remote(&self) -> bool {
        self.url.is_some()
    }

    pub fn is_local(&self) -> bool {
        self.file_path.is_some()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource: {} ({})", self.resource_id, self.kind.as_str())
    }
}

fn url_extension(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    let last = path.rsplit('/').next()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
