//! Format extractors: one per source format, all producing the canonical
//! [`Metadata`] record.
//!
//! Every extractor follows the same contract:
//!
//! - structural failures (unreadable file, bad JSON, malformed XML) are always
//!   errors
//! - a missing mandatory field is a placeholder in lenient mode and a
//!   validation error in strict mode; placeholders are reported as
//!   [`FieldGap`]s next to the record
//! - an optional field that is present but invalid (inverted box, end before
//!   start) is dropped with a gap note in lenient mode and rejected in strict
//!   mode
//! - resource discovery never fails; problems are logged and an empty or
//!   partial list is returned

pub mod json;
pub mod jsonld;
pub mod turtle;
pub mod xml;
mod xml_tree;

pub use json::JsonExtractor;
pub use jsonld::JsonLdExtractor;
pub use turtle::TurtleExtractor;
pub use xml::XmlExtractor;

use crate::classify::CatalogueProfile;
use crate::error::{ExtractionError, ValidationError};
use crate::models::{validate_temporal_extent, BoundingBox, Metadata, MetadataBuilder, Resource};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Every extension some registered-by-default extractor claims.
pub const KNOWN_EXTENSIONS: &[&str] = &["json", "xml", "jsonld", "ttl", "turtle"];

/// Bytes read from the head of a file when sniffing its format.
const SNIFF_BYTES: u64 = 4096;

/// Per-instance extractor settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Fail on missing mandatory fields or invalid optional ones instead of
    /// substituting placeholders.
    pub strict_mode: bool,
    /// URL conventions used when classifying distribution links.
    pub profile: CatalogueProfile,
}

impl ExtractorConfig {
    pub fn strict() -> Self {
        Self {
            strict_mode: true,
            ..Self::default()
        }
    }

    pub fn lenient() -> Self {
        Self::default()
    }
}

/// A field that did not make it into the record as written in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FieldGap {
    /// Mandatory field was missing and replaced with `"[Missing <field>]"`.
    Placeholder { field: &'static str },
    /// Optional field was present but unusable and left out.
    Dropped { field: &'static str, reason: String },
}

impl FieldGap {
    pub fn field(&self) -> &'static str {
        match self {
            FieldGap::Placeholder { field } | FieldGap::Dropped { field, .. } => field,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, FieldGap::Placeholder { .. })
    }
}

impl fmt::Display for FieldGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldGap::Placeholder { field } => write!(f, "{field}: placeholder used"),
            FieldGap::Dropped { field, reason } => write!(f, "{field}: dropped ({reason})"),
        }
    }
}

/// A successfully extracted record plus whatever was patched over to get it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub metadata: Metadata,
    pub gaps: Vec<FieldGap>,
}

impl Extraction {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.gaps
            .iter()
            .filter(|gap| gap.is_placeholder())
            .map(FieldGap::field)
    }

    pub fn into_metadata(self) -> Metadata {
        self.metadata
    }
}

/// One extraction strategy per source format.
pub trait MetadataExtractor: Send + Sync {
    /// Short format token, e.g. `json` or `rdf`.
    fn format_name(&self) -> &'static str;

    /// File extensions (lowercase, no dot) handled by this extractor.
    fn extensions(&self) -> &'static [&'static str];

    /// Content check used when the extension says nothing.
    fn sniff(&self, _head: &str) -> bool {
        false
    }

    /// Extension match, or a content sniff when the file has no recognised
    /// extension. Reads at most a few kilobytes.
    fn can_extract(&self, path: &Path) -> bool {
        match extension_of(path) {
            Some(ext) if self.extensions().contains(&ext.as_str()) => true,
            Some(ext) if KNOWN_EXTENSIONS.contains(&ext.as_str()) => false,
            _ => read_head(path).is_some_and(|head| self.sniff(&head)),
        }
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractionError>;

    /// Downloadable resources referenced by the record. Never fails.
    fn extract_resources(&self, _path: &Path) -> Vec<Resource> {
        Vec::new()
    }
}

/// Lowercased extension without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn read_head(path: &Path) -> Option<String> {
    let file = fs::File::open(path).ok()?;
    let mut buf = Vec::with_capacity(SNIFF_BYTES as usize);
    file.take(SNIFF_BYTES).read_to_end(&mut buf).ok()?;
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Reads a whole source file, mapping a missing file to `NotFound`.
pub(crate) fn read_source(path: &Path) -> Result<String, ExtractionError> {
    if !path.exists() {
        return Err(ExtractionError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(path)
        .map_err(|e| ExtractionError::extraction(path, format!("failed to read file: {e}")))?;
    debug!(path = %path.display(), bytes = content.len(), "read metadata source");
    Ok(content.trim_start_matches('\u{feff}').to_string())
}

pub(crate) fn invalid(path: &Path) -> impl Fn(ValidationError) -> ExtractionError + '_ {
    move |source| ExtractionError::Validation {
        path: path.to_path_buf(),
        source,
    }
}

pub fn placeholder(field: &str) -> String {
    format!("[Missing {field}]")
}

/// Applies the strict/lenient rules while a record is assembled.
pub(crate) struct FieldPolicy {
    strict: bool,
    gaps: Vec<FieldGap>,
}

impl FieldPolicy {
    pub(crate) fn new(strict: bool) -> Self {
        Self {
            strict,
            gaps: Vec::new(),
        }
    }

    /// A mandatory text field: the trimmed value, or a placeholder in lenient mode.
    pub(crate) fn mandatory(
        &mut self,
        field: &'static str,
        value: Option<String>,
    ) -> Result<String, ValidationError> {
        match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            Some(v) => Ok(v),
            None if self.strict => Err(ValidationError::EmptyField { field }),
            None => {
                debug!(field, "mandatory field missing, using placeholder");
                self.gaps.push(FieldGap::Placeholder { field });
                Ok(placeholder(field))
            }
        }
    }

    /// An optional value that may have failed validation.
    pub(crate) fn optional<T>(
        &mut self,
        field: &'static str,
        value: Result<Option<T>, ValidationError>,
    ) -> Result<Option<T>, ValidationError> {
        match value {
            Ok(v) => Ok(v),
            Err(e) if self.strict => Err(e),
            Err(e) => {
                warn!(field, error = %e, "dropping invalid field");
                self.gaps.push(FieldGap::Dropped {
                    field,
                    reason: e.to_string(),
                });
                Ok(None)
            }
        }
    }

    /// Records a field dropped regardless of mode.
    pub(crate) fn dropped(&mut self, field: &'static str, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(field, reason = %reason, "dropping incomplete field");
        self.gaps.push(FieldGap::Dropped { field, reason });
    }

    /// West, east, south, north as found in the source. A box missing any
    /// coordinate is dropped in every mode.
    pub(crate) fn bounding_box(
        &mut self,
        coordinates: [Option<f64>; 4],
    ) -> Result<Option<BoundingBox>, ValidationError> {
        match coordinates {
            [Some(west), Some(east), Some(south), Some(north)] => self.optional(
                "bounding box",
                BoundingBox::new(west, east, south, north).map(Some),
            ),
            _ => {
                let found = coordinates.iter().flatten().count();
                if found > 0 {
                    self.dropped("bounding box", format!("only {found} of 4 coordinates present"));
                }
                Ok(None)
            }
        }
    }

    /// Like `bounding_box`, but a partial box is invalid: an error in strict
    /// mode, a dropped field otherwise.
    pub(crate) fn complete_bounding_box(
        &mut self,
        coordinates: [Option<f64>; 4],
    ) -> Result<Option<BoundingBox>, ValidationError> {
        match coordinates.iter().flatten().count() {
            0 | 4 => self.bounding_box(coordinates),
            found => self.optional(
                "bounding box",
                Err(ValidationError::Incomplete {
                    field: "bounding box",
                    found,
                }),
            ),
        }
    }

    /// Start/end pair, dropped as a whole in lenient mode when inverted.
    pub(crate) fn temporal(
        &mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), ValidationError> {
        let checked = validate_temporal_extent(start, end).map(|()| Some((start, end)));
        Ok(self
            .optional("temporal extent", checked)?
            .unwrap_or((None, None)))
    }

    pub(crate) fn finish(
        self,
        builder: MetadataBuilder,
        path: &Path,
    ) -> Result<Extraction, ExtractionError> {
        let metadata = builder.build().map_err(invalid(path))?;
        Ok(Extraction {
            metadata,
            gaps: self.gaps,
        })
    }
}

/// Parses the date shapes seen in catalogue records: RFC 3339, ISO date-time
/// with or without fraction and offset, `YYYY-MM-DD`, `YYYY-MM` and `YYYY`.
/// Naive values are taken as UTC.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(value, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive = value.trim_end_matches('Z');
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    let date = match naive.len() {
        10 => NaiveDate::parse_from_str(naive, "%Y-%m-%d").ok(),
        7 => NaiveDate::parse_from_str(&format!("{naive}-01"), "%Y-%m-%d").ok(),
        4 if naive.bytes().all(|b| b.is_ascii_digit()) => {
            NaiveDate::parse_from_str(&format!("{naive}-01-01"), "%Y-%m-%d").ok()
        }
        _ => None,
    }?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}
