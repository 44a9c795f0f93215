//! DCAT / Dublin Core Turtle extractor.
//!
//! This is a flat property scanner, not an RDF parser. It collects `@prefix`
//! declarations, then finds every `predicate object[, object...]` pair in the
//! file and files the objects under the predicate's canonical `prefix:local`
//! name. Subjects, blank-node nesting and graph structure are ignored, which
//! is enough for single-dataset DCAT and Dublin Core documents.

use super::{
    invalid, parse_datetime, read_source, Extraction, ExtractorConfig, FieldPolicy,
    MetadataExtractor,
};
use crate::error::ExtractionError;
use crate::models::{Metadata, MetadataRelationship, Resource};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::{debug, warn};

static PREFIX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:@prefix|\bPREFIX)\s+(\w*):\s*<([^>]+)>\s*\.?").unwrap());

static PREDICATE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:<([^>\s]+)>|\b([A-Za-z_][\w-]*):([A-Za-z_][\w-]*))\s+").unwrap());

static VALUE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"\A(?:"""(?s:(.*?))"""|"((?:[^"\\\n]|\\.)*)"|'((?:[^'\\\n]|\\.)*)'"#,
        r#"|<([^>\s]*)>|([A-Za-z_][\w-]*:[\w\-.]*[\w-])|(-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?))"#,
        r#"(?:@[A-Za-z][\w-]*|\^\^(?:<[^>]*>|[\w-]+:[\w-]+))?"#,
    ))
    .unwrap()
});

static LIST_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\A\s*,\s*").unwrap());

static WKT_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?").unwrap());

/// Namespaces whose declared prefix is rewritten to a fixed one, so lookups
/// work whatever prefix the document chose.
const CANONICAL_NAMESPACES: &[(&str, &str)] = &[
    ("http://purl.org/dc/terms/", "dct"),
    ("http://purl.org/dc/elements/1.1/", "dc"),
    ("http://www.w3.org/ns/dcat#", "dcat"),
    ("http://xmlns.com/foaf/0.1/", "foaf"),
    ("http://schema.org/", "schema"),
    ("https://schema.org/", "schema"),
    ("http://www.w3.org/ns/locn#", "locn"),
    ("http://www.w3.org/2006/vcard/ns#", "vcard"),
    ("http://www.w3.org/2000/01/rdf-schema#", "rdfs"),
];

const TITLE: &[&str] = &["dct:title", "dc:title", "dcterms:title", "schema:name"];
const DESCRIPTION: &[&str] = &[
    "dct:description",
    "dc:description",
    "dcterms:description",
    "schema:description",
];
const KEYWORDS: &[&str] = &["dcat:keyword", "dc:subject", "dct:subject", "schema:keywords"];
const CONTACT: &[&str] = &[
    "dct:publisher",
    "dc:publisher",
    "dct:creator",
    "dc:creator",
    "foaf:name",
];
const EMAIL: &[&str] = &["vcard:hasEmail", "foaf:mbox", "schema:email"];
const TEMPORAL: &[&str] = &["dct:temporal", "dc:date", "dct:date", "schema:temporalCoverage"];
const TEMPORAL_START: &[&str] = &["dcat:startDate", "schema:startDate"];
const TEMPORAL_END: &[&str] = &["dcat:endDate", "schema:endDate"];
const METADATA_DATE: &[&str] = &[
    "dct:modified",
    "dct:created",
    "dc:date",
    "schema:dateModified",
];
const LANGUAGE: &[&str] = &["dct:language", "dc:language"];
const TOPIC: &[&str] = &["dcat:theme", "dc:type", "dct:type"];
const DOWNLOAD: &[&str] = &["dcat:downloadURL", "dcat:accessURL"];
const LANDING: &[&str] = &["dcat:landingPage", "foaf:homepage"];
const GEOMETRY: &[&str] = &["dcat:bbox", "locn:geometry"];
const RELATIONS: &[&str] = &[
    "dct:relation",
    "dct:isPartOf",
    "dct:hasPart",
    "dct:references",
    "dct:source",
];

/// Multi-valued `prefix:local -> objects` map, objects in document order.
#[derive(Debug, Default)]
pub struct PropertyMap {
    values: FxHashMap<String, Vec<String>>,
}

impl PropertyMap {
    /// Scans Turtle text into a property map.
    pub fn scan(content: &str) -> Self {
        let content = strip_comments(content);
        let content = content.as_str();
        let prefixes = declared_prefixes(content);
        let mut map = Self::default();

        let mut pos = 0;
        while let Some(caps) = PREDICATE_REGEX.captures_at(content, pos) {
            let whole = caps.get(0).map_or(pos..pos, |m| m.range());
            let predicate = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(uri), _, _) => canonical_uri(uri.as_str()),
                (None, Some(prefix), Some(local)) => Some(format!(
                    "{}:{}",
                    prefixes
                        .get(prefix.as_str())
                        .map_or(prefix.as_str(), String::as_str),
                    local.as_str()
                )),
                _ => None,
            };

            let (objects, end, rescan) = read_objects(content, whole.end);
            if let Some(predicate) = predicate.filter(|_| !objects.is_empty()) {
                map.values.entry(predicate).or_default().extend(objects);
            }
            // A subject looks like a predicate with a one-term object list.
            pos = if rescan { whole.end } else { end.max(whole.end) };
            if pos >= content.len() {
                break;
            }
        }
        map
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, property: &str) -> &[String] {
        self.values.get(property).map_or(&[], Vec::as_slice)
    }

    /// First non-blank value of the first candidate property that has one.
    pub fn first(&self, candidates: &[&str]) -> Option<String> {
        candidates.iter().find_map(|property| {
            self.get(property)
                .iter()
                .map(|v| v.trim())
                .find(|v| !v.is_empty())
                .map(str::to_string)
        })
    }

    /// Every value of every candidate, in candidate order.
    pub fn all(&self, candidates: &[&str]) -> Vec<String> {
        candidates
            .iter()
            .flat_map(|property| self.get(property).iter().cloned())
            .collect()
    }
}

/// Drops `#` comments up to end of line. A `#` inside an IRI or a string
/// literal is kept.
fn strip_comments(content: &str) -> String {
    let bytes = content.as_bytes();
    let mut out = String::with_capacity(content.len());
    let mut kept = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                out.push_str(&content[kept..i]);
                i = content[i..].find('\n').map_or(bytes.len(), |n| i + n);
                kept = i;
            }
            b'<' => i = span_end(bytes, i + 1, b">", false),
            quote @ (b'"' | b'\'') => {
                let long = [quote; 3];
                let delim: &[u8] = if bytes[i..].starts_with(&long) { &long } else { &long[..1] };
                i = span_end(bytes, i + delim.len(), delim, true);
            }
            _ => i += 1,
        }
    }
    out.push_str(&content[kept..]);
    out
}

/// Offset just past `delim`, starting at `i`. Single-character delimiters
/// never span a line break.
fn span_end(bytes: &[u8], mut i: usize, delim: &[u8], escapes: bool) -> usize {
    while i < bytes.len() {
        if escapes && bytes[i] == b'\\' {
            i += 2;
        } else if bytes[i..].starts_with(delim) {
            return i + delim.len();
        } else if delim.len() == 1 && bytes[i] == b'\n' {
            return i;
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// Declared prefix -> canonical prefix, for namespaces we know.
fn declared_prefixes(content: &str) -> FxHashMap<String, String> {
    let mut prefixes = FxHashMap::default();
    for caps in PREFIX_REGEX.captures_iter(content) {
        let (Some(name), Some(uri)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if let Some((_, canonical)) = CANONICAL_NAMESPACES
            .iter()
            .find(|(ns, _)| *ns == uri.as_str())
        {
            prefixes.insert(name.as_str().to_string(), canonical.to_string());
        }
    }
    prefixes
}

/// `<http://purl.org/dc/terms/title>` -> `dct:title` for known namespaces.
fn canonical_uri(uri: &str) -> Option<String> {
    CANONICAL_NAMESPACES.iter().find_map(|(ns, prefix)| {
        let local = uri.strip_prefix(ns)?;
        (!local.is_empty()).then(|| format!("{prefix}:{local}"))
    })
}

/// Reads `object (, object)*` at `start`. Returns the objects, the end offset,
/// and whether the scan should resume before them because the sole object was
/// a name or IRI that may really be the next predicate.
fn read_objects(content: &str, start: usize) -> (Vec<String>, usize, bool) {
    let mut objects = Vec::new();
    let mut pos = start;
    let mut bare_terms = true;

    loop {
        let Some(caps) = VALUE_REGEX.captures(&content[pos..]) else {
            break;
        };
        let len = caps.get(0).map_or(0, |m| m.end());
        if len == 0 {
            break;
        }
        let value = if let Some(m) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
            bare_terms = false;
            unescape(m.as_str())
        } else if let Some(m) = caps.get(6) {
            bare_terms = false;
            m.as_str().to_string()
        } else if let Some(m) = caps.get(4).or_else(|| caps.get(5)) {
            m.as_str().to_string()
        } else {
            break;
        };
        objects.push(value);
        pos += len;

        match LIST_SEPARATOR.find(&content[pos..]) {
            Some(sep) => pos += sep.end(),
            None => break,
        }
    }

    let rescan = bare_terms && objects.len() == 1;
    (objects, pos, rescan)
}

fn unescape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// `POLYGON((x y, ...))` or `ENVELOPE(minX, maxX, maxY, minY)`, optionally
/// preceded by a CRS URI.
fn wkt_coordinates(wkt: &str) -> Option<[Option<f64>; 4]> {
    let upper = wkt.to_ascii_uppercase();
    let numbers = |from: usize| -> Vec<f64> {
        WKT_NUMBER
            .find_iter(&wkt[from..])
            .filter_map(|m| m.as_str().parse().ok())
            .collect()
    };

    if let Some(at) = upper.find("ENVELOPE") {
        return match numbers(at).as_slice() {
            [min_x, max_x, max_y, min_y] => Some([Some(*min_x), Some(*max_x), Some(*min_y), Some(*max_y)]),
            _ => None,
        };
    }

    let at = upper.find("POLYGON")?;
    let values = numbers(at);
    if values.len() < 6 || values.len() % 2 != 0 {
        return None;
    }
    let xs = values.iter().step_by(2).copied();
    let ys = values.iter().skip(1).step_by(2).copied();
    let west = xs.clone().fold(f64::INFINITY, f64::min);
    let east = xs.fold(f64::NEG_INFINITY, f64::max);
    let south = ys.clone().fold(f64::INFINITY, f64::min);
    let north = ys.fold(f64::NEG_INFINITY, f64::max);
    Some([Some(west), Some(east), Some(south), Some(north)])
}

/// Language tags or vocabulary URIs (`.../iso639-2/eng`, `.../language/ENG`).
fn language_code(value: String) -> String {
    if value.contains("://") {
        if let Some(last) = value.trim_end_matches('/').rsplit('/').next() {
            return last.to_ascii_lowercase();
        }
    }
    value
}

fn temporal_extent(props: &PropertyMap) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let start = props.first(TEMPORAL_START).as_deref().and_then(parse_datetime);
    let end = props.first(TEMPORAL_END).as_deref().and_then(parse_datetime);
    if start.is_some() || end.is_some() {
        return (start, end);
    }
    let Some(coverage) = props.first(TEMPORAL) else {
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

#[derive(Debug, Clone, Default)]
pub struct TurtleExtractor {
    config: ExtractorConfig,
}

impl TurtleExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    fn scan(&self, path: &Path) -> Result<PropertyMap, ExtractionError> {
        let content = read_source(path)?;
        let props = PropertyMap::scan(&content);
        if props.is_empty() {
            return Err(ExtractionError::extraction(path, "no Turtle statements found"));
        }
        debug!(path = %path.display(), properties = props.len(), "scanned Turtle properties");
        Ok(props)
    }

    fn to_metadata(&self, props: &PropertyMap, path: &Path) -> Result<Extraction, ExtractionError> {
        let mut policy = FieldPolicy::new(self.config.strict_mode);
        let invalid = invalid(path);

        let title = policy
            .mandatory("title", props.first(TITLE))
            .map_err(&invalid)?;
        let abstract_text = policy
            .mandatory("abstract", props.first(DESCRIPTION))
            .map_err(&invalid)?;

        let coordinates = match props.first(GEOMETRY) {
            Some(wkt) => wkt_coordinates(&wkt).unwrap_or_else(|| {
                policy.dropped("bounding box", format!("unreadable WKT geometry {wkt:?}"));
                [None; 4]
            }),
            None => [None; 4],
        };
        let bbox = policy.bounding_box(coordinates).map_err(&invalid)?;

        let (start, end) = temporal_extent(props);
        let (start, end) = policy.temporal(start, end).map_err(&invalid)?;

        let email = props
            .first(EMAIL)
            .map(|e| e.trim_start_matches("mailto:").to_string());

        let relationships = RELATIONS.iter().flat_map(|relation| {
            props
                .get(relation)
                .iter()
                .filter_map(move |target| MetadataRelationship::new(*relation, target.as_str()).ok())
        });

        let builder = Metadata::builder(title, abstract_text)
            .keywords(props.all(KEYWORDS))
            .bounding_box(bbox)
            .temporal_extent(start, end)
            .contact_organization(props.first(CONTACT))
            .contact_email(email)
            .metadata_date(props.first(METADATA_DATE).as_deref().and_then(parse_datetime))
            .dataset_language(props.first(LANGUAGE).map(language_code))
            .topic_category(props.first(TOPIC))
            .download_url(props.first(DOWNLOAD))
            .landing_page_url(props.first(LANDING))
            .relationships(relationships);

        policy.finish(builder, path)
    }
}

impl MetadataExtractor for TurtleExtractor {
    fn format_name(&self) -> &'static str {
        "rdf"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ttl", "turtle"]
    }

    fn sniff(&self, head: &str) -> bool {
        PREFIX_REGEX.is_match(head)
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractionError> {
        let props = self.scan(path)?;
        self.to_metadata(&props, path)
    }

    fn extract_resources(&self, path: &Path) -> Vec<Resource> {
        let props = match self.scan(path) {
            Ok(props) => props,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "resource discovery failed");
                return Vec::new();
            }
        };

        let files = props
            .get("dcat:downloadURL")
            .iter()
            .map(|url| Resource::remote_file(url, "download"));
        let folders = props
            .get("dcat:accessURL")
            .iter()
            .map(|url| Resource::web_folder(url, "access"));
        let endpoints = props
            .get("dcat:endpointURL")
            .iter()
            .map(|url| Resource::api_endpoint(url, "endpoint"));

        let mut found: Vec<Resource> = Vec::new();
        for resource in files.chain(folders).chain(endpoints) {
            if !found.iter().any(|f| f.url == resource.url) {
                found.push(resource);
            }
        }
        found
    }
}
