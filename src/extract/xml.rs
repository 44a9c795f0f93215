//! ISO 19139 (`gmd`/`gco`) XML extractor.

use super::xml_tree::{parse_document, Element, XLINK};
use super::{
    invalid, parse_datetime, read_source, Extraction, ExtractorConfig, FieldPolicy,
    MetadataExtractor,
};
use crate::classify::{classify, OnlineResource};
use crate::error::ExtractionError;
use crate::models::{Metadata, MetadataRelationship, Resource};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, warn};

const TITLE_PATHS: &[&str] = &[
    ".//gmd:identificationInfo//gmd:citation//gmd:title/gco:CharacterString",
    ".//gmd:identificationInfo//gmd:citation//gmd:title/gmx:Anchor",
    ".//gmd:MD_DataIdentification/gmd:citation//gmd:title/gco:CharacterString",
];

const ABSTRACT_PATHS: &[&str] = &[
    ".//gmd:identificationInfo//gmd:abstract/gco:CharacterString",
    ".//gmd:identificationInfo//gmd:abstract/gmx:Anchor",
    ".//gmd:MD_DataIdentification/gmd:abstract/gco:CharacterString",
];

const KEYWORD_PATHS: &[&str] = &[
    ".//gmd:descriptiveKeywords//gmd:keyword/gco:CharacterString",
    ".//gmd:descriptiveKeywords//gmd:keyword/gmx:Anchor",
];

const DATE_STAMP_PATHS: &[&str] = &[".//gmd:dateStamp/gco:DateTime", ".//gmd:dateStamp/gco:Date"];

const LANGUAGE_TEXT_PATH: &str = ".//gmd:identificationInfo//gmd:language/gco:CharacterString";
const LANGUAGE_CODE_PATH: &str = ".//gmd:identificationInfo//gmd:language/gmd:LanguageCode";

/// Begin/end positions: GML 3.2, the pre-3.2 namespace, then nested
/// `TimeInstant` positions.
const TEMPORAL_PATHS: &[(&str, &str)] = &[
    (
        ".//gmd:extent//gml:TimePeriod/gml:beginPosition",
        ".//gmd:extent//gml:TimePeriod/gml:endPosition",
    ),
    (
        ".//gmd:extent//gml31:TimePeriod/gml31:beginPosition",
        ".//gmd:extent//gml31:TimePeriod/gml31:endPosition",
    ),
    (
        ".//gmd:extent//gml:TimePeriod/gml:begin//gml:timePosition",
        ".//gmd:extent//gml:TimePeriod/gml:end//gml:timePosition",
    ),
];

const BBOX_PATH: &str = ".//gmd:extent//gmd:EX_GeographicBoundingBox";

const ONLINE_RESOURCE_PATH: &str = ".//gmd:distributionInfo//gmd:onLine//gmd:CI_OnlineResource";

const CONNECT_POINT_PATH: &str = ".//srv:containsOperations//srv:connectPoint//gmd:linkage/gmd:URL";

#[derive(Debug, Clone, Default)]
pub struct XmlExtractor {
    config: ExtractorConfig,
}

impl XmlExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    fn parse(&self, path: &Path) -> Result<Element, ExtractionError> {
        let content = read_source(path)?;
        parse_document(&content).map_err(|reason| ExtractionError::extraction(path, reason))
    }

    fn to_metadata(&self, root: &Element, path: &Path) -> Result<Extraction, ExtractionError> {
        let mut policy = FieldPolicy::new(self.config.strict_mode);
        let invalid = invalid(path);

        let title = policy
            .mandatory("title", root.first_text_of(TITLE_PATHS))
            .map_err(&invalid)?;
        let abstract_text = policy
            .mandatory("abstract", root.first_text_of(ABSTRACT_PATHS))
            .map_err(&invalid)?;

        let bbox = policy
            .bounding_box(bbox_coordinates(root))
            .map_err(&invalid)?;

        let (start, end) = temporal_extent(root);
        let (start, end) = policy.temporal(start, end).map_err(&invalid)?;

        let resources = online_resources(root);
        let file_identifier = root.first_text(".//gmd:fileIdentifier/gco:CharacterString");
        let distribution = classify(
            &resources,
            None,
            &self.config.profile,
            file_identifier.as_deref(),
        );

        let builder = Metadata::builder(title, abstract_text)
            .keywords(texts(root, KEYWORD_PATHS))
            .bounding_box(bbox)
            .temporal_extent(start, end)
            .contact_organization(root.first_text(".//gmd:contact//gmd:organisationName/gco:CharacterString"))
            .contact_email(root.first_text(".//gmd:contact//gmd:electronicMailAddress/gco:CharacterString"))
            .metadata_date(root.first_text_of(DATE_STAMP_PATHS).as_deref().and_then(parse_datetime))
            .dataset_language(language(root))
            .topic_category(root.first_text(".//gmd:topicCategory/gmd:MD_TopicCategoryCode"))
            .download_url(distribution.download_url)
            .landing_page_url(distribution.landing_page_url)
            .access_type(distribution.access_type)
            .relationships(relationships(root));

        policy.finish(builder, path)
    }
}

impl MetadataExtractor for XmlExtractor {
    fn format_name(&self) -> &'static str {
        "xml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xml"]
    }

    fn sniff(&self, head: &str) -> bool {
        head.trim_start().starts_with('<')
            && (head.contains("isotc211.org/2005/gmd") || head.contains("MD_Metadata"))
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractionError> {
        let root = self.parse(path)?;
        let extraction = self.to_metadata(&root, path)?;
        debug!(
            path = %path.display(),
            gaps = extraction.gaps.len(),
            "extracted ISO 19139 metadata"
        );
        Ok(extraction)
    }

    fn extract_resources(&self, path: &Path) -> Vec<Resource> {
        let root = match self.parse(path) {
            Ok(root) => root,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "resource discovery failed");
                return Vec::new();
            }
        };

        let mut found: Vec<Resource> = Vec::new();
        let services = root
            .select(CONNECT_POINT_PATH)
            .into_iter()
            .filter_map(Element::text)
            .map(|url| Resource::api_endpoint(url, "service endpoint"));
        let online = online_resources(&root)
            .into_iter()
            .filter_map(|r| r.to_resource(&self.config.profile));

        for resource in online.chain(services) {
            if !found.iter().any(|f| f.url == resource.url) {
                found.push(resource);
            }
        }
        found
    }
}

fn bbox_coordinates(root: &Element) -> [Option<f64>; 4] {
    let Some(bbox) = root.first(BBOX_PATH) else {
        return [None; 4];
    };
    [
        "westBoundLongitude",
        "eastBoundLongitude",
        "southBoundLatitude",
        "northBoundLatitude",
    ]
    .map(|name| {
        bbox.first_text(&format!(".//gmd:{name}/gco:Decimal"))
            .and_then(|v| v.parse::<f64>().ok())
    })
}

fn temporal_extent(root: &Element) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let mut start = None;
    let mut end = None;
    for (begin_path, end_path) in TEMPORAL_PATHS {
        if start.is_none() {
            start = root.first_text(begin_path).as_deref().and_then(parse_datetime);
        }
        if end.is_none() {
            end = root.first_text(end_path).as_deref().and_then(parse_datetime);
        }
    }
    (start, end)
}

fn texts(root: &Element, paths: &[&str]) -> Vec<String> {
    paths
        .iter()
        .flat_map(|path| root.select(path))
        .filter_map(Element::text)
        .map(str::to_string)
        .collect()
}

fn language(root: &Element) -> Option<String> {
    root.first_text(LANGUAGE_TEXT_PATH).or_else(|| {
        root.select(LANGUAGE_CODE_PATH)
            .into_iter()
            .find_map(Element::code_value)
    })
}

fn online_resources(root: &Element) -> Vec<OnlineResource> {
    root.select(ONLINE_RESOURCE_PATH)
        .into_iter()
        .filter_map(|node| {
            let url = node.first_text(".//gmd:linkage/gmd:URL")?;
            let name = node
                .first_text(".//gmd:name/gco:CharacterString")
                .unwrap_or_default();
            let function = node
                .first(".//gmd:function/gmd:CI_OnLineFunctionCode")
                .and_then(Element::code_value)
                .unwrap_or_default();
            let protocol = node
                .first_text(".//gmd:protocol/gco:CharacterString")
                .unwrap_or_default();
            Some(OnlineResource::new(url, name, function).with_protocol(protocol))
        })
        .collect()
}

fn relationships(root: &Element) -> Vec<MetadataRelationship> {
    root.select(".//gmd:aggregationInfo/gmd:MD_AggregateInformation")
        .into_iter()
        .filter_map(|info| {
            let relation = info
                .first(".//gmd:associationType/gmd:DS_AssociationTypeCode")
                .and_then(Element::code_value)?;
            let target = info
                .first_text(".//gmd:aggregateDataSetIdentifier//gmd:code/gco:CharacterString")
                .or_else(|| {
                    info.first(".//gmd:aggregateDataSetIdentifier//gmd:code/gmx:Anchor")
                        .and_then(|anchor| {
                            anchor
                                .attr_ns(XLINK, "href")
                                .map(str::to_string)
                                .or_else(|| anchor.text().map(str::to_string))
                        })
                })?;
            MetadataRelationship::new(relation, target).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessType, ResourceKind};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn record(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd"
    xmlns:gco="http://www.isotc211.org/2005/gco"
    xmlns:gml="http://www.opengis.net/gml/3.2"
    xmlns:gmx="http://www.isotc211.org/2005/gmx"
    xmlns:srv="http://www.isotc211.org/2005/srv"
    xmlns:xlink="http://www.w3.org/1999/xlink">
{body}
</gmd:MD_Metadata>"#
        )
    }

    const IDENT: &str = r#"
  <gmd:fileIdentifier><gco:CharacterString>f3b1c7a2-3c1d-4e55-9a0c-6d2f8b7e1a90</gco:CharacterString></gmd:fileIdentifier>
  <gmd:identificationInfo><gmd:MD_DataIdentification>
    <gmd:citation><gmd:CI_Citation><gmd:title><gco:CharacterString>Soil moisture</gco:CharacterString></gmd:title></gmd:CI_Citation></gmd:citation>
    <gmd:abstract><gco:CharacterString>Daily soil moisture.</gco:CharacterString></gmd:abstract>
    <gmd:descriptiveKeywords><gmd:MD_Keywords>
      <gmd:keyword><gco:CharacterString>soil</gco:CharacterString></gmd:keyword>
      <gmd:keyword><gmx:Anchor xlink:href="http://vocab/hydro">hydrology</gmx:Anchor></gmd:keyword>
      <gmd:keyword><gco:CharacterString>soil</gco:CharacterString></gmd:keyword>
    </gmd:MD_Keywords></gmd:descriptiveKeywords>
    <gmd:language><gmd:LanguageCode codeListValue="eng"/></gmd:language>
    <gmd:topicCategory><gmd:MD_TopicCategoryCode>environment</gmd:MD_TopicCategoryCode></gmd:topicCategory>
    <gmd:extent><gmd:EX_Extent>
      <gmd:geographicElement><gmd:EX_GeographicBoundingBox>
        <gmd:westBoundLongitude><gco:Decimal>-8.6</gco:Decimal></gmd:westBoundLongitude>
        <gmd:eastBoundLongitude><gco:Decimal>1.8</gco:Decimal></gmd:eastBoundLongitude>
        <gmd:southBoundLatitude><gco:Decimal>49.9</gco:Decimal></gmd:southBoundLatitude>
        <gmd:northBoundLatitude><gco:Decimal>60.8</gco:Decimal></gmd:northBoundLatitude>
      </gmd:EX_GeographicBoundingBox></gmd:geographicElement>
      <gmd:temporalElement><gmd:EX_TemporalExtent><gmd:extent>
        <gml:TimePeriod gml:id="t1"><gml:beginPosition>2015-01-01</gml:beginPosition><gml:endPosition>2020-12-31</gml:endPosition></gml:TimePeriod>
      </gmd:extent></gmd:EX_TemporalExtent></gmd:temporalElement>
    </gmd:EX_Extent></gmd:extent>
    <gmd:aggregationInfo><gmd:MD_AggregateInformation>
      <gmd:aggregateDataSetIdentifier><gmd:MD_Identifier><gmd:code><gco:CharacterString>https://catalogue.ceh.ac.uk/id/0b1c2d3e-4f50-4a6b-8c7d-9e0f1a2b3c4d</gco:CharacterString></gmd:code></gmd:MD_Identifier></gmd:aggregateDataSetIdentifier>
      <gmd:associationType><gmd:DS_AssociationTypeCode codeListValue="largerWorkCitation"/></gmd:associationType>
    </gmd:MD_AggregateInformation></gmd:aggregationInfo>
  </gmd:MD_DataIdentification></gmd:identificationInfo>
  <gmd:contact><gmd:CI_ResponsibleParty>
    <gmd:organisationName><gco:CharacterString>UK Centre for Ecology &amp; Hydrology</gco:CharacterString></gmd:organisationName>
    <gmd:contactInfo><gmd:CI_Contact><gmd:address><gmd:CI_Address>
      <gmd:electronicMailAddress><gco:CharacterString>enquiries@ceh.ac.uk</gco:CharacterString></gmd:electronicMailAddress>
    </gmd:CI_Address></gmd:address></gmd:CI_Contact></gmd:contactInfo>
  </gmd:CI_ResponsibleParty></gmd:contact>
  <gmd:dateStamp><gco:DateTime>2021-05-04T10:00:00</gco:DateTime></gmd:dateStamp>
"#;

    const DISTRIBUTION: &str = r#"
  <gmd:distributionInfo><gmd:MD_Distribution><gmd:transferOptions><gmd:MD_DigitalTransferOptions>
    <gmd:onLine><gmd:CI_OnlineResource>
      <gmd:linkage><gmd:URL>https://catalogue.ceh.ac.uk/datastore/eidchub/f3b1c7a2/data.zip</gmd:URL></gmd:linkage>
      <gmd:name><gco:CharacterString>Download the data</gco:CharacterString></gmd:name>
      <gmd:function><gmd:CI_OnLineFunctionCode codeListValue="download"/></gmd:function>
    </gmd:CI_OnlineResource></gmd:onLine>
    <gmd:onLine><gmd:CI_OnlineResource>
      <gmd:linkage><gmd:URL>https://catalogue.ceh.ac.uk/documents/f3b1c7a2</gmd:URL></gmd:linkage>
      <gmd:function><gmd:CI_OnLineFunctionCode codeListValue="information"/></gmd:function>
    </gmd:CI_OnlineResource></gmd:onLine>
    <gmd:onLine><gmd:CI_OnlineResource>
      <gmd:linkage><gmd:URL>https://catalogue.ceh.ac.uk/maps/wms</gmd:URL></gmd:linkage>
      <gmd:protocol><gco:CharacterString>OGC:WMS</gco:CharacterString></gmd:protocol>
    </gmd:CI_OnlineResource></gmd:onLine>
  </gmd:MD_DigitalTransferOptions></gmd:transferOptions></gmd:MD_Distribution></gmd:distributionInfo>
"#;

    #[test]
    fn extracts_full_record() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "record.xml", &record(&format!("{IDENT}{DISTRIBUTION}")));

        let extraction = XmlExtractor::default().extract(&path).unwrap();
        assert!(extraction.is_complete());
        let m = extraction.metadata;

        assert_eq!(m.title(), "Soil moisture");
        assert_eq!(m.abstract_text(), "Daily soil moisture.");
        assert_eq!(m.keywords(), ["soil", "hydrology"]);
        let bbox = m.bounding_box().unwrap();
        assert_eq!((bbox.west(), bbox.east(), bbox.south(), bbox.north()), (-8.6, 1.8, 49.9, 60.8));
        assert!(m.has_temporal_extent());
        assert_eq!(m.contact_organization(), Some("UK Centre for Ecology & Hydrology"));
        assert_eq!(m.contact_email(), Some("enquiries@ceh.ac.uk"));
        assert_eq!(m.dataset_language(), "eng");
        assert_eq!(m.topic_category(), Some("environment"));
        assert_eq!(
            m.download_url(),
            Some("https://catalogue.ceh.ac.uk/datastore/eidchub/f3b1c7a2/data.zip")
        );
        assert_eq!(m.landing_page_url(), Some("https://catalogue.ceh.ac.uk/documents/f3b1c7a2"));
        assert_eq!(m.access_type(), AccessType::Download);
        assert_eq!(m.relationships().len(), 1);
        assert_eq!(m.relationships()[0].relation(), "largerWorkCitation");
        assert!(m.relationships()[0].target_id().is_some());
    }

    #[test]
    fn missing_distribution_falls_back_to_identifier() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "record.xml", &record(IDENT));

        let m = XmlExtractor::default().extract(&path).unwrap().metadata;
        assert_eq!(
            m.download_url(),
            Some("https://catalogue.ceh.ac.uk/datastore/eidchub/f3b1c7a2-3c1d-4e55-9a0c-6d2f8b7e1a90")
        );
        assert_eq!(m.landing_page_url(), m.download_url());
    }

    #[test]
    fn partial_bbox_is_dropped_in_any_mode() {
        let body = r#"
  <gmd:identificationInfo><gmd:MD_DataIdentification>
    <gmd:citation><gmd:CI_Citation><gmd:title><gco:CharacterString>T</gco:CharacterString></gmd:title></gmd:CI_Citation></gmd:citation>
    <gmd:abstract><gco:CharacterString>A</gco:CharacterString></gmd:abstract>
    <gmd:extent><gmd:EX_Extent><gmd:geographicElement><gmd:EX_GeographicBoundingBox>
      <gmd:westBoundLongitude><gco:Decimal>-8.6</gco:Decimal></gmd:westBoundLongitude>
      <gmd:eastBoundLongitude><gco:Decimal>1.8</gco:Decimal></gmd:eastBoundLongitude>
      <gmd:southBoundLatitude><gco:Decimal>49.9</gco:Decimal></gmd:southBoundLatitude>
    </gmd:EX_GeographicBoundingBox></gmd:geographicElement></gmd:EX_Extent></gmd:extent>
  </gmd:MD_DataIdentification></gmd:identificationInfo>"#;
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "partial.xml", &record(body));

        for config in [ExtractorConfig::lenient(), ExtractorConfig::strict()] {
            let extraction = XmlExtractor::new(config).extract(&path).unwrap();
            assert!(extraction.metadata.bounding_box().is_none());
            assert_eq!(extraction.gaps[0].field(), "bounding box");
        }
    }

    #[test]
    fn inverted_bbox_fails_only_in_strict_mode() {
        let body = r#"
  <gmd:identificationInfo><gmd:MD_DataIdentification>
    <gmd:citation><gmd:CI_Citation><gmd:title><gco:CharacterString>T</gco:CharacterString></gmd:title></gmd:CI_Citation></gmd:citation>
    <gmd:abstract><gco:CharacterString>A</gco:CharacterString></gmd:abstract>
    <gmd:extent><gmd:EX_Extent><gmd:geographicElement><gmd:EX_GeographicBoundingBox>
      <gmd:westBoundLongitude><gco:Decimal>10</gco:Decimal></gmd:westBoundLongitude>
      <gmd:eastBoundLongitude><gco:Decimal>5</gco:Decimal></gmd:eastBoundLongitude>
      <gmd:southBoundLatitude><gco:Decimal>0</gco:Decimal></gmd:southBoundLatitude>
      <gmd:northBoundLatitude><gco:Decimal>1</gco:Decimal></gmd:northBoundLatitude>
    </gmd:EX_GeographicBoundingBox></gmd:geographicElement></gmd:EX_Extent></gmd:extent>
  </gmd:MD_DataIdentification></gmd:identificationInfo>"#;
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "inverted.xml", &record(body));

        let lenient = XmlExtractor::default().extract(&path).unwrap();
        assert!(lenient.metadata.bounding_box().is_none());
        assert!(!lenient.is_complete());

        let err = XmlExtractor::new(ExtractorConfig::strict())
            .extract(&path)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Validation { .. }));
    }

    #[test]
    fn missing_title_placeholder_or_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "empty.xml", &record(""));

        let extraction = XmlExtractor::default().extract(&path).unwrap();
        assert_eq!(extraction.metadata.title(), "[Missing title]");
        assert_eq!(extraction.metadata.abstract_text(), "[Missing abstract]");
        assert_eq!(extraction.placeholders().collect::<Vec<_>>(), ["title", "abstract"]);

        let err = XmlExtractor::new(ExtractorConfig::strict())
            .extract(&path)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Validation { .. }));
    }

    #[test]
    fn malformed_xml_is_an_extraction_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.xml", "<gmd:MD_Metadata><unclosed>");
        let err = XmlExtractor::default().extract(&path).unwrap_err();
        assert!(matches!(err, ExtractionError::Extraction { .. }));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = XmlExtractor::default()
            .extract(Path::new("/nonexistent/record.xml"))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::NotFound { .. }));
    }

    #[test]
    fn resources_are_classified() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "record.xml", &record(&format!("{IDENT}{DISTRIBUTION}")));

        let resources = XmlExtractor::default().extract_resources(&path);
        let kinds: Vec<_> = resources.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, [ResourceKind::RemoteFile, ResourceKind::ApiEndpoint]);
        assert_eq!(resources[0].format.as_deref(), Some("zip"));
    }

    #[test]
    fn resource_discovery_swallows_errors() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.xml", "<<<");
        assert!(XmlExtractor::default().extract_resources(&path).is_empty());
    }

    #[test]
    fn sniffs_iso_documents_without_extension() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "record", &record(IDENT));
        assert!(XmlExtractor::default().can_extract(&path));
        assert!(!XmlExtractor::default().can_extract(Path::new("record.json")));
    }
}
