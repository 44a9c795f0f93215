//! Integration tests for the remote metadata fetcher.
//!
//! No network: every test plugs a `Recorder` transport into `MetadataFetcher`
//! and scripts its answers per URL and `Accept` header. The recorder keeps the
//! request log so tests can assert on candidate order and negotiation.
//!
//! - **Candidate Tests** -- Order, format preference and per-format fetches
//! - **Retry Tests** -- Status and transport retry layers
//! - **Failure Tests** -- What an exhausted fetch reports
//! - **Pipeline Tests** -- Fetch then extract through the factory

use geometa::error::{DownloadError, FetchError, TransportError};
use geometa::factory::ExtractorFactory;
use geometa::fetch::{Backoff, FetchConfig, HttpResponse, MetadataFetcher, MetadataFormat, Transport};
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

const ID: &str = "0b1c2d3e-4f50-4a6b-8c7d-9e0f1a2b3c4d";

type Responder = Box<dyn Fn(&str, Option<&str>) -> Result<HttpResponse, TransportError> + Send + Sync>;

struct Recorder {
    respond: Responder,
    log: Mutex<Vec<(String, Option<String>)>>,
}

impl Recorder {
    fn new(
        respond: impl Fn(&str, Option<&str>) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            log: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<(String, Option<String>)> {
        self.log.lock().unwrap().clone()
    }
}

impl Transport for Recorder {
    fn get(&self, url: &str, accept: Option<&str>) -> Result<HttpResponse, TransportError> {
        self.log
            .lock()
            .unwrap()
            .push((url.to_string(), accept.map(str::to_string)));
        (self.respond)(url, accept)
    }
}

fn reply(status: u16, content_type: &str, body: &str) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status,
        content_type: Some(content_type.to_string()),
        body: body.as_bytes().to_vec(),
    })
}

fn not_found() -> Result<HttpResponse, TransportError> {
    reply(404, "text/plain", "")
}

const JSON_BODY: &str = r#"{"title": "River flows", "abstract": "Daily mean river flow.", "metadataDate": "2022-01-01"}"#;

const XML_BODY: &str = r#"<?xml version="1.0"?>
<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco">
  <gmd:identificationInfo><gmd:MD_DataIdentification>
    <gmd:citation><gmd:CI_Citation><gmd:title><gco:CharacterString>River flows</gco:CharacterString></gmd:title></gmd:CI_Citation></gmd:citation>
    <gmd:abstract><gco:CharacterString>Daily mean river flow.</gco:CharacterString></gmd:abstract>
  </gmd:MD_DataIdentification></gmd:identificationInfo>
</gmd:MD_Metadata>"#;

fn config(dir: &TempDir, catalogue: &str) -> FetchConfig {
    FetchConfig {
        catalogue: catalogue.to_string(),
        max_retries: 0,
        download_dir: dir.path().to_path_buf(),
        backoff: Backoff::immediate(),
        ..FetchConfig::default()
    }
}

fn fetcher(config: FetchConfig, recorder: Recorder) -> MetadataFetcher<Recorder> {
    MetadataFetcher::with_transport(config, recorder).unwrap()
}

// ----------------------------------------------------------------------------
// Candidate order and negotiation
// ----------------------------------------------------------------------------

#[test]
fn preferred_json_falls_through_html_to_xml() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|_, accept| match accept {
        Some("application/json") => reply(200, "text/html; charset=utf-8", "<html>login</html>"),
        Some("application/xml") => reply(200, "application/xml", XML_BODY),
        _ => not_found(),
    });
    let fetcher = fetcher(
        FetchConfig {
            preferred_format: Some(MetadataFormat::Json),
            ..config(&dir, "ceh")
        },
        recorder,
    );

    let fetched = fetcher.fetch(ID).unwrap();

    assert_eq!(fetched.format, MetadataFormat::Xml);
    assert_eq!(fetched.url, format!("https://catalogue.ceh.ac.uk/id/{ID}"));
    assert_eq!(fetched.path, dir.path().join(format!("metadata_{ID}.xml")));
    assert_eq!(fs::read_to_string(&fetched.path).unwrap(), XML_BODY);
    assert_eq!(fetched.bytes, XML_BODY.len() as u64);

    let requests = fetcher.transport().requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].1.as_deref(), Some("application/json"));
    assert_eq!(requests[1].1.as_deref(), Some("application/xml"));
    assert!(!dir.path().join(format!("metadata_{ID}.json")).exists());
}

#[test]
fn preferred_xml_is_tried_first() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|_, _| reply(200, "application/xml", XML_BODY));
    let fetcher = fetcher(config(&dir, "ceh"), recorder);

    let fetched = fetcher.fetch_with(ID, Some(MetadataFormat::Xml)).unwrap();

    assert_eq!(fetched.format, MetadataFormat::Xml);
    let requests = fetcher.transport().requests();
    assert_eq!(requests, [(format!("https://catalogue.ceh.ac.uk/id/{ID}"), Some("application/xml".to_string()))]);
}

#[test]
fn xml_falls_back_to_web_accessible_folder() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|url, _| {
        if url.contains("/waf/") {
            reply(200, "text/xml", XML_BODY)
        } else {
            not_found()
        }
    });
    let fetcher = fetcher(config(&dir, "ceh"), recorder);

    let fetched = fetcher.fetch_xml(ID).unwrap();

    assert_eq!(
        fetched.url,
        format!("https://catalogue.ceh.ac.uk/documents/gemini/waf/{ID}.xml")
    );
    let requests = fetcher.transport().requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].1, None);
}

#[test]
fn fetch_json_never_tries_xml() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|_, accept| match accept {
        Some("application/json") => not_found(),
        _ => reply(200, "application/xml", XML_BODY),
    });
    let fetcher = fetcher(config(&dir, "ceh"), recorder);

    match fetcher.fetch_json(ID) {
        Err(FetchError::Exhausted { reason, .. }) => assert_eq!(reason, "JSON format not available"),
        other => panic!("expected exhausted fetch, got {other:?}"),
    }
    let requests = fetcher.transport().requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].1.as_deref(), Some("application/json"));
}

#[test]
fn ceda_uses_query_endpoints_after_negotiation() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|url, _| {
        if url.ends_with("?format=json") {
            reply(200, "application/json", JSON_BODY)
        } else {
            reply(406, "text/plain", "")
        }
    });
    let fetcher = fetcher(config(&dir, "CEDA"), recorder);

    let fetched = fetcher.fetch(ID).unwrap();

    assert_eq!(fetched.format, MetadataFormat::Json);
    let urls: Vec<String> = fetcher.transport().requests().into_iter().map(|(url, _)| url).collect();
    assert_eq!(
        urls,
        [
            format!("https://catalogue.ceda.ac.uk/uuid/{ID}"),
            format!("https://catalogue.ceda.ac.uk/uuid/{ID}"),
            format!("https://catalogue.ceda.ac.uk/uuid/{ID}?format=json"),
        ]
    );
}

#[test]
fn bodies_that_are_not_documents_are_skipped() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|_, accept| match accept {
        Some("application/json") => reply(200, "application/json", "Service temporarily moved"),
        _ => reply(200, "application/xml", XML_BODY),
    });
    let fetcher = fetcher(config(&dir, "ceh"), recorder);

    assert_eq!(fetcher.fetch(ID).unwrap().format, MetadataFormat::Xml);
}

// ----------------------------------------------------------------------------
// Retries
// ----------------------------------------------------------------------------

#[test]
fn server_errors_are_retried_up_to_max_retries() {
    let dir = TempDir::new().unwrap();
    let calls = AtomicU32::new(0);
    let recorder = Recorder::new(move |_, _| {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            reply(503, "text/plain", "busy")
        } else {
            reply(200, "application/json", JSON_BODY)
        }
    });
    let fetcher = fetcher(
        FetchConfig {
            max_retries: 2,
            ..config(&dir, "ceh")
        },
        recorder,
    );

    let fetched = fetcher.fetch(ID).unwrap();

    assert_eq!(fetched.format, MetadataFormat::Json);
    let requests = fetcher.transport().requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|(_, accept)| accept.as_deref() == Some("application/json")));
}

#[test]
fn without_retries_a_server_error_moves_to_the_next_candidate() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|_, accept| match accept {
        Some("application/json") => reply(500, "text/plain", ""),
        _ => reply(200, "application/xml", XML_BODY),
    });
    let fetcher = fetcher(config(&dir, "ceh"), recorder);

    assert_eq!(fetcher.fetch(ID).unwrap().format, MetadataFormat::Xml);
    assert_eq!(fetcher.transport().requests().len(), 2);
}

#[test]
fn timeouts_are_retried_at_the_transport_layer() {
    let dir = TempDir::new().unwrap();
    let calls = AtomicU32::new(0);
    let recorder = Recorder::new(move |_, _| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(TransportError::Timeout("read timed out".to_string()))
        } else {
            reply(200, "application/json", JSON_BODY)
        }
    });
    let fetcher = fetcher(config(&dir, "ceh"), recorder);

    let fetched = fetcher.fetch(ID).unwrap();

    assert_eq!(fetched.format, MetadataFormat::Json);
    assert_eq!(fetcher.transport().requests().len(), 2);
}

#[test]
fn client_errors_are_not_retried() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|_, _| not_found());
    let fetcher = fetcher(
        FetchConfig {
            max_retries: 3,
            ..config(&dir, "ceh")
        },
        recorder,
    );

    assert!(fetcher.fetch(ID).is_err());
    // One request per candidate: negotiated JSON, negotiated XML, folder XML.
    assert_eq!(fetcher.transport().requests().len(), 3);
}

// ----------------------------------------------------------------------------
// Failures
// ----------------------------------------------------------------------------

#[test]
fn exhausted_fetch_reports_identifier_and_last_error() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|url, _| {
        if url.contains("/waf/") {
            reply(410, "text/plain", "")
        } else {
            not_found()
        }
    });
    let fetcher = fetcher(config(&dir, "ceh"), recorder);

    let err = fetcher.fetch(ID).unwrap_err();

    assert_eq!(err.identifier(), Some(ID));
    match err {
        FetchError::Exhausted {
            last: Some(DownloadError::Status { url, status }),
            ..
        } => {
            assert_eq!(status, 410);
            assert!(url.contains("/waf/"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn empty_identifier_makes_no_requests() {
    let dir = TempDir::new().unwrap();
    let fetcher = fetcher(config(&dir, "ceh"), Recorder::new(|_, _| not_found()));

    assert!(matches!(fetcher.fetch("  "), Err(FetchError::Exhausted { .. })));
    assert!(matches!(fetcher.fetch_xml("\n"), Err(FetchError::Exhausted { .. })));
    assert!(fetcher.transport().requests().is_empty());
}

#[test]
fn padded_identifiers_are_trimmed_before_requests() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|_, _| reply(200, "application/json", JSON_BODY));
    let fetcher = fetcher(config(&dir, "ceh"), recorder);

    let padded = format!("  {ID}\n");
    let fetched = fetcher.fetch(&padded).unwrap();
    fetcher.fetch_json(&padded).unwrap();

    assert_eq!(fetched.identifier, ID);
    assert_eq!(fetched.url, format!("https://catalogue.ceh.ac.uk/id/{ID}"));
    assert_eq!(fetched.path, dir.path().join(format!("metadata_{ID}.json")));
    for (url, _) in fetcher.transport().requests() {
        assert_eq!(url, format!("https://catalogue.ceh.ac.uk/id/{ID}"));
    }
}

#[test]
fn unknown_catalogue_lists_known_ones() {
    let dir = TempDir::new().unwrap();
    let result = MetadataFetcher::with_transport(config(&dir, "pangaea"), Recorder::new(|_, _| not_found()));

    match result {
        Err(FetchError::UnknownCatalogue { name, known }) => {
            assert_eq!(name, "pangaea");
            assert_eq!(known, ["ceh", "ceda"]);
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("unknown catalogue accepted"),
    }
}

#[test]
fn identifiers_are_made_path_safe() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|_, _| reply(200, "application/json", JSON_BODY));
    let fetcher = fetcher(config(&dir, "ceh"), recorder);

    let fetched = fetcher.fetch("../etc/passwd").unwrap();

    assert_eq!(fetched.path.parent(), Some(dir.path()));
    let name = fetched.path.file_name().and_then(|n| n.to_str()).unwrap();
    assert!(name.starts_with("metadata_.._etc_passwd-") && name.ends_with(".json"), "{name}");
    assert!(fetched.path.exists());
}

#[test]
fn identifiers_differing_only_in_unsafe_characters_get_distinct_files() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::new(|_, _| reply(200, "application/json", JSON_BODY));
    let fetcher = fetcher(config(&dir, "ceh"), recorder);

    let slashed = fetcher.fetch("a/b").unwrap();
    let underscored = fetcher.fetch("a_b").unwrap();

    assert_eq!(underscored.path, dir.path().join("metadata_a_b.json"));
    assert_ne!(slashed.path, underscored.path);
    assert!(slashed.path.exists() && underscored.path.exists());
}

// ----------------------------------------------------------------------------
// Fetch then extract
// ----------------------------------------------------------------------------

#[test]
fn fetched_documents_extract_through_the_factory() {
    let dir = TempDir::new().unwrap();
    let factory = ExtractorFactory::default();

    for format in [MetadataFormat::Json, MetadataFormat::Xml] {
        let recorder = Recorder::new(|_, accept| match accept {
            Some("application/json") => reply(200, "application/json", JSON_BODY),
            _ => reply(200, "application/xml", XML_BODY),
        });
        let fetcher = fetcher(config(&dir, "ceh"), recorder);
        let fetched = fetcher.fetch_with(ID, Some(format)).unwrap();

        let extractor = factory.create_extractor_by_format(fetched.format.as_str()).unwrap();
        let metadata = extractor.extract(&fetched.path).unwrap().metadata;
        assert_eq!(metadata.title(), "River flows");
        assert_eq!(metadata.abstract_text(), "Daily mean river flow.");
    }
}
